//! Agent profiles: the roster entries the controller assigns work to

use crate::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Agent Identifier ─────────────────────────────────────────────────

/// Unique identifier for an agent
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Agent Kind ───────────────────────────────────────────────────────

/// What sort of participant an agent is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    /// Automated executor
    AiWorker,
    /// Human executor, typically slower and costlier
    HumanWorker,
    /// Preference owner; sends feedback, does not execute tasks
    Stakeholder,
}

impl AgentKind {
    pub fn label(&self) -> &'static str {
        match self {
            AgentKind::AiWorker => "ai_worker",
            AgentKind::HumanWorker => "human_worker",
            AgentKind::Stakeholder => "stakeholder",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ── Agent Profile ────────────────────────────────────────────────────

/// Roster entry for one agent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique identifier
    pub id: AgentId,
    /// Display name
    pub name: String,
    /// Participant kind
    pub kind: AgentKind,
    /// Skills this agent claims, matched against task needs by the
    /// controller rather than enforced by the engine
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Whether the agent currently accepts assignments
    pub available: bool,
    /// Concurrent task limit
    pub max_concurrent_tasks: usize,
    /// Tasks currently assigned and not yet terminal
    #[serde(default)]
    pub current_task_ids: Vec<TaskId>,
    /// Lifetime completed-task counter
    #[serde(default)]
    pub tasks_completed: usize,
    /// Billing rate in currency units per simulated hour
    pub cost_per_hour: f64,
    /// Multiplier on nominal task duration; above 1.0 is faster
    pub speed_factor: f64,
}

impl AgentProfile {
    pub fn ai_worker(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::generate(),
            name: name.into(),
            kind: AgentKind::AiWorker,
            capabilities: Vec::new(),
            available: true,
            max_concurrent_tasks: 3,
            current_task_ids: Vec::new(),
            tasks_completed: 0,
            cost_per_hour: 10.0,
            speed_factor: 1.0,
        }
    }

    pub fn human_worker(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::generate(),
            name: name.into(),
            kind: AgentKind::HumanWorker,
            capabilities: Vec::new(),
            available: true,
            max_concurrent_tasks: 1,
            current_task_ids: Vec::new(),
            tasks_completed: 0,
            cost_per_hour: 80.0,
            speed_factor: 1.0,
        }
    }

    pub fn stakeholder(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::generate(),
            name: name.into(),
            kind: AgentKind::Stakeholder,
            capabilities: Vec::new(),
            available: true,
            max_concurrent_tasks: 0,
            current_task_ids: Vec::new(),
            tasks_completed: 0,
            cost_per_hour: 0.0,
            speed_factor: 1.0,
        }
    }

    pub fn with_id(mut self, id: AgentId) -> Self {
        self.id = id;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_cost_per_hour(mut self, rate: f64) -> Self {
        self.cost_per_hour = rate;
        self
    }

    pub fn with_speed_factor(mut self, factor: f64) -> Self {
        self.speed_factor = factor;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, limit: usize) -> Self {
        self.max_concurrent_tasks = limit;
        self
    }

    /// Whether this agent can take one more task right now
    pub fn has_capacity(&self) -> bool {
        self.available
            && self.kind != AgentKind::Stakeholder
            && self.current_task_ids.len() < self.max_concurrent_tasks
    }

    /// Comma-joined capabilities for observation summaries
    pub fn capability_summary(&self) -> String {
        if self.capabilities.is_empty() {
            "general".to_string()
        } else {
            self.capabilities.join(", ")
        }
    }
}

// ── Tool Telemetry ───────────────────────────────────────────────────

/// One tool invocation recorded by an executor while working a task.
/// Surfaced to evaluation criteria that inspect how outputs were produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolUseEvent {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub tool_name: String,
    pub succeeded: bool,
    pub at: DateTime<Utc>,
}

impl ToolUseEvent {
    pub fn new(agent_id: AgentId, task_id: TaskId, tool_name: impl Into<String>) -> Self {
        Self {
            agent_id,
            task_id,
            tool_name: tool_name.into(),
            succeeded: true,
            at: Utc::now(),
        }
    }

    pub fn failed(mut self) -> Self {
        self.succeeded = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ai_worker_defaults() {
        let agent = AgentProfile::ai_worker("coder-1");
        assert_eq!(agent.kind, AgentKind::AiWorker);
        assert!(agent.available);
        assert_eq!(agent.max_concurrent_tasks, 3);
        assert!(agent.has_capacity());
    }

    #[test]
    fn test_stakeholder_never_has_capacity() {
        let agent = AgentProfile::stakeholder("sponsor");
        assert!(!agent.has_capacity());
    }

    #[test]
    fn test_capacity_respects_limit_and_availability() {
        let mut agent = AgentProfile::human_worker("analyst").with_max_concurrent_tasks(1);
        assert!(agent.has_capacity());

        agent.current_task_ids.push(TaskId::new("t-1"));
        assert!(!agent.has_capacity());

        agent.current_task_ids.clear();
        agent.available = false;
        assert!(!agent.has_capacity());
    }

    #[test]
    fn test_capability_summary_fallback() {
        let agent = AgentProfile::ai_worker("gen");
        assert_eq!(agent.capability_summary(), "general");

        let agent = agent.with_capabilities(vec!["rust".into(), "sql".into()]);
        assert_eq!(agent.capability_summary(), "rust, sql");
    }
}
