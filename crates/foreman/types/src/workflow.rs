//! The workflow aggregate: flat arenas of tasks, agents, executions,
//! and resources plus the shared communication log
//!
//! # Key Concepts
//!
//! - Every entity lives in an id-keyed map on the workflow; cross
//!   references are ids, never embedded structs
//! - Composite structure and the dependency graph are traversed through
//!   those references by the `graph` module
//! - The workflow is plain serializable state, so snapshotting it is a
//!   clone and restoring it is a replacement

use crate::{
    AgentId, AgentProfile, Message, Resource, ResourceId, Task, TaskExecution, TaskId, TaskStatus,
    WorkflowError, WorkflowResult,
};
use crate::{ExecutionId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default RNG seed for workflows that do not pin one
pub const DEFAULT_WORKFLOW_SEED: u64 = 42;

// ── Workflow Identifier ──────────────────────────────────────────────

/// Unique identifier for a workflow
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
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

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow ─────────────────────────────────────────────────────────

/// Aggregate state for one simulated project
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier
    pub id: WorkflowId,
    /// Project name
    pub name: String,
    /// What the project is trying to achieve
    pub goal: String,
    /// The controller agent, once registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_agent_id: Option<AgentId>,
    /// The preference-owning stakeholder, once registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakeholder_agent_id: Option<AgentId>,
    /// Task arena
    #[serde(default)]
    pub tasks: HashMap<TaskId, Task>,
    /// Agent roster
    #[serde(default)]
    pub agents: HashMap<AgentId, AgentProfile>,
    /// Execution attempts
    #[serde(default)]
    pub executions: HashMap<ExecutionId, TaskExecution>,
    /// Artifact arena
    #[serde(default)]
    pub resources: HashMap<ResourceId, Resource>,
    /// Append-only communication log
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Standing constraints shown to the controller every tick
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Cost accumulated across all executions
    pub total_cost: f64,
    /// Simulated hours accumulated across all executions
    pub total_simulated_hours: f64,
    /// When the run started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// False once the run has terminated
    pub is_active: bool,
    /// Seed for all stochastic behavior tied to this workflow
    pub seed: u64,
}

impl Workflow {
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::generate(),
            name: name.into(),
            goal: goal.into(),
            manager_agent_id: None,
            stakeholder_agent_id: None,
            tasks: HashMap::new(),
            agents: HashMap::new(),
            executions: HashMap::new(),
            resources: HashMap::new(),
            messages: Vec::new(),
            constraints: Vec::new(),
            total_cost: 0.0,
            total_simulated_hours: 0.0,
            started_at: None,
            completed_at: None,
            is_active: true,
            seed: DEFAULT_WORKFLOW_SEED,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    // ── Arena Accessors ──────────────────────────────────────────────

    /// Insert a task, rejecting duplicate ids
    pub fn add_task(&mut self, task: Task) -> WorkflowResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(WorkflowError::DuplicateTaskId(task.id.clone()));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Register an agent, rejecting duplicate ids
    pub fn add_agent(&mut self, agent: AgentProfile) -> WorkflowResult<()> {
        if self.agents.contains_key(&agent.id) {
            return Err(WorkflowError::DuplicateAgentId(agent.id.clone()));
        }
        if agent.kind == crate::AgentKind::Stakeholder {
            self.stakeholder_agent_id = Some(agent.id.clone());
        }
        self.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    pub fn task(&self, id: &TaskId) -> WorkflowResult<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| WorkflowError::TaskNotFound(id.clone()))
    }

    pub fn task_mut(&mut self, id: &TaskId) -> WorkflowResult<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| WorkflowError::TaskNotFound(id.clone()))
    }

    pub fn agent(&self, id: &AgentId) -> WorkflowResult<&AgentProfile> {
        self.agents
            .get(id)
            .ok_or_else(|| WorkflowError::AgentNotFound(id.clone()))
    }

    pub fn agent_mut(&mut self, id: &AgentId) -> WorkflowResult<&mut AgentProfile> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| WorkflowError::AgentNotFound(id.clone()))
    }

    pub fn execution(&self, id: &ExecutionId) -> WorkflowResult<&TaskExecution> {
        self.executions
            .get(id)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(id.clone()))
    }

    pub fn execution_mut(&mut self, id: &ExecutionId) -> WorkflowResult<&mut TaskExecution> {
        self.executions
            .get_mut(id)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(id.clone()))
    }

    pub fn resource(&self, id: &ResourceId) -> WorkflowResult<&Resource> {
        self.resources
            .get(id)
            .ok_or_else(|| WorkflowError::ResourceNotFound(id.clone()))
    }

    // ── Derived Views ────────────────────────────────────────────────

    /// Ids of all atomic (leaf) tasks, sorted for determinism
    pub fn atomic_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.is_atomic())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The workflow is complete when every atomic task is Completed.
    /// An empty workflow is not complete.
    pub fn is_complete(&self) -> bool {
        let mut saw_atomic = false;
        for task in self.tasks.values() {
            if task.is_atomic() {
                saw_atomic = true;
                if task.status != TaskStatus::Completed {
                    return false;
                }
            }
        }
        saw_atomic
    }

    /// Whether any atomic task can still make progress
    pub fn has_live_work(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.is_atomic() && !t.status.is_terminal())
    }

    /// Counts of atomic tasks per status label, deterministically ordered
    pub fn task_status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for task in self.tasks.values().filter(|t| t.is_atomic()) {
            *counts.entry(task.status.label().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Fraction of atomic tasks completed, in `[0, 1]`
    pub fn progress(&self) -> f64 {
        let atomic: Vec<_> = self.tasks.values().filter(|t| t.is_atomic()).collect();
        if atomic.is_empty() {
            return 0.0;
        }
        let done = atomic
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        done as f64 / atomic.len() as f64
    }

    /// Worker agents with spare capacity, sorted by id
    pub fn available_agents(&self) -> Vec<&AgentProfile> {
        let mut agents: Vec<&AgentProfile> = self
            .agents
            .values()
            .filter(|a| a.has_capacity())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// All worker agents (anything that is not a stakeholder), sorted by id
    pub fn worker_agents(&self) -> Vec<&AgentProfile> {
        let mut agents: Vec<&AgentProfile> = self
            .agents
            .values()
            .filter(|a| a.kind != crate::AgentKind::Stakeholder)
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Messages visible to an agent, newest last
    pub fn inbox(&self, agent_id: &AgentId) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.is_visible_to(agent_id))
            .collect()
    }

    /// The `count` most recent messages on the log
    pub fn recent_messages(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Thread root and replies for a message id, in log order
    pub fn thread(&self, root: &MessageId) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.id == *root || m.thread_id.as_ref() == Some(root))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentKind;

    fn make_workflow() -> Workflow {
        Workflow::new("Launch prep", "Ship the Q3 launch")
    }

    fn add_atomic(wf: &mut Workflow, name: &str, status: TaskStatus) -> TaskId {
        let mut task = Task::new(name, "").with_id(TaskId::new(name));
        task.status = status;
        task.effective_status = status;
        let id = task.id.clone();
        wf.add_task(task).unwrap();
        id
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let mut wf = make_workflow();
        add_atomic(&mut wf, "a", TaskStatus::Pending);
        let dup = Task::new("a again", "").with_id(TaskId::new("a"));
        let result = wf.add_task(dup);
        assert!(matches!(result, Err(WorkflowError::DuplicateTaskId(_))));
    }

    #[test]
    fn test_missing_task_lookup_fails() {
        let wf = make_workflow();
        let result = wf.task(&TaskId::new("nope"));
        assert!(matches!(result, Err(WorkflowError::TaskNotFound(_))));
    }

    #[test]
    fn test_empty_workflow_is_not_complete() {
        let wf = make_workflow();
        assert!(!wf.is_complete());
        assert_eq!(wf.progress(), 0.0);
    }

    #[test]
    fn test_completion_ignores_composites() {
        let mut wf = make_workflow();
        let a = add_atomic(&mut wf, "a", TaskStatus::Completed);
        let b = add_atomic(&mut wf, "b", TaskStatus::Completed);

        let mut parent = Task::new("phase", "").with_id(TaskId::new("phase"));
        parent.subtask_ids = vec![a, b];
        parent.status = TaskStatus::Pending;
        wf.add_task(parent).unwrap();

        assert!(wf.is_complete());
        assert_eq!(wf.progress(), 1.0);
    }

    #[test]
    fn test_status_counts_only_atomic() {
        let mut wf = make_workflow();
        add_atomic(&mut wf, "a", TaskStatus::Completed);
        add_atomic(&mut wf, "b", TaskStatus::Running);
        add_atomic(&mut wf, "c", TaskStatus::Running);

        let counts = wf.task_status_counts();
        assert_eq!(counts.get("completed"), Some(&1));
        assert_eq!(counts.get("running"), Some(&2));
        assert_eq!(counts.get("pending"), None);
    }

    #[test]
    fn test_stakeholder_registration_sets_pointer() {
        let mut wf = make_workflow();
        let sponsor = AgentProfile::stakeholder("sponsor").with_id(AgentId::new("s-1"));
        wf.add_agent(sponsor).unwrap();
        assert_eq!(wf.stakeholder_agent_id, Some(AgentId::new("s-1")));
        assert_eq!(
            wf.agent(&AgentId::new("s-1")).unwrap().kind,
            AgentKind::Stakeholder
        );
    }

    #[test]
    fn test_available_agents_sorted_and_filtered() {
        let mut wf = make_workflow();
        wf.add_agent(AgentProfile::ai_worker("z").with_id(AgentId::new("z")))
            .unwrap();
        wf.add_agent(AgentProfile::ai_worker("a").with_id(AgentId::new("a")))
            .unwrap();
        let mut busy = AgentProfile::ai_worker("m").with_id(AgentId::new("m"));
        busy.available = false;
        wf.add_agent(busy).unwrap();

        let available = wf.available_agents();
        let ids: Vec<_> = available.iter().map(|a| a.id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    #[test]
    fn test_recent_messages_window() {
        let mut wf = make_workflow();
        for i in 0..5 {
            wf.messages.push(Message::broadcast(
                AgentId::new("mgr"),
                format!("msg {i}"),
                i,
            ));
        }
        let recent = wf.recent_messages(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "msg 3");
        assert_eq!(recent[1].content, "msg 4");

        assert_eq!(wf.recent_messages(100).len(), 5);
    }

    #[test]
    fn test_thread_collects_root_and_replies() {
        let mut wf = make_workflow();
        let root = Message::direct(AgentId::new("w1"), AgentId::new("mgr"), "format?", 1);
        let root_id = root.id.clone();
        wf.messages.push(root);
        wf.messages.push(
            Message::direct(AgentId::new("mgr"), AgentId::new("w1"), "markdown", 2)
                .with_thread(root_id.clone()),
        );
        wf.messages
            .push(Message::broadcast(AgentId::new("mgr"), "unrelated", 2));

        let thread = wf.thread(&root_id);
        assert_eq!(thread.len(), 2);
    }
}
