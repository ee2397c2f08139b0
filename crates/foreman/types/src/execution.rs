//! Execution attempts: one record per agent working a task variant

use crate::{AgentId, ResourceDraft, ResourceId, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Execution Identifier ─────────────────────────────────────────────

/// Unique identifier for an execution attempt
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
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

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Task Execution ───────────────────────────────────────────────────

/// One attempt at a task by one agent. A multi-variant assignment
/// produces several executions with distinct `variant_index` values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Unique identifier
    pub id: ExecutionId,
    /// Task being executed
    pub task_id: TaskId,
    /// Agent doing the work
    pub agent_id: AgentId,
    /// Position within the variant group, 0-based
    pub variant_index: usize,
    /// Execution status; terminal once Completed or Failed
    pub status: TaskStatus,
    /// When the attempt started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the attempt finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Artifacts produced by this attempt
    #[serde(default)]
    pub output_resource_ids: Vec<ResourceId>,
    /// Per-evaluator scores recorded during variant ranking
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub evaluation_scores: HashMap<String, f64>,
    /// Mean of `evaluation_scores`, set when ranking runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_score: Option<f64>,
    /// 1-based rank among sibling variants, best first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Failure detail when status is Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Simulated hours the attempt took
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_hours: Option<f64>,
    /// Cost incurred by the attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
}

impl TaskExecution {
    /// Create a running execution for an agent/task pair
    pub fn start(task_id: TaskId, agent_id: AgentId, variant_index: usize) -> Self {
        Self {
            id: ExecutionId::generate(),
            task_id,
            agent_id,
            variant_index,
            status: TaskStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            output_resource_ids: Vec::new(),
            evaluation_scores: HashMap::new(),
            aggregate_score: None,
            rank: None,
            error_message: None,
            actual_duration_hours: None,
            actual_cost: None,
        }
    }

    /// Record a successful outcome
    pub fn complete(&mut self, cost: f64, duration_hours: f64) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.actual_cost = Some(cost);
        self.actual_duration_hours = Some(duration_hours);
    }

    /// Record a failed outcome
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

// ── Task Outcome ─────────────────────────────────────────────────────

/// What a worker agent hands back when its attempt finishes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Whether the attempt succeeded
    pub success: bool,
    /// Artifacts to materialize into the workflow resource arena
    #[serde(default)]
    pub resources: Vec<ResourceDraft>,
    /// Cost incurred
    pub cost: f64,
    /// Simulated hours spent
    pub duration_hours: f64,
    /// Failure detail when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskOutcome {
    pub fn success(resources: Vec<ResourceDraft>, cost: f64, duration_hours: f64) -> Self {
        Self {
            success: true,
            resources,
            cost,
            duration_hours,
            error_message: None,
        }
    }

    pub fn failure(error: impl Into<String>, cost: f64, duration_hours: f64) -> Self {
        Self {
            success: false,
            resources: Vec::new(),
            cost,
            duration_hours,
            error_message: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_execution() -> TaskExecution {
        TaskExecution::start(TaskId::new("t-1"), AgentId::new("a-1"), 0)
    }

    #[test]
    fn test_start_is_running() {
        let exec = make_execution();
        assert_eq!(exec.status, TaskStatus::Running);
        assert!(exec.started_at.is_some());
        assert!(exec.completed_at.is_none());
        assert!(!exec.is_success());
    }

    #[test]
    fn test_complete_records_cost_and_duration() {
        let mut exec = make_execution();
        exec.complete(45.0, 1.5);
        assert!(exec.is_success());
        assert_eq!(exec.actual_cost, Some(45.0));
        assert_eq!(exec.actual_duration_hours, Some(1.5));
        assert!(exec.completed_at.is_some());
    }

    #[test]
    fn test_fail_records_error() {
        let mut exec = make_execution();
        exec.fail("tool crashed");
        assert_eq!(exec.status, TaskStatus::Failed);
        assert_eq!(exec.error_message.as_deref(), Some("tool crashed"));
        assert!(!exec.is_success());
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = TaskOutcome::success(Vec::new(), 10.0, 0.5);
        assert!(ok.success);
        assert!(ok.error_message.is_none());

        let bad = TaskOutcome::failure("timeout", 2.0, 0.1);
        assert!(!bad.success);
        assert_eq!(bad.error_message.as_deref(), Some("timeout"));
        assert!(bad.resources.is_empty());
    }
}
