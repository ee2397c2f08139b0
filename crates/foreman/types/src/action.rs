//! Controller actions and their outcomes
//!
//! # Key Concepts
//!
//! - `ActionKind` is the closed set of moves a controller policy can
//!   make in one timestep; the engine interprets them, policies only
//!   construct them
//! - Every applied action yields an `ActionOutcome`; outcomes land in a
//!   bounded `ActionBuffer` the policy sees on its next turn

use crate::{AgentId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default capacity of the recent-action ring buffer
pub const DEFAULT_ACTION_BUFFER_CAPACITY: usize = 50;

// ── Action Kind ──────────────────────────────────────────────────────

/// Subtask blueprint used by `ActionKind::DecomposeTask`. Dependencies
/// reference sibling positions in the same spec list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    /// Indices of sibling specs this subtask depends on
    #[serde(default)]
    pub dependency_indices: Vec<usize>,
}

impl SubtaskSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            estimated_duration_hours: None,
            estimated_cost: None,
            dependency_indices: Vec::new(),
        }
    }

    pub fn with_dependency_indices(mut self, indices: Vec<usize>) -> Self {
        self.dependency_indices = indices;
        self
    }
}

/// Every move available to a controller policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Assign one task to one agent
    AssignTask { task_id: TaskId, agent_id: AgentId },
    /// Assign every unassigned, non-terminal task; when no agent is
    /// given, the first available agent (by id) takes them all
    AssignAllPendingTasks {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },
    /// Add a new pending task to the graph
    CreateTask {
        name: String,
        description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_duration_hours: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_cost: Option<f64>,
        #[serde(default)]
        dependency_task_ids: Vec<TaskId>,
    },
    /// Delete a task from the graph
    RemoveTask { task_id: TaskId },
    /// Update task fields and leave instructions for the executor
    RefineTask {
        task_id: TaskId,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_estimated_duration_hours: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_estimated_cost: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        additional_instructions: Option<String>,
    },
    /// Add an edge: `dependent` waits for `prerequisite`
    AddTaskDependency {
        prerequisite_task_id: TaskId,
        dependent_task_id: TaskId,
    },
    /// Remove a dependency edge if present
    RemoveTaskDependency {
        prerequisite_task_id: TaskId,
        dependent_task_id: TaskId,
    },
    /// Replace a task's direct work with explicit subtasks
    DecomposeTask {
        task_id: TaskId,
        subtasks: Vec<SubtaskSpec>,
    },
    /// Read-only detail dump of one task
    InspectTask { task_id: TaskId },
    /// Message an agent, or everyone when no recipient is given
    SendMessage {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient_id: Option<AgentId>,
    },
    /// Summary counts and progress
    GetWorkflowStatus,
    /// Roster entries with spare capacity
    GetAvailableAgents,
    /// Tasks not yet assigned or finished
    GetPendingTasks,
    /// Spend the timestep doing nothing
    NoOp,
    /// Ask the engine to wind the run down at the next boundary
    RequestEndWorkflow {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Emitted by policies when they could not produce a valid action
    Failed { reason: String },
}

impl ActionKind {
    /// Stable label for logs and outcome records
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::AssignTask { .. } => "assign_task",
            ActionKind::AssignAllPendingTasks { .. } => "assign_all_pending_tasks",
            ActionKind::CreateTask { .. } => "create_task",
            ActionKind::RemoveTask { .. } => "remove_task",
            ActionKind::RefineTask { .. } => "refine_task",
            ActionKind::AddTaskDependency { .. } => "add_task_dependency",
            ActionKind::RemoveTaskDependency { .. } => "remove_task_dependency",
            ActionKind::DecomposeTask { .. } => "decompose_task",
            ActionKind::InspectTask { .. } => "inspect_task",
            ActionKind::SendMessage { .. } => "send_message",
            ActionKind::GetWorkflowStatus => "get_workflow_status",
            ActionKind::GetAvailableAgents => "get_available_agents",
            ActionKind::GetPendingTasks => "get_pending_tasks",
            ActionKind::NoOp => "noop",
            ActionKind::RequestEndWorkflow { .. } => "request_end_workflow",
            ActionKind::Failed { .. } => "failed",
        }
    }
}

// ── Manager Action ───────────────────────────────────────────────────

/// A policy decision: the move plus the policy's stated rationale
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerAction {
    /// Why the policy chose this move
    pub reasoning: String,
    /// The move itself
    pub kind: ActionKind,
}

impl ManagerAction {
    pub fn new(reasoning: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            reasoning: reasoning.into(),
            kind,
        }
    }

    pub fn noop(reasoning: impl Into<String>) -> Self {
        Self::new(reasoning, ActionKind::NoOp)
    }
}

// ── Action Outcome ───────────────────────────────────────────────────

/// What category of effect an applied action had
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Workflow state changed
    Mutation,
    /// Read-only answer returned
    Info,
    /// A message was posted
    Message,
    /// Task detail returned
    Inspection,
    /// Nothing happened on purpose
    Noop,
    /// The action could not be applied
    FailedAction,
}

/// Result of applying one action at one timestep
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Label of the action kind that produced this outcome
    pub action_type: String,
    /// Category of effect
    pub kind: OutcomeKind,
    /// One-line human summary
    pub summary: String,
    /// Structured payload for the policy to read
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    /// Timestep the action was applied at
    pub timestep: u64,
    /// False for `FailedAction` outcomes
    pub success: bool,
}

impl ActionOutcome {
    pub fn mutation(action: &ActionKind, summary: impl Into<String>, timestep: u64) -> Self {
        Self::build(action, OutcomeKind::Mutation, summary, timestep, true)
    }

    pub fn info(action: &ActionKind, summary: impl Into<String>, timestep: u64) -> Self {
        Self::build(action, OutcomeKind::Info, summary, timestep, true)
    }

    pub fn message(action: &ActionKind, summary: impl Into<String>, timestep: u64) -> Self {
        Self::build(action, OutcomeKind::Message, summary, timestep, true)
    }

    pub fn inspection(action: &ActionKind, summary: impl Into<String>, timestep: u64) -> Self {
        Self::build(action, OutcomeKind::Inspection, summary, timestep, true)
    }

    pub fn noop(action: &ActionKind, summary: impl Into<String>, timestep: u64) -> Self {
        Self::build(action, OutcomeKind::Noop, summary, timestep, true)
    }

    pub fn failed(action: &ActionKind, summary: impl Into<String>, timestep: u64) -> Self {
        Self::build(action, OutcomeKind::FailedAction, summary, timestep, false)
    }

    fn build(
        action: &ActionKind,
        kind: OutcomeKind,
        summary: impl Into<String>,
        timestep: u64,
        success: bool,
    ) -> Self {
        Self {
            action_type: action.label().to_string(),
            kind,
            summary: summary.into(),
            data: serde_json::Value::Null,
            timestep,
            success,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

// ── Action History ───────────────────────────────────────────────────

/// One applied action with its outcome, as shown back to the policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestep: u64,
    pub action: ManagerAction,
    pub outcome: ActionOutcome,
}

/// Bounded ring of recent action records; old entries fall off the front
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionBuffer {
    records: VecDeque<ActionRecord>,
    capacity: usize,
}

impl Default for ActionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_BUFFER_CAPACITY)
    }
}

impl ActionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, evicting the oldest when at capacity
    pub fn push(&mut self, record: ActionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// The `count` most recent records, oldest first
    pub fn recent(&self, count: usize) -> Vec<&ActionRecord> {
        let start = self.records.len().saturating_sub(count);
        self.records.iter().skip(start).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
