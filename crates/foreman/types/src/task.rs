//! Task records: the nodes of the dependency-graphed workload
//!
//! Tasks live in a flat arena keyed by id on the workflow. Parent/child
//! structure is expressed through `parent_id`/`subtask_ids` references; a
//! task with subtasks is composite and is never scheduled directly.

use crate::{AgentId, ExecutionId, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker prefixing controller-issued instructions in a task's notes.
/// A refine action replaces an existing marked note instead of appending.
pub const MANAGER_INSTRUCTIONS_MARKER: &str = "MANAGER_INSTRUCTIONS:";

// ── Task Identifier ──────────────────────────────────────────────────

/// Unique identifier for a task
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
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

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Task Status ──────────────────────────────────────────────────────

/// Execution status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but dependencies not yet satisfied
    Pending,
    /// All dependencies satisfied; eligible to start
    Ready,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Stable lowercase label used in counts and serialized summaries
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ── Variant Output Selection ─────────────────────────────────────────

/// Which variants' output resources propagate to the task after ranking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSelection {
    /// Every successful variant's resources
    All,
    /// Rank 1 only
    Best,
    /// Ranks 1..=k
    TopK { k: usize },
}

impl Default for OutputSelection {
    fn default() -> Self {
        OutputSelection::All
    }
}

// ── Task ─────────────────────────────────────────────────────────────

/// A task in the workload graph
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,
    /// Clear, descriptive task name
    pub name: String,
    /// Detailed description and objectives
    pub description: String,
    /// Execution status
    pub status: TaskStatus,
    /// Derived status aggregated over descendant leaves; equals `status`
    /// for atomic tasks. Recomputed by graph traversal after state changes.
    pub effective_status: TaskStatus,
    /// Tasks that must complete before this one
    #[serde(default)]
    pub dependency_task_ids: Vec<TaskId>,
    /// Parent task if this is a subtask
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// Ordered child tasks; non-empty makes this task composite
    #[serde(default)]
    pub subtask_ids: Vec<TaskId>,
    /// Agents assigned by the controller; more than one starts a
    /// multi-variant execution
    #[serde(default)]
    pub assigned_agent_ids: Vec<AgentId>,
    /// Execution attempts recorded for this task
    #[serde(default)]
    pub execution_ids: Vec<ExecutionId>,
    /// Required input artifacts
    #[serde(default)]
    pub input_resource_ids: Vec<ResourceId>,
    /// Artifacts produced by (selected) executions
    #[serde(default)]
    pub output_resource_ids: Vec<ResourceId>,
    /// Free-form execution notes and controller instructions
    #[serde(default)]
    pub execution_notes: Vec<String>,
    /// How variant outputs are selected after ranking
    #[serde(default)]
    pub output_selection: OutputSelection,
    /// Names of evaluators used to rank variant outputs on completion
    #[serde(default)]
    pub completion_evaluator_names: Vec<String>,
    /// Estimated duration in hours
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_hours: Option<f64>,
    /// Actual duration in hours, as reported by the executing agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_hours: Option<f64>,
    /// Estimated cost in currency units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    /// Actual cost in currency units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
    /// When all dependencies first became satisfied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deps_ready_at: Option<DateTime<Utc>>,
    /// When execution started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            name: name.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            effective_status: TaskStatus::Pending,
            dependency_task_ids: Vec::new(),
            parent_id: None,
            subtask_ids: Vec::new(),
            assigned_agent_ids: Vec::new(),
            execution_ids: Vec::new(),
            input_resource_ids: Vec::new(),
            output_resource_ids: Vec::new(),
            execution_notes: Vec::new(),
            output_selection: OutputSelection::default(),
            completion_evaluator_names: Vec::new(),
            estimated_duration_hours: None,
            actual_duration_hours: None,
            estimated_cost: None,
            actual_cost: None,
            deps_ready_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependency_task_ids = deps;
        self
    }

    pub fn with_estimated_duration(mut self, hours: f64) -> Self {
        self.estimated_duration_hours = Some(hours);
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }

    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_assigned_agent(mut self, agent: AgentId) -> Self {
        self.assigned_agent_ids.push(agent);
        self
    }

    pub fn with_output_selection(mut self, selection: OutputSelection) -> Self {
        self.output_selection = selection;
        self
    }

    pub fn with_completion_evaluators(mut self, names: Vec<String>) -> Self {
        self.completion_evaluator_names = names;
        self
    }

    pub fn with_input_resources(mut self, ids: Vec<ResourceId>) -> Self {
        self.input_resource_ids = ids;
        self
    }

    /// A task with no subtasks; the only kind that is directly scheduled
    pub fn is_atomic(&self) -> bool {
        self.subtask_ids.is_empty()
    }

    /// A task whose status is derived from its descendant leaves
    pub fn is_composite(&self) -> bool {
        !self.subtask_ids.is_empty()
    }

    /// Whether this task will run as several concurrent variants
    pub fn is_multi_variant(&self) -> bool {
        self.assigned_agent_ids.len() > 1
    }

    /// Append a free-form execution note
    pub fn add_note(&mut self, note: impl Into<String>) {
        self.execution_notes.push(note.into());
    }

    /// Set or replace the controller-instructions note
    pub fn set_manager_instructions(&mut self, instructions: &str) {
        let note = format!("{} {}", MANAGER_INSTRUCTIONS_MARKER, instructions);
        match self
            .execution_notes
            .iter_mut()
            .find(|n| n.contains(MANAGER_INSTRUCTIONS_MARKER))
        {
            Some(existing) => *existing = note,
            None => self.execution_notes.push(note),
        }
    }

    /// Seconds between dependency satisfaction and actual start.
    /// Returns 0.0 when either timestamp is unset or the delta is negative.
    pub fn coordination_deadtime_seconds(&self) -> f64 {
        match (self.deps_ready_at, self.started_at) {
            (Some(ready), Some(started)) => {
                let millis = (started - ready).num_milliseconds();
                (millis as f64 / 1000.0).max(0.0)
            }
            _ => 0.0,
        }
    }

    /// One-line human summary used by inspection actions
    pub fn summary_line(&self) -> String {
        format!(
            "{} [{}] deps={} assigned={} outputs={}",
            self.name,
            self.status,
            self.dependency_task_ids.len(),
            self.assigned_agent_ids.len(),
            self.output_resource_ids.len()
        )
    }
}
