//! Error types for the workload model layer

use crate::{AgentId, ExecutionId, ResourceId, TaskId};

/// Errors that can occur in workflow and task-graph operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Duplicate task ID: {0}")]
    DuplicateTaskId(TaskId),

    #[error("Duplicate agent ID: {0}")]
    DuplicateAgentId(AgentId),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Task cannot depend on itself: {0}")]
    SelfDependency(TaskId),

    #[error("Dependency cycle detected among tasks: {0:?}")]
    DependencyCycle(Vec<TaskId>),

    #[error("Workflow validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
