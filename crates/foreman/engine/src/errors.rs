//! Error types for the simulation engine

use foreman_comms::CommsError;
use foreman_evaluation::EvaluationError;
use foreman_types::{RunState, WorkflowError};

/// Errors that can occur while constructing or driving a run
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Workflow graph is invalid: {0}")]
    InvalidGraph(WorkflowError),

    #[error("Run is already terminal: {0}")]
    RunTerminal(RunState),

    #[error("Cannot snapshot while {0} executions are in flight")]
    InFlightWork(usize),

    #[error("Evaluation suite is invalid: {0}")]
    InvalidSuite(#[from] EvaluationError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Communication error: {0}")]
    Comms(#[from] CommsError),

    #[error("Snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Recorder I/O error: {0}")]
    Recorder(#[from] std::io::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
