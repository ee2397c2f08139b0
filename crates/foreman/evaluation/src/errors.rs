//! Evaluation-related errors

use foreman_comms::CommsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Judge backend failed: {0}")]
    Judge(String),

    #[error("Staged rubric '{category}' allocates {allocated} stage points over its max total {max_total}")]
    StageBudgetExceeded {
        category: String,
        allocated: f64,
        max_total: f64,
    },

    #[error("Staged rubric '{0}' has no stages")]
    NoStages(String),

    #[error("Stage '{stage}' of '{category}' has no rules")]
    EmptyStage { category: String, stage: String },

    #[error("Stage '{stage}' of '{category}' needs positive max points, got {max_points}")]
    InvalidStagePoints {
        category: String,
        stage: String,
        max_points: f64,
    },

    #[error("Criterion '{criterion}' needs a positive max score, got {max_score}")]
    InvalidMaxScore { criterion: String, max_score: f64 },

    #[error("Rubric '{rubric}' gates on unknown criterion '{gate}'")]
    UnknownGateCriterion { rubric: String, gate: String },

    #[error("Communication error: {0}")]
    Comms(#[from] CommsError),
}

pub type EvaluationResult<T> = Result<T, EvaluationError>;
