//! Preference-related errors

use foreman_comms::CommsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Unknown preference name in weight update: {0}")]
    UnknownPreference(String),

    #[error("Weight update produced a non-finite weight for: {0}")]
    NonFiniteWeight(String),

    #[error("Communication error: {0}")]
    Comms(#[from] CommsError),
}

pub type PreferenceResult<T> = Result<T, PreferenceError>;
