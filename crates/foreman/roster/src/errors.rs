//! Roster-related errors

use foreman_types::AgentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Agent not found in roster: {0}")]
    AgentNotFound(AgentId),

    #[error("Changes for timestep {0} were already applied")]
    TimestepAlreadyApplied(u64),
}

pub type RosterResult<T> = Result<T, RosterError>;
