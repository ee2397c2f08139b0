//! Run lifecycle states for a simulation

use serde::{Deserialize, Serialize};

/// Where a simulation run is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Constructed, not yet ticked
    Initialized,
    /// Ticking normally
    Running,
    /// Mid-tick: controller policy is being consulted
    WaitingForManager,
    /// Mid-tick: agents are executing the step barrier
    ExecutingTasks,
    /// All work finished and terminal evaluation ran
    Completed,
    /// Run ended by error or exhausted horizon with failed work
    Failed,
    /// Run ended early by request
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunState::Initialized => "initialized",
            RunState::Running => "running",
            RunState::WaitingForManager => "waiting_for_manager",
            RunState::ExecutingTasks => "executing_tasks",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::WaitingForManager.is_terminal());
    }

    #[test]
    fn test_labels_round_trip_serde() {
        let json = serde_json::to_string(&RunState::ExecutingTasks).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunState::ExecutingTasks);
    }
}
