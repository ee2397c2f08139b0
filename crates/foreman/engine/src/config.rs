//! Engine tuning knobs

use foreman_evaluation::EvaluationConfig;
use foreman_types::{DEFAULT_ACTION_BUFFER_CAPACITY, DEFAULT_WORKFLOW_SEED};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of timesteps before a run is forced to a close
pub const DEFAULT_MAX_TIMESTEPS: u64 = 50;

/// Default ceiling on how long one tick waits for in-flight executions
pub const DEFAULT_BARRIER_TIMEOUT_SECS: u64 = 300;

/// Configuration for a simulation run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Horizon: the run ends after this many ticks even if work remains
    pub max_timesteps: u64,
    /// Seconds the execution barrier waits before giving up on stragglers
    pub barrier_timeout_secs: u64,
    /// Evaluation pool settings
    pub evaluation: EvaluationConfig,
    /// How many action records the rolling buffer retains
    pub action_buffer_capacity: usize,
    /// Messages surfaced per observation
    pub observation_message_window: usize,
    /// Action records surfaced per observation
    pub observation_action_window: usize,
    /// Seed for deterministic simulated behavior
    pub seed: u64,
    /// Where run artifacts land; `None` disables file output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_timesteps: DEFAULT_MAX_TIMESTEPS,
            barrier_timeout_secs: DEFAULT_BARRIER_TIMEOUT_SECS,
            evaluation: EvaluationConfig::default(),
            action_buffer_capacity: DEFAULT_ACTION_BUFFER_CAPACITY,
            observation_message_window: 10,
            observation_action_window: 5,
            seed: DEFAULT_WORKFLOW_SEED,
            output_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_timesteps(mut self, max_timesteps: u64) -> Self {
        self.max_timesteps = max_timesteps;
        self
    }

    pub fn with_barrier_timeout_secs(mut self, secs: u64) -> Self {
        self.barrier_timeout_secs = secs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.barrier_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_a_full_run() {
        let config = EngineConfig::default();
        assert_eq!(config.max_timesteps, DEFAULT_MAX_TIMESTEPS);
        assert_eq!(config.barrier_timeout(), Duration::from_secs(300));
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_builders_chain() {
        let config = EngineConfig::default()
            .with_max_timesteps(10)
            .with_seed(7)
            .with_output_dir("/tmp/run");
        assert_eq!(config.max_timesteps, 10);
        assert_eq!(config.seed, 7);
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/run")));
    }
}
