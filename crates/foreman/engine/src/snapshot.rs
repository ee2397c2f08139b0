//! Point-in-time run snapshots
//!
//! A snapshot is whole-state replacement, captured only at tick
//! boundaries where nothing is in flight. Restoring one onto a freshly
//! built engine resumes the run; the restored engine may carry a
//! different evaluation suite, which is how counterfactual re-scoring of
//! a saved run works.

use crate::EngineResult;
use chrono::{DateTime, Utc};
use foreman_comms::EndRequest;
use foreman_preferences::PreferenceTimeline;
use foreman_types::{ActionRecord, Message, RunState, Workflow};
use serde::{Deserialize, Serialize};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume a run from a tick boundary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Format version, for forward-compatibility checks on load
    pub version: u32,
    pub captured_at: DateTime<Utc>,
    pub timestep: u64,
    pub run_state: RunState,
    pub seed: u64,
    pub workflow: Workflow,
    /// Full communication log at capture time
    pub messages: Vec<Message>,
    /// Pending end-of-run request, re-raised on restore
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_request: Option<EndRequest>,
    /// Rolling action history, oldest first
    pub action_records: Vec<ActionRecord>,
    pub action_capacity: usize,
    /// Stakeholder preference timeline, when the run had a stakeholder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference_timeline: Option<PreferenceTimeline>,
}

impl RunSnapshot {
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            tracing::warn!(
                found = snapshot.version,
                expected = SNAPSHOT_VERSION,
                "snapshot version mismatch, attempting restore anyway"
            );
        }
        Ok(snapshot)
    }
}
