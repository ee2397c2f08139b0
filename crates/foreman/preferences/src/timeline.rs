//! The step-function timeline of preference snapshots

use crate::{PreferenceResult, PreferenceWeights, WeightUpdateRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Change Events ────────────────────────────────────────────────────

/// Record of one applied weight update. History is append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreferenceChange {
    pub timestep: u64,
    pub previous_weights: BTreeMap<String, f64>,
    pub new_weights: BTreeMap<String, f64>,
}

// ── Timeline ─────────────────────────────────────────────────────────

/// Timestep-indexed snapshots. Lookups resolve to the latest snapshot at
/// or before the queried timestep; the snapshot at 0 always exists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreferenceTimeline {
    snapshots: BTreeMap<u64, PreferenceWeights>,
    history: Vec<PreferenceChange>,
}

impl PreferenceTimeline {
    /// Start a timeline with normalized initial weights at timestep 0
    pub fn new(initial: PreferenceWeights) -> Self {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(0, initial.normalize());
        Self {
            snapshots,
            history: Vec::new(),
        }
    }

    /// The snapshot in effect at `timestep`
    pub fn get_for_timestep(&self, timestep: u64) -> &PreferenceWeights {
        self.snapshots
            .range(..=timestep)
            .next_back()
            .map(|(_, weights)| weights)
            .unwrap_or_else(|| &self.snapshots[&0])
    }

    /// Apply an update request against the snapshot in effect at its
    /// timestep, store the result, and append a change event
    pub fn apply(&mut self, request: &WeightUpdateRequest) -> PreferenceResult<PreferenceChange> {
        let current = self.get_for_timestep(request.timestep).clone();
        let updated = request.apply_to(&current)?.normalize();

        let change = PreferenceChange {
            timestep: request.timestep,
            previous_weights: current.as_map(),
            new_weights: updated.as_map(),
        };
        tracing::info!(
            timestep = request.timestep,
            weights = %updated.summary(),
            "preference weights updated"
        );
        self.snapshots.insert(request.timestep, updated);
        self.history.push(change.clone());
        Ok(change)
    }

    /// Every applied change, oldest first
    pub fn history(&self) -> &[PreferenceChange] {
        &self.history
    }

    /// Timesteps that carry a snapshot, ascending
    pub fn snapshot_timesteps(&self) -> Vec<u64> {
        self.snapshots.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Preference;
    use std::collections::BTreeMap;

    fn make_timeline() -> PreferenceTimeline {
        PreferenceTimeline::new(PreferenceWeights::new(vec![
            Preference::new("quality", 3.0),
            Preference::new("speed", 2.0),
        ]))
    }

    fn delta(timestep: u64, name: &str, value: f64) -> WeightUpdateRequest {
        let mut changes = BTreeMap::new();
        changes.insert(name.to_string(), value);
        WeightUpdateRequest::delta(timestep, changes)
    }

    #[test]
    fn test_initial_snapshot_is_normalized() {
        let timeline = make_timeline();
        let weights = timeline.get_for_timestep(0);
        assert!((weights.weight_of("quality").unwrap() - 0.6).abs() < 1e-9);
        assert!((weights.weight_of("speed").unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_is_a_step_function() {
        let mut timeline = make_timeline();
        timeline.apply(&delta(5, "speed", 1.0)).unwrap();

        let before = timeline.get_for_timestep(4);
        assert!((before.weight_of("quality").unwrap() - 0.6).abs() < 1e-9);

        let at = timeline.get_for_timestep(5);
        let after = timeline.get_for_timestep(40);
        assert!((at.weight_of("speed").unwrap() - after.weight_of("speed").unwrap()).abs() < 1e-12);
        assert!(at.weight_of("speed").unwrap() > 0.4);
    }

    #[test]
    fn test_apply_records_history() {
        let mut timeline = make_timeline();
        let change = timeline.apply(&delta(3, "quality", 0.5)).unwrap();

        assert_eq!(change.timestep, 3);
        assert!((change.previous_weights["quality"] - 0.6).abs() < 1e-9);
        assert!(change.new_weights["quality"] > 0.6);
        assert_eq!(timeline.history().len(), 1);
        assert_eq!(timeline.snapshot_timesteps(), vec![0, 3]);
    }

    #[test]
    fn test_failed_apply_leaves_timeline_untouched() {
        let mut timeline = make_timeline();
        let result = timeline.apply(&delta(2, "ghost", 0.5));
        assert!(result.is_err());
        assert!(timeline.history().is_empty());
        assert_eq!(timeline.snapshot_timesteps(), vec![0]);
    }

    #[test]
    fn test_updates_compound_in_order() {
        let mut timeline = make_timeline();
        timeline.apply(&delta(2, "speed", 1.0)).unwrap();
        timeline.apply(&delta(6, "speed", 1.0)).unwrap();

        let w2 = timeline.get_for_timestep(2).weight_of("speed").unwrap();
        let w6 = timeline.get_for_timestep(6).weight_of("speed").unwrap();
        assert!(w6 > w2);
        assert_eq!(timeline.history().len(), 2);
    }
}
