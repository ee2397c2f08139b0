//! The weight update algebra

use crate::{Preference, PreferenceError, PreferenceResult, PreferenceWeights};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Request Vocabulary ───────────────────────────────────────────────

/// How the change values are interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightUpdateMode {
    /// Add the value to the existing weight
    #[default]
    Delta,
    /// Multiply the existing weight by the value
    Multiplier,
    /// Set the weight to the value
    Absolute,
}

/// What to do when a change names a preference the snapshot lacks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Reject the whole request
    #[default]
    Error,
    /// Add the dimension at weight zero, then apply the change
    CreateZero,
    /// Drop the change silently
    Ignore,
}

/// How unspecified weights behave under `Absolute` updates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Redistribution {
    /// Unspecified weights keep their values; normalization rescales
    /// everything, so their pre-update ratios survive
    #[default]
    Proportional,
    /// Like proportional, except when the specified weights carry no
    /// mass at all: then every dimension gets an equal share
    Uniform,
}

// ── Update Request ───────────────────────────────────────────────────

/// A request to move the weights at a target timestep
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightUpdateRequest {
    /// Timestep the update applies at
    pub timestep: u64,
    /// Name → change value (delta, factor, or absolute weight)
    pub changes: BTreeMap<String, f64>,
    pub mode: WeightUpdateMode,
    /// Rescale the result to sum to 1.0
    pub normalize: bool,
    /// Floor negative results to zero before normalizing
    pub clamp_zero: bool,
    pub missing: MissingPolicy,
    pub redistribution: Redistribution,
}

impl WeightUpdateRequest {
    pub fn new(timestep: u64, mode: WeightUpdateMode, changes: BTreeMap<String, f64>) -> Self {
        Self {
            timestep,
            changes,
            mode,
            normalize: true,
            clamp_zero: true,
            missing: MissingPolicy::default(),
            redistribution: Redistribution::default(),
        }
    }

    pub fn delta(timestep: u64, changes: BTreeMap<String, f64>) -> Self {
        Self::new(timestep, WeightUpdateMode::Delta, changes)
    }

    pub fn multiplier(timestep: u64, changes: BTreeMap<String, f64>) -> Self {
        Self::new(timestep, WeightUpdateMode::Multiplier, changes)
    }

    pub fn absolute(timestep: u64, changes: BTreeMap<String, f64>) -> Self {
        Self::new(timestep, WeightUpdateMode::Absolute, changes)
    }

    pub fn with_missing(mut self, missing: MissingPolicy) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_redistribution(mut self, redistribution: Redistribution) -> Self {
        self.redistribution = redistribution;
        self
    }

    pub fn without_normalize(mut self) -> Self {
        self.normalize = false;
        self
    }

    pub fn without_clamp(mut self) -> Self {
        self.clamp_zero = false;
        self
    }

    /// Apply this request to a snapshot, producing the next snapshot
    pub fn apply_to(&self, current: &PreferenceWeights) -> PreferenceResult<PreferenceWeights> {
        let mut prefs: Vec<Preference> = current.preferences.clone();

        // Missing-name policy first, so later passes see a settled set
        for name in self.changes.keys() {
            if prefs.iter().any(|p| p.name == *name) {
                continue;
            }
            match self.missing {
                MissingPolicy::Error => {
                    return Err(PreferenceError::UnknownPreference(name.clone()));
                }
                MissingPolicy::CreateZero => prefs.push(Preference::new(name.clone(), 0.0)),
                MissingPolicy::Ignore => {}
            }
        }

        match self.mode {
            WeightUpdateMode::Delta => {
                for pref in &mut prefs {
                    if let Some(delta) = self.changes.get(&pref.name) {
                        pref.weight += delta;
                    }
                }
            }
            WeightUpdateMode::Multiplier => {
                for pref in &mut prefs {
                    if let Some(factor) = self.changes.get(&pref.name) {
                        pref.weight *= factor;
                    }
                }
            }
            WeightUpdateMode::Absolute => {
                let mut specified_mass = 0.0;
                let mut any_specified = false;
                for pref in &mut prefs {
                    if let Some(value) = self.changes.get(&pref.name) {
                        pref.weight = *value;
                        specified_mass += value.max(0.0);
                        any_specified = true;
                    }
                }
                let everyone_specified = prefs
                    .iter()
                    .all(|p| self.changes.contains_key(&p.name));
                if self.redistribution == Redistribution::Uniform
                    && !everyone_specified
                    && (!any_specified || specified_mass <= 0.0)
                {
                    let equal = 1.0 / prefs.len().max(1) as f64;
                    for pref in &mut prefs {
                        pref.weight = equal;
                    }
                }
                // Proportional: unspecified weights stay put and the
                // final normalization rebalances them
            }
        }

        if self.clamp_zero {
            for pref in &mut prefs {
                if pref.weight < 0.0 {
                    pref.weight = 0.0;
                }
            }
        }

        for pref in &prefs {
            if !pref.weight.is_finite() {
                return Err(PreferenceError::NonFiniteWeight(pref.name.clone()));
            }
        }

        let updated = PreferenceWeights::new(prefs);
        Ok(if self.normalize {
            updated.normalize()
        } else {
            updated
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_weights() -> PreferenceWeights {
        PreferenceWeights::new(vec![
            Preference::new("quality", 0.5),
            Preference::new("speed", 0.3),
            Preference::new("cost", 0.2),
        ])
    }

    fn changes(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn test_delta_adds_then_normalizes() {
        let request = WeightUpdateRequest::delta(1, changes(&[("speed", 0.2)]));
        let updated = request.apply_to(&base_weights()).unwrap();
        // raw weights 0.5, 0.5, 0.2 normalize to 5/12, 5/12, 2/12
        assert!((updated.weight_of("quality").unwrap() - 5.0 / 12.0).abs() < 1e-9);
        assert!((updated.weight_of("speed").unwrap() - 5.0 / 12.0).abs() < 1e-9);
        assert!((updated.weight_of("cost").unwrap() - 2.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_multiplier_scales_named_weight() {
        let request = WeightUpdateRequest::multiplier(1, changes(&[("quality", 2.0)]));
        let updated = request.apply_to(&base_weights()).unwrap();
        // raw 1.0, 0.3, 0.2 → quality gets 2/3
        assert!((updated.weight_of("quality").unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_absolute_proportional_keeps_unspecified_ratios() {
        let request = WeightUpdateRequest::absolute(1, changes(&[("quality", 0.8)]));
        let updated = request.apply_to(&base_weights()).unwrap();

        // speed and cost keep their 3:2 ratio inside the leftover mass
        let speed = updated.weight_of("speed").unwrap();
        let cost = updated.weight_of("cost").unwrap();
        assert!((speed / cost - 1.5).abs() < 1e-9);

        let total: f64 = updated.preferences.iter().map(|p| p.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_absolute_uniform_with_zero_specified_mass() {
        let request = WeightUpdateRequest::absolute(1, changes(&[("quality", 0.0)]))
            .with_redistribution(Redistribution::Uniform);
        let updated = request.apply_to(&base_weights()).unwrap();
        for pref in &updated.preferences {
            assert!((pref.weight - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_absolute_uniform_with_positive_mass_keeps_existing() {
        let request = WeightUpdateRequest::absolute(1, changes(&[("quality", 0.6)]))
            .with_redistribution(Redistribution::Uniform);
        let updated = request.apply_to(&base_weights()).unwrap();
        let speed = updated.weight_of("speed").unwrap();
        let cost = updated.weight_of("cost").unwrap();
        assert!((speed / cost - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_error_rejects_request() {
        let request = WeightUpdateRequest::delta(1, changes(&[("novelty", 0.1)]));
        let result = request.apply_to(&base_weights());
        assert!(matches!(
            result,
            Err(PreferenceError::UnknownPreference(name)) if name == "novelty"
        ));
    }

    #[test]
    fn test_missing_create_zero_adds_dimension() {
        let request = WeightUpdateRequest::delta(1, changes(&[("novelty", 0.5)]))
            .with_missing(MissingPolicy::CreateZero);
        let updated = request.apply_to(&base_weights()).unwrap();
        assert!(updated.weight_of("novelty").is_some());
        assert_eq!(updated.len(), 4);
    }

    #[test]
    fn test_missing_ignore_drops_change() {
        let request = WeightUpdateRequest::delta(1, changes(&[("novelty", 0.5)]))
            .with_missing(MissingPolicy::Ignore);
        let updated = request.apply_to(&base_weights()).unwrap();
        assert!(updated.weight_of("novelty").is_none());
        assert_eq!(updated.len(), 3);
    }

    #[test]
    fn test_clamp_zero_floors_negatives() {
        let request = WeightUpdateRequest::delta(1, changes(&[("cost", -0.9)]));
        let updated = request.apply_to(&base_weights()).unwrap();
        assert_eq!(updated.weight_of("cost"), Some(0.0));
    }

    #[test]
    fn test_without_clamp_keeps_negative_before_normalize() {
        let request = WeightUpdateRequest::delta(1, changes(&[("cost", -0.9)]))
            .without_clamp()
            .without_normalize();
        let updated = request.apply_to(&base_weights()).unwrap();
        assert!((updated.weight_of("cost").unwrap() + 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_rejected() {
        let request = WeightUpdateRequest::multiplier(1, changes(&[("cost", f64::INFINITY)]));
        let result = request.apply_to(&base_weights());
        assert!(matches!(result, Err(PreferenceError::NonFiniteWeight(_))));
    }
}
