//! Named preference dimensions and their normalized weights

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Preference ───────────────────────────────────────────────────────

/// One named dimension the stakeholder cares about
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Preference {
    pub name: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Preference {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ── Preference Weights ───────────────────────────────────────────────

/// A snapshot of weights over every preference dimension
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PreferenceWeights {
    pub preferences: Vec<Preference>,
}

impl PreferenceWeights {
    pub fn new(preferences: Vec<Preference>) -> Self {
        Self { preferences }
    }

    /// A normalized copy: weights rescaled to sum to 1.0. When all
    /// weights are zero every dimension gets an equal share.
    pub fn normalize(&self) -> Self {
        let mut normalized = self.clone();
        let total: f64 = normalized.preferences.iter().map(|p| p.weight).sum();
        if total > 0.0 {
            for pref in &mut normalized.preferences {
                pref.weight /= total;
            }
        } else if !normalized.preferences.is_empty() {
            let equal = 1.0 / normalized.preferences.len() as f64;
            for pref in &mut normalized.preferences {
                pref.weight = equal;
            }
        }
        normalized
    }

    pub fn weight_of(&self, name: &str) -> Option<f64> {
        self.preferences
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.weight)
    }

    pub fn names(&self) -> Vec<&str> {
        self.preferences.iter().map(|p| p.name.as_str()).collect()
    }

    /// Name → weight map, deterministically ordered
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.preferences
            .iter()
            .map(|p| (p.name.clone(), p.weight))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.preferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
    }

    /// One line per dimension, for stakeholder profiles and logs
    pub fn summary(&self) -> String {
        self.preferences
            .iter()
            .map(|p| format!("{}: {:.3}", p.name, p.weight))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
