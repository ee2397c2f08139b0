//! Per-tick evaluation snapshots and how they fold into a reward signal

use crate::{RubricReport, RunCondition, StagedOutcome};
use chrono::{DateTime, Utc};
use foreman_types::WorkflowId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Preference Score ─────────────────────────────────────────────────

/// One preference dimension's aggregate for a tick
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreferenceScore {
    pub name: String,
    /// Normalized aggregate of the bound rubric, in [0, 1]
    pub score: f64,
    /// The weight applied at this timestep
    pub weight: f64,
    pub report: RubricReport,
}

// ── Snapshot ─────────────────────────────────────────────────────────

/// Everything evaluation produced for one tick
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    pub workflow_id: WorkflowId,
    pub timestep: u64,
    pub timestamp: DateTime<Utc>,
    pub cadence: RunCondition,
    pub preference_scores: BTreeMap<String, PreferenceScore>,
    /// The weight vector in force when this evaluation ran
    pub applied_weights: BTreeMap<String, f64>,
    pub workflow_reports: Vec<RubricReport>,
    pub staged_outcomes: Vec<StagedOutcome>,
    /// Σ preference score × weight
    pub weighted_preference_total: f64,
}

impl EvaluationSnapshot {
    /// Compact human-readable summary for logs
    pub fn summary_line(&self) -> String {
        let preferences = self
            .preference_scores
            .values()
            .map(|p| format!("{}: {:.3}", p.name, p.score))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "t={} utility={:.3} [{}]",
            self.timestep, self.weighted_preference_total, preferences
        )
    }
}

// ── Reward Projection ────────────────────────────────────────────────

/// How a snapshot folds into the reward signal
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "projection", rename_all = "snake_case")]
pub enum RewardProjection {
    /// The weighted preference total
    #[default]
    ScalarUtility,
    /// Per-preference scores in name order
    PreferenceVector { include_weights: bool },
    /// Preference name to score
    PreferenceMap { include_weights: bool },
}

/// A projected reward value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RewardValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Map(BTreeMap<String, f64>),
}

impl RewardValue {
    /// Collapse to a single number for the per-timestep reward series
    pub fn as_scalar(&self) -> f64 {
        match self {
            RewardValue::Scalar(value) => *value,
            RewardValue::Vector(values) => values.iter().sum(),
            RewardValue::Map(map) => map.values().sum(),
        }
    }
}

impl RewardProjection {
    pub fn project(&self, snapshot: &EvaluationSnapshot) -> RewardValue {
        match self {
            RewardProjection::ScalarUtility => {
                RewardValue::Scalar(snapshot.weighted_preference_total)
            }
            RewardProjection::PreferenceVector { include_weights } => RewardValue::Vector(
                snapshot
                    .preference_scores
                    .values()
                    .map(|p| {
                        if *include_weights {
                            p.score * p.weight
                        } else {
                            p.score
                        }
                    })
                    .collect(),
            ),
            RewardProjection::PreferenceMap { include_weights } => RewardValue::Map(
                snapshot
                    .preference_scores
                    .values()
                    .map(|p| {
                        let value = if *include_weights {
                            p.score * p.weight
                        } else {
                            p.score
                        };
                        (p.name.clone(), value)
                    })
                    .collect(),
            ),
        }
    }

    /// Scalar form of the projection. A non-finite result falls back to
    /// the weighted utility rather than poisoning the reward series.
    pub fn scalar(&self, snapshot: &EvaluationSnapshot) -> f64 {
        let value = self.project(snapshot).as_scalar();
        if value.is_finite() {
            value
        } else {
            tracing::warn!(
                timestep = snapshot.timestep,
                "non-finite projected reward, falling back to weighted utility"
            );
            snapshot.weighted_preference_total
        }
    }
}
