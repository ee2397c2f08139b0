//! Flat rubrics: independently scored criteria with a configurable fold
//!
//! # Key Concepts
//!
//! - `Criterion`: one scored signal, either a deterministic code function
//!   over workflow state or a judge prompt
//! - `RunCondition`: when a criterion is due (per tick, at completion, both)
//! - `AggregationStrategy`: how a rubric folds criterion scores, including
//!   the zeroing gate
//! - `CriterionScore` / `RubricReport`: the recorded outcome

use crate::{ContextItem, EvaluationContext, EvaluationError, EvaluationResult};
use foreman_types::Workflow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

// ── Run Condition ────────────────────────────────────────────────────

/// When a criterion or rubric is due for evaluation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    #[default]
    EachTimestep,
    OnCompletion,
    Both,
}

impl RunCondition {
    /// Whether something declared with this condition runs under the
    /// given cadence
    pub fn is_due(&self, cadence: RunCondition) -> bool {
        matches!(self, RunCondition::Both) || cadence == RunCondition::Both || *self == cadence
    }
}

// ── Code Criteria ────────────────────────────────────────────────────

/// What a code criterion returns on success
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeScore {
    pub score: f64,
    pub reasoning: Option<String>,
}

impl CodeScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

impl From<f64> for CodeScore {
    fn from(score: f64) -> Self {
        Self::new(score)
    }
}

/// Deterministic scoring function over workflow state and assembled
/// context. An `Err` counts as a criterion failure, scored 0 with the
/// message kept as error metadata.
pub type CodeFn =
    Arc<dyn Fn(&Workflow, &EvaluationContext) -> Result<CodeScore, String> + Send + Sync>;

/// The two ways a criterion can be scored
#[derive(Clone)]
pub enum CriterionKind {
    /// Deterministic function of workflow state
    Code(CodeFn),
    /// Prompt resolved by the judge backend
    Judge { prompt: String },
}

impl fmt::Debug for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionKind::Code(_) => f.write_str("Code(..)"),
            CriterionKind::Judge { prompt } => {
                f.debug_struct("Judge").field("prompt", prompt).finish()
            }
        }
    }
}

// ── Criterion ────────────────────────────────────────────────────────

/// One independently scored signal
#[derive(Clone, Debug)]
pub struct Criterion {
    pub name: String,
    pub description: Option<String>,
    pub max_score: f64,
    pub kind: CriterionKind,
    pub run_condition: RunCondition,
    pub required_context: BTreeSet<ContextItem>,
}

impl Criterion {
    pub fn code<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Workflow, &EvaluationContext) -> Result<CodeScore, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            max_score: 1.0,
            kind: CriterionKind::Code(Arc::new(f)),
            run_condition: RunCondition::EachTimestep,
            required_context: BTreeSet::new(),
        }
    }

    pub fn judge(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            max_score: 1.0,
            kind: CriterionKind::Judge {
                prompt: prompt.into(),
            },
            run_condition: RunCondition::EachTimestep,
            required_context: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_score(mut self, max_score: f64) -> Self {
        self.max_score = max_score;
        self
    }

    pub fn with_run_condition(mut self, run_condition: RunCondition) -> Self {
        self.run_condition = run_condition;
        self
    }

    /// Declare one context slice this criterion needs
    pub fn requiring(mut self, item: ContextItem) -> Self {
        self.required_context.insert(item);
        self
    }

    pub fn validate(&self) -> EvaluationResult<()> {
        if self.max_score <= 0.0 {
            return Err(EvaluationError::InvalidMaxScore {
                criterion: self.name.clone(),
                max_score: self.max_score,
            });
        }
        Ok(())
    }
}

// ── Scores ───────────────────────────────────────────────────────────

/// Recorded outcome of evaluating one criterion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CriterionScore {
    pub name: String,
    pub score: f64,
    pub max_score: f64,
    pub normalized_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CriterionScore {
    /// Clamp a raw score into `[0, max_score]` and record it
    pub fn scored(
        name: impl Into<String>,
        raw: f64,
        max_score: f64,
        message: Option<String>,
    ) -> Self {
        let clamped = if raw.is_finite() {
            raw.max(0.0).min(max_score)
        } else {
            0.0
        };
        let normalized = if max_score > 0.0 {
            clamped / max_score
        } else {
            0.0
        };
        Self {
            name: name.into(),
            score: clamped,
            max_score,
            normalized_score: normalized,
            message,
            error: None,
        }
    }

    /// A failed evaluation: zero credit, error kept
    pub fn errored(name: impl Into<String>, max_score: f64, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: 0.0,
            max_score,
            normalized_score: 0.0,
            message: None,
            error: Some(error.into()),
        }
    }
}

// ── Aggregation ──────────────────────────────────────────────────────

/// How a flat rubric folds criterion scores into one normalized number
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Normalized scores weighted by each criterion's max points
    /// (the plain mean when all max points are equal)
    #[default]
    WeightedAverage,
    Min,
    Max,
    Product,
    HarmonicMean,
    /// Weighted average, then zeroed when the named gate criterion
    /// scored 0
    ZeroGate { gate: String },
}

impl AggregationStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            AggregationStrategy::WeightedAverage => "weighted_average",
            AggregationStrategy::Min => "min",
            AggregationStrategy::Max => "max",
            AggregationStrategy::Product => "product",
            AggregationStrategy::HarmonicMean => "harmonic_mean",
            AggregationStrategy::ZeroGate { .. } => "zero_gate",
        }
    }
}

// ── Rubric ───────────────────────────────────────────────────────────

/// A named set of independently scored criteria
#[derive(Clone, Debug)]
pub struct Rubric {
    pub name: String,
    pub description: Option<String>,
    pub aggregation: AggregationStrategy,
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            aggregation: AggregationStrategy::default(),
            criteria: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationStrategy) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn validate(&self) -> EvaluationResult<()> {
        for criterion in &self.criteria {
            criterion.validate()?;
        }
        if let AggregationStrategy::ZeroGate { gate } = &self.aggregation {
            if !self.criteria.iter().any(|c| &c.name == gate) {
                return Err(EvaluationError::UnknownGateCriterion {
                    rubric: self.name.clone(),
                    gate: gate.clone(),
                });
            }
        }
        Ok(())
    }

    /// Criteria scheduled under the given cadence
    pub fn due_criteria(&self, cadence: RunCondition) -> Vec<&Criterion> {
        self.criteria
            .iter()
            .filter(|c| c.run_condition.is_due(cadence))
            .collect()
    }

    /// Fold evaluated scores per the configured strategy. Empty input
    /// aggregates to 0.
    pub fn aggregate(&self, scores: &[CriterionScore]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        match &self.aggregation {
            AggregationStrategy::WeightedAverage => weighted_by_max(scores),
            AggregationStrategy::Min => scores
                .iter()
                .map(|s| s.normalized_score)
                .fold(f64::INFINITY, f64::min),
            AggregationStrategy::Max => scores
                .iter()
                .map(|s| s.normalized_score)
                .fold(0.0, f64::max),
            AggregationStrategy::Product => scores
                .iter()
                .map(|s| s.normalized_score)
                .product(),
            AggregationStrategy::HarmonicMean => {
                if scores.iter().any(|s| s.normalized_score == 0.0) {
                    0.0
                } else {
                    scores.len() as f64
                        / scores.iter().map(|s| 1.0 / s.normalized_score).sum::<f64>()
                }
            }
            AggregationStrategy::ZeroGate { gate } => {
                let gated_to_zero = scores
                    .iter()
                    .any(|s| &s.name == gate && s.score == 0.0);
                if gated_to_zero {
                    0.0
                } else {
                    weighted_by_max(scores)
                }
            }
        }
    }
}

/// Σ raw / Σ max across criterion scores
fn weighted_by_max(scores: &[CriterionScore]) -> f64 {
    let total_max: f64 = scores.iter().map(|s| s.max_score).sum();
    if total_max <= 0.0 {
        return 0.0;
    }
    scores.iter().map(|s| s.score).sum::<f64>() / total_max
}

// ── Report ───────────────────────────────────────────────────────────

/// Scores for every evaluated criterion of one rubric plus the aggregate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RubricReport {
    pub rubric_name: String,
    pub criterion_scores: Vec<CriterionScore>,
    pub aggregated_score: f64,
    pub aggregation: String,
}
