//! Staged rubrics: an ordered, gated scoring pipeline
//!
//! # Key Concepts
//!
//! - `RubricStage`: rules summed into a stage score capped at
//!   `max_points`, with a points threshold to pass
//! - `OnFailureAction`: what a failed required stage does to the rest of
//!   the pipeline (stop, continue, or zero the total)
//! - `StagedOutcome` / `StageTrace`: the full per-stage record, including
//!   stages that were never reached

use crate::{Criterion, CriterionScore, EvaluationError, EvaluationResult, RunCondition};
use serde::{Deserialize, Serialize};

// ── Failure Action ───────────────────────────────────────────────────

/// What a failed required stage does to the rest of the pipeline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailureAction {
    /// Halt here; later stages are recorded unevaluated and score 0
    #[default]
    Stop,
    /// Keep evaluating later stages
    Continue,
    /// Force the rubric total to `on_failure_score`, but still evaluate
    /// and record every remaining stage
    Zero,
}

// ── Stage ────────────────────────────────────────────────────────────

/// One ordered stage: its rules' scores sum into a stage score capped at
/// `max_points`; the stage passes when that score reaches
/// `min_score_to_pass` (in points).
#[derive(Clone, Debug)]
pub struct RubricStage {
    pub name: String,
    pub description: Option<String>,
    pub rules: Vec<Criterion>,
    pub max_points: f64,
    pub min_score_to_pass: f64,
    pub is_required: bool,
    pub on_failure: OnFailureAction,
    pub on_failure_score: f64,
}

impl RubricStage {
    pub fn new(name: impl Into<String>, max_points: f64) -> Self {
        Self {
            name: name.into(),
            description: None,
            rules: Vec::new(),
            max_points,
            min_score_to_pass: 0.0,
            is_required: true,
            on_failure: OnFailureAction::default(),
            on_failure_score: 0.0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_rule(mut self, rule: Criterion) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_min_score_to_pass(mut self, points: f64) -> Self {
        self.min_score_to_pass = points;
        self
    }

    /// Failure of this stage no longer gates the pipeline
    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }

    pub fn with_on_failure(mut self, action: OnFailureAction) -> Self {
        self.on_failure = action;
        self
    }

    pub fn with_on_failure_score(mut self, score: f64) -> Self {
        self.on_failure_score = score;
        self
    }
}

// ── Staged Rubric ────────────────────────────────────────────────────

/// Rubric evaluated stage by stage in declared order
#[derive(Clone, Debug)]
pub struct StagedRubric {
    pub category_name: String,
    pub description: Option<String>,
    pub max_total_score: f64,
    pub stages: Vec<RubricStage>,
    pub run_condition: RunCondition,
}

impl StagedRubric {
    pub fn new(category_name: impl Into<String>, max_total_score: f64) -> Self {
        Self {
            category_name: category_name.into(),
            description: None,
            max_total_score,
            stages: Vec::new(),
            run_condition: RunCondition::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_stage(mut self, stage: RubricStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_run_condition(mut self, run_condition: RunCondition) -> Self {
        self.run_condition = run_condition;
        self
    }

    /// Structural checks: at least one stage, every stage has rules and
    /// positive points, stage points fit inside the category max.
    pub fn validate(&self) -> EvaluationResult<()> {
        if self.stages.is_empty() {
            return Err(EvaluationError::NoStages(self.category_name.clone()));
        }
        let mut allocated = 0.0;
        for stage in &self.stages {
            if stage.rules.is_empty() {
                return Err(EvaluationError::EmptyStage {
                    category: self.category_name.clone(),
                    stage: stage.name.clone(),
                });
            }
            if stage.max_points <= 0.0 {
                return Err(EvaluationError::InvalidStagePoints {
                    category: self.category_name.clone(),
                    stage: stage.name.clone(),
                    max_points: stage.max_points,
                });
            }
            for rule in &stage.rules {
                rule.validate()?;
            }
            allocated += stage.max_points;
        }
        if allocated > self.max_total_score {
            return Err(EvaluationError::StageBudgetExceeded {
                category: self.category_name.clone(),
                allocated,
                max_total: self.max_total_score,
            });
        }
        Ok(())
    }
}

// ── Outcome ──────────────────────────────────────────────────────────

/// Per-stage trace, including stages never reached after a stop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageTrace {
    pub name: String,
    pub score: f64,
    pub max_points: f64,
    pub passed: bool,
    pub is_required: bool,
    pub evaluated: bool,
    pub rule_scores: Vec<CriterionScore>,
}

impl StageTrace {
    /// Trace entry for a stage skipped after an earlier stop
    pub fn skipped(stage: &RubricStage) -> Self {
        Self {
            name: stage.name.clone(),
            score: 0.0,
            max_points: stage.max_points,
            passed: false,
            is_required: stage.is_required,
            evaluated: false,
            rule_scores: Vec::new(),
        }
    }
}

/// Everything one staged rubric produced for a tick
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagedOutcome {
    pub category_name: String,
    pub total_score: f64,
    pub max_score: f64,
    pub normalized_score: f64,
    pub stages_evaluated: usize,
    pub stages_passed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_gate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,
    pub stages: Vec<StageTrace>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing_rule(name: &str, points: f64) -> Criterion {
        Criterion::code(name, move |_, _| Ok(points.into())).with_max_score(points.max(1.0))
    }

    #[test]
    fn test_validate_accepts_a_well_formed_pipeline() {
        let rubric = StagedRubric::new("delivery", 20.0)
            .with_stage(RubricStage::new("format", 10.0).with_rule(passing_rule("parses", 10.0)))
            .with_stage(RubricStage::new("depth", 10.0).with_rule(passing_rule("thorough", 10.0)));
        assert!(rubric.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_pipeline_and_stage() {
        let no_stages = StagedRubric::new("empty", 10.0);
        assert!(matches!(
            no_stages.validate(),
            Err(EvaluationError::NoStages(_))
        ));

        let empty_stage = StagedRubric::new("cat", 10.0).with_stage(RubricStage::new("bare", 5.0));
        assert!(matches!(
            empty_stage.validate(),
            Err(EvaluationError::EmptyStage { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_overallocated_stage_points() {
        let rubric = StagedRubric::new("cat", 10.0)
            .with_stage(RubricStage::new("a", 8.0).with_rule(passing_rule("r1", 8.0)))
            .with_stage(RubricStage::new("b", 8.0).with_rule(passing_rule("r2", 8.0)));
        assert!(matches!(
            rubric.validate(),
            Err(EvaluationError::StageBudgetExceeded { allocated, .. }) if allocated == 16.0
        ));
    }

    #[test]
    fn test_validate_rejects_nonpositive_stage_points() {
        let rubric = StagedRubric::new("cat", 10.0)
            .with_stage(RubricStage::new("a", 0.0).with_rule(passing_rule("r1", 1.0)));
        assert!(matches!(
            rubric.validate(),
            Err(EvaluationError::InvalidStagePoints { .. })
        ));
    }

    #[test]
    fn test_skipped_trace_is_marked_unevaluated() {
        let stage = RubricStage::new("later", 5.0).with_rule(passing_rule("r", 5.0));
        let trace = StageTrace::skipped(&stage);
        assert!(!trace.evaluated);
        assert!(!trace.passed);
        assert_eq!(trace.score, 0.0);
        assert!(trace.rule_scores.is_empty());
    }
}
