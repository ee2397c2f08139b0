//! Bounded-concurrency evaluation over rubric suites
//!
//! # Key Concepts
//!
//! - `EvaluationSuite`: the rubrics in play: per-preference, free-floating
//!   workflow rubrics, and staged pipelines
//! - `EvaluationEngine`: runs everything due in a tick under one semaphore,
//!   isolates criterion failures, and keeps the snapshot history and the
//!   timestep-aligned reward series
//! - `score_resources`: scores one resource bundle with a rubric, used to
//!   rank competing task variants

use crate::{
    ContextSources, Criterion, CriterionKind, CriterionScore, EvaluationResult,
    EvaluationSnapshot, JudgeBackend, OnFailureAction, PreferenceScore, RewardProjection, Rubric,
    RubricReport, RunCondition, SimulatedJudge, StageTrace, StagedOutcome, StagedRubric,
};
use chrono::Utc;
use foreman_preferences::PreferenceWeights;
use foreman_types::{Resource, Workflow};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

// ── Config ───────────────────────────────────────────────────────────

/// Tuning for the evaluation pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Criteria allowed in flight at once; floored to 1
    pub max_concurrent_criteria: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_criteria: 100,
        }
    }
}

// ── Suite ────────────────────────────────────────────────────────────

/// A flat rubric bound to the preference dimension it scores
#[derive(Clone, Debug)]
pub struct PreferenceRubric {
    pub preference_name: String,
    pub rubric: Rubric,
}

impl PreferenceRubric {
    pub fn new(preference_name: impl Into<String>, rubric: Rubric) -> Self {
        Self {
            preference_name: preference_name.into(),
            rubric,
        }
    }
}

/// Everything the engine evaluates for a run
#[derive(Clone, Debug, Default)]
pub struct EvaluationSuite {
    pub preference_rubrics: Vec<PreferenceRubric>,
    pub workflow_rubrics: Vec<Rubric>,
    pub staged_rubrics: Vec<StagedRubric>,
}

impl EvaluationSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_preference(mut self, preference_name: impl Into<String>, rubric: Rubric) -> Self {
        self.preference_rubrics
            .push(PreferenceRubric::new(preference_name, rubric));
        self
    }

    pub fn with_workflow_rubric(mut self, rubric: Rubric) -> Self {
        self.workflow_rubrics.push(rubric);
        self
    }

    pub fn with_staged_rubric(mut self, rubric: StagedRubric) -> Self {
        self.staged_rubrics.push(rubric);
        self
    }

    /// Find a rubric by name, for tasks that name completion evaluators
    pub fn rubric_named(&self, name: &str) -> Option<&Rubric> {
        self.workflow_rubrics
            .iter()
            .find(|r| r.name == name)
            .or_else(|| {
                self.preference_rubrics
                    .iter()
                    .map(|b| &b.rubric)
                    .find(|r| r.name == name)
            })
    }

    pub fn validate(&self) -> EvaluationResult<()> {
        for binding in &self.preference_rubrics {
            binding.rubric.validate()?;
        }
        for rubric in &self.workflow_rubrics {
            rubric.validate()?;
        }
        for staged in &self.staged_rubrics {
            staged.validate()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.preference_rubrics.is_empty()
            && self.workflow_rubrics.is_empty()
            && self.staged_rubrics.is_empty()
    }
}

// ── Engine ───────────────────────────────────────────────────────────

enum Owner {
    Preference(usize),
    Workflow(usize),
}

/// Evaluates whatever is due each tick and keeps score over the run
pub struct EvaluationEngine {
    semaphore: Arc<Semaphore>,
    judge: Arc<dyn JudgeBackend>,
    projection: RewardProjection,
    history: Vec<EvaluationSnapshot>,
    reward_series: Vec<f64>,
    most_recent_reward: f64,
}

impl EvaluationEngine {
    pub fn new(config: &EvaluationConfig) -> Self {
        Self::with_judge(config, Arc::new(SimulatedJudge::default()))
    }

    pub fn with_judge(config: &EvaluationConfig, judge: Arc<dyn JudgeBackend>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_criteria.max(1))),
            judge,
            projection: RewardProjection::default(),
            history: Vec::new(),
            reward_series: Vec::new(),
            most_recent_reward: 0.0,
        }
    }

    pub fn with_projection(mut self, projection: RewardProjection) -> Self {
        self.projection = projection;
        self
    }

    /// Evaluate everything due under the given cadence: preference-bound
    /// rubrics, free workflow rubrics, and staged pipelines. Criterion
    /// failures are isolated; the batch always completes.
    pub async fn evaluate_tick(
        &mut self,
        workflow: &Workflow,
        timestep: u64,
        cadence: RunCondition,
        weights: &PreferenceWeights,
        suite: &EvaluationSuite,
        sources: &ContextSources,
    ) -> EvaluationSnapshot {
        // One batch across all flat rubrics so the pool is shared fairly.
        let mut scheduled: Vec<(Owner, &Criterion)> = Vec::new();
        for (index, binding) in suite.preference_rubrics.iter().enumerate() {
            for criterion in binding.rubric.due_criteria(cadence) {
                scheduled.push((Owner::Preference(index), criterion));
            }
        }
        for (index, rubric) in suite.workflow_rubrics.iter().enumerate() {
            for criterion in rubric.due_criteria(cadence) {
                scheduled.push((Owner::Workflow(index), criterion));
            }
        }

        let results = join_all(
            scheduled
                .iter()
                .map(|(_, criterion)| self.eval_criterion(workflow, criterion, sources)),
        )
        .await;

        let mut preference_groups: Vec<Vec<CriterionScore>> =
            vec![Vec::new(); suite.preference_rubrics.len()];
        let mut workflow_groups: Vec<Vec<CriterionScore>> =
            vec![Vec::new(); suite.workflow_rubrics.len()];
        for ((owner, _), score) in scheduled.iter().zip(results) {
            match owner {
                Owner::Preference(index) => preference_groups[*index].push(score),
                Owner::Workflow(index) => workflow_groups[*index].push(score),
            }
        }

        let mut preference_scores = BTreeMap::new();
        let mut weighted_total = 0.0;
        for (index, binding) in suite.preference_rubrics.iter().enumerate() {
            let scores = std::mem::take(&mut preference_groups[index]);
            let aggregated = binding.rubric.aggregate(&scores);
            let weight = weights.weight_of(&binding.preference_name).unwrap_or(0.0);
            weighted_total += aggregated * weight;
            preference_scores.insert(
                binding.preference_name.clone(),
                PreferenceScore {
                    name: binding.preference_name.clone(),
                    score: aggregated,
                    weight,
                    report: RubricReport {
                        rubric_name: binding.rubric.name.clone(),
                        criterion_scores: scores,
                        aggregated_score: aggregated,
                        aggregation: binding.rubric.aggregation.label().to_string(),
                    },
                },
            );
        }

        let workflow_reports: Vec<RubricReport> = suite
            .workflow_rubrics
            .iter()
            .enumerate()
            .map(|(index, rubric)| {
                let scores = std::mem::take(&mut workflow_groups[index]);
                let aggregated = rubric.aggregate(&scores);
                RubricReport {
                    rubric_name: rubric.name.clone(),
                    criterion_scores: scores,
                    aggregated_score: aggregated,
                    aggregation: rubric.aggregation.label().to_string(),
                }
            })
            .collect();

        let staged_outcomes = join_all(
            suite
                .staged_rubrics
                .iter()
                .filter(|rubric| rubric.run_condition.is_due(cadence))
                .map(|rubric| self.evaluate_staged(workflow, rubric, sources)),
        )
        .await;

        let snapshot = EvaluationSnapshot {
            workflow_id: workflow.id.clone(),
            timestep,
            timestamp: Utc::now(),
            cadence,
            preference_scores,
            applied_weights: weights.as_map(),
            workflow_reports,
            staged_outcomes,
            weighted_preference_total: weighted_total,
        };

        let reward = self.projection.scalar(&snapshot);
        self.record_reward(timestep, reward);
        tracing::info!(
            timestep,
            utility = weighted_total,
            reward,
            "evaluation tick complete"
        );
        self.history.push(snapshot.clone());
        snapshot
    }

    /// Walk a staged pipeline in declared order. The failed stage's own
    /// points stay in the total; what happens to the rest depends on the
    /// stage's failure action.
    pub async fn evaluate_staged(
        &self,
        workflow: &Workflow,
        rubric: &StagedRubric,
        sources: &ContextSources,
    ) -> StagedOutcome {
        let mut traces = Vec::with_capacity(rubric.stages.len());
        let mut total = 0.0;
        let mut zero_override = None;
        let mut stopped_at = None;
        let mut failed_gate: Option<String> = None;
        let mut stages_evaluated = 0;
        let mut stages_passed = 0;
        let mut halted = false;

        for stage in &rubric.stages {
            if halted {
                traces.push(StageTrace::skipped(stage));
                continue;
            }

            let rule_scores = join_all(
                stage
                    .rules
                    .iter()
                    .map(|rule| self.eval_criterion(workflow, rule, sources)),
            )
            .await;
            let raw: f64 = rule_scores.iter().map(|s| s.score).sum();
            let score = raw.min(stage.max_points);

            stages_evaluated += 1;
            let passed = score >= stage.min_score_to_pass;
            if passed {
                stages_passed += 1;
            }
            total += score;

            if !passed && stage.is_required {
                if failed_gate.is_none() {
                    failed_gate = Some(stage.name.clone());
                }
                match stage.on_failure {
                    OnFailureAction::Stop => {
                        stopped_at = Some(stage.name.clone());
                        halted = true;
                    }
                    OnFailureAction::Zero => {
                        zero_override = Some(stage.on_failure_score);
                    }
                    OnFailureAction::Continue => {}
                }
            }

            traces.push(StageTrace {
                name: stage.name.clone(),
                score,
                max_points: stage.max_points,
                passed,
                is_required: stage.is_required,
                evaluated: true,
                rule_scores,
            });
        }

        let mut total = total.min(rubric.max_total_score);
        if let Some(forced) = zero_override {
            total = forced.clamp(0.0, rubric.max_total_score);
        }
        let normalized = if rubric.max_total_score > 0.0 {
            total / rubric.max_total_score
        } else {
            0.0
        };

        StagedOutcome {
            category_name: rubric.category_name.clone(),
            total_score: total,
            max_score: rubric.max_total_score,
            normalized_score: normalized,
            stages_evaluated,
            stages_passed,
            failed_gate,
            stopped_at,
            stages: traces,
        }
    }

    /// Score one resource bundle with a rubric, ignoring run conditions.
    /// Used to rank competing variants of the same task.
    pub async fn score_resources(
        &self,
        workflow: &Workflow,
        rubric: &Rubric,
        sources: &ContextSources,
        resources: &[Resource],
    ) -> RubricReport {
        let mut variant_sources = sources.clone();
        variant_sources.output_resources = resources.to_vec();

        let scores = join_all(
            rubric
                .criteria
                .iter()
                .map(|criterion| self.eval_criterion(workflow, criterion, &variant_sources)),
        )
        .await;
        let aggregated = rubric.aggregate(&scores);
        RubricReport {
            rubric_name: rubric.name.clone(),
            criterion_scores: scores,
            aggregated_score: aggregated,
            aggregation: rubric.aggregation.label().to_string(),
        }
    }

    async fn eval_criterion(
        &self,
        workflow: &Workflow,
        criterion: &Criterion,
        sources: &ContextSources,
    ) -> CriterionScore {
        let permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return CriterionScore::errored(
                    &criterion.name,
                    criterion.max_score,
                    "evaluation pool closed",
                )
            }
        };
        let context = sources.assemble(&criterion.required_context);

        let score = match &criterion.kind {
            CriterionKind::Code(evaluate) => match evaluate(workflow, &context) {
                Ok(code) => CriterionScore::scored(
                    &criterion.name,
                    code.score,
                    criterion.max_score,
                    code.reasoning,
                ),
                Err(error) => {
                    tracing::warn!(
                        criterion = %criterion.name,
                        error = %error,
                        "code criterion failed"
                    );
                    CriterionScore::errored(&criterion.name, criterion.max_score, error)
                }
            },
            CriterionKind::Judge { prompt } => {
                match self.judge.score(prompt, criterion.max_score, &context).await {
                    Ok(verdict) => CriterionScore::scored(
                        &criterion.name,
                        verdict.score,
                        criterion.max_score,
                        Some(verdict.reasoning),
                    ),
                    Err(error) => {
                        tracing::warn!(
                            criterion = %criterion.name,
                            error = %error,
                            "judge criterion failed"
                        );
                        CriterionScore::errored(
                            &criterion.name,
                            criterion.max_score,
                            error.to_string(),
                        )
                    }
                }
            }
        };
        drop(permit);
        score
    }

    fn record_reward(&mut self, timestep: u64, value: f64) {
        let index = timestep as usize;
        if self.reward_series.len() <= index {
            self.reward_series.resize(index + 1, 0.0);
        }
        self.reward_series[index] = value;
        self.most_recent_reward = value;
    }

    pub fn history(&self) -> &[EvaluationSnapshot] {
        &self.history
    }

    pub fn latest(&self) -> Option<&EvaluationSnapshot> {
        self.history.last()
    }

    /// Scalar reward per timestep; ticks without an evaluation stay 0
    pub fn reward_series(&self) -> &[f64] {
        &self.reward_series
    }

    pub fn most_recent_reward(&self) -> f64 {
        self.most_recent_reward
    }

    /// Drop accumulated history and rewards, for run restarts
    pub fn reset(&mut self) {
        self.history.clear();
        self.reward_series.clear();
        self.most_recent_reward = 0.0;
    }
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new(&EvaluationConfig::default())
    }
}
