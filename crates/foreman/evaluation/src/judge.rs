//! The judge seam: how prompt-scored criteria get their numbers
//!
//! The engine never talks to a model directly. Judge criteria go through
//! `JudgeBackend`, and the in-repo implementations are deterministic so
//! runs stay reproducible.

use crate::{EvaluationContext, EvaluationError, EvaluationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ── Verdict ──────────────────────────────────────────────────────────

/// Score and rationale a judge hands back for one prompt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    pub reasoning: String,
}

impl JudgeVerdict {
    pub fn new(score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            score,
            reasoning: reasoning.into(),
        }
    }
}

// ── Backend Trait ────────────────────────────────────────────────────

/// Resolves a judge prompt against the assembled context. Scores are
/// expected in `[0, max_score]`; the caller clamps regardless.
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    async fn score(
        &self,
        prompt: &str,
        max_score: f64,
        context: &EvaluationContext,
    ) -> EvaluationResult<JudgeVerdict>;
}

// ── Simulated Judge ──────────────────────────────────────────────────

/// Deterministic stand-in judge. Credit grows with how much deliverable
/// content exists to review, so scores climb as the run produces output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulatedJudge {
    /// Ratio awarded the moment any deliverable exists
    pub base_ratio: f64,
    /// Content length at which the judge awards full credit
    pub full_credit_chars: usize,
}

impl Default for SimulatedJudge {
    fn default() -> Self {
        Self {
            base_ratio: 0.2,
            full_credit_chars: 400,
        }
    }
}

#[async_trait]
impl JudgeBackend for SimulatedJudge {
    async fn score(
        &self,
        _prompt: &str,
        max_score: f64,
        context: &EvaluationContext,
    ) -> EvaluationResult<JudgeVerdict> {
        let chars = context.content_chars();
        if chars == 0 {
            return Ok(JudgeVerdict::new(0.0, "no deliverable content to review"));
        }
        let coverage = (chars as f64 / self.full_credit_chars.max(1) as f64).min(1.0);
        let ratio = (self.base_ratio + (1.0 - self.base_ratio) * coverage).clamp(0.0, 1.0);
        Ok(JudgeVerdict::new(
            max_score * ratio,
            format!(
                "reviewed {} deliverable(s), {} chars of content",
                context.output_resources.len(),
                chars
            ),
        ))
    }
}

// ── Fixed Judge ──────────────────────────────────────────────────────

/// Always awards the same fraction of the max score. Intended for
/// engine and rubric tests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixedJudge {
    pub ratio: f64,
}

impl FixedJudge {
    pub fn scoring(ratio: f64) -> Self {
        Self { ratio }
    }
}

#[async_trait]
impl JudgeBackend for FixedJudge {
    async fn score(
        &self,
        _prompt: &str,
        max_score: f64,
        _context: &EvaluationContext,
    ) -> EvaluationResult<JudgeVerdict> {
        Ok(JudgeVerdict::new(
            max_score * self.ratio.clamp(0.0, 1.0),
            format!("fixed ratio {:.2}", self.ratio),
        ))
    }
}

// ── Failing Judge ────────────────────────────────────────────────────

/// Always errors. Exercises criterion failure isolation in tests.
#[derive(Clone, Debug, Default)]
pub struct FailingJudge;

#[async_trait]
impl JudgeBackend for FailingJudge {
    async fn score(
        &self,
        prompt: &str,
        _max_score: f64,
        _context: &EvaluationContext,
    ) -> EvaluationResult<JudgeVerdict> {
        Err(EvaluationError::Judge(format!(
            "judge unavailable for prompt: {}",
            prompt.chars().take(60).collect::<String>()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_types::{ExecutionId, ResourceDraft};

    fn context_with_content(chars: usize) -> EvaluationContext {
        let resource = ResourceDraft::new("deliverable", "output")
            .with_content("x".repeat(chars))
            .into_resource(ExecutionId::new("x-judge"));
        EvaluationContext {
            output_resources: vec![resource],
            ..EvaluationContext::default()
        }
    }

    #[tokio::test]
    async fn test_simulated_judge_scores_zero_without_content() {
        let judge = SimulatedJudge::default();
        let verdict = judge
            .score("grade the report", 10.0, &EvaluationContext::default())
            .await
            .unwrap();
        assert_eq!(verdict.score, 0.0);
    }

    #[tokio::test]
    async fn test_simulated_judge_awards_full_credit_at_target_length() {
        let judge = SimulatedJudge::default();
        let verdict = judge
            .score("grade", 10.0, &context_with_content(400))
            .await
            .unwrap();
        assert!((verdict.score - 10.0).abs() < 1e-9);

        let partial = judge
            .score("grade", 10.0, &context_with_content(100))
            .await
            .unwrap();
        assert!(partial.score > 0.0 && partial.score < 10.0);
    }

    #[tokio::test]
    async fn test_fixed_judge_is_a_constant_fraction() {
        let judge = FixedJudge::scoring(0.8);
        let verdict = judge
            .score("anything", 5.0, &EvaluationContext::default())
            .await
            .unwrap();
        assert!((verdict.score - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failing_judge_errors() {
        let judge = FailingJudge;
        let result = judge.score("prompt", 1.0, &EvaluationContext::default()).await;
        assert!(matches!(result, Err(EvaluationError::Judge(_))));
    }
}
