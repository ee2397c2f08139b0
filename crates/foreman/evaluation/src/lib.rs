//! Scoring: rubrics, judges, staged gates, and reward projections
//!
//! # Key Concepts
//!
//! - `Rubric`: a flat set of criteria (deterministic code checks or
//!   judge prompts) folded into one score by an aggregation strategy
//! - `StagedRubric`: ordered stages with point budgets and pass
//!   thresholds, where a required failure can stop, zero, or waive
//! - `ContextSources` / `EvaluationContext`: per-tick state sliced down
//!   to exactly what each criterion asked to see
//! - `JudgeBackend`: the seam where an LLM grader plugs in; simulated
//!   and fixed judges ship for offline runs
//! - `EvaluationEngine`: evaluates everything due each tick under a
//!   shared concurrency cap and keeps the reward series
//! - `RewardProjection`: how a snapshot becomes the controller's reward
//!   (scalar utility, per-preference vector, or named map)

#![deny(unsafe_code)]

mod context;
mod engine;
mod errors;
mod judge;
mod rewards;
mod rubric;
mod staged;

pub use context::*;
pub use engine::*;
pub use errors::*;
pub use judge::*;
pub use rewards::*;
pub use rubric::*;
pub use staged::*;
