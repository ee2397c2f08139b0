//! Stakeholder preferences: weights, their timeline, and how they shift
//!
//! # Key Concepts
//!
//! - `PreferenceWeights`: a normalized weight per named preference
//!   dimension (quality, speed, cost, ...)
//! - `PreferenceTimeline`: a step function from timestep to snapshot
//!   with an append-only change history
//! - `WeightUpdateRequest`: the absolute/delta/multiplier algebra that
//!   moves weights between snapshots
//! - `StakeholderAgent`: the seeded persona that owns a timeline,
//!   answers clarifications, and pushes suggestions

#![deny(unsafe_code)]

mod errors;
mod stakeholder;
mod timeline;
mod update;
mod weights;

pub use errors::*;
pub use stakeholder::*;
pub use timeline::*;
pub use update::*;
pub use weights::*;
