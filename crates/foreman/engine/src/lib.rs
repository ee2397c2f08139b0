//! The simulation loop: policies, actions, execution, and recording
//!
//! # Key Concepts
//!
//! - `SimulationEngine`: drives one workflow run tick by tick, from the
//!   controller's observation through task execution to evaluation
//! - `ManagerPolicy`: the controller seam; an observation goes in, one
//!   action comes out per timestep
//! - `apply_action`: the interpreter for every controller move, with
//!   failures reported as outcomes rather than aborting the tick
//! - `TickReport` / `RunSummary`: what each tick and the whole run
//!   looked like, streamed to a `RunRecorder`
//! - `RunSnapshot`: a tick-boundary capture that a fresh engine can
//!   restore and resume from

#![deny(unsafe_code)]

mod actions;
mod config;
mod errors;
mod observe;
mod policy;
mod recorder;
mod runner;
mod snapshot;

pub use actions::*;
pub use config::*;
pub use errors::*;
pub use observe::*;
pub use policy::*;
pub use recorder::*;
pub use runner::*;
pub use snapshot::*;
