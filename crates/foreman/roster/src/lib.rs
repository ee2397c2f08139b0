//! Agent roster lifecycle and the worker execution seam
//!
//! # Key Concepts
//!
//! - `AgentRegistry`: a pure schedule object; agents join and leave at
//!   planned timesteps and due changes apply exactly once
//! - `WorkerAgent`: the async trait the engine drives; how work actually
//!   gets done is the implementor's business
//! - `SimulatedWorker` / `InstantWorker`: deterministic in-repo workers
//!   for scenarios and tests

#![deny(unsafe_code)]

mod errors;
mod registry;
mod worker;

pub use errors::*;
pub use registry::*;
pub use worker::*;
