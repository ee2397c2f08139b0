//! Workload domain types for foreman
//!
//! A foreman run simulates a manager controller operating a roster of
//! executor agents against a dependency-graphed task workload. This crate
//! holds the shared data model; the engine crate owns all mutation.
//!
//! # Key Concepts
//!
//! - **Workflow**: The aggregate root. Tasks, resources, executions, agents
//!   and messages all live in flat id-keyed arenas on the workflow;
//!   parent/child and dependency relationships are id references only.
//! - **Task**: A node in the dependency graph. A task with subtasks is
//!   *composite* and is never scheduled directly; only *atomic* tasks run.
//! - **TaskExecution**: One (task, agent) attempt. Multi-variant tasks have
//!   several concurrent executions which are later ranked.
//! - **Resource**: An immutable artifact produced by a completed execution
//!   and consumed by dependent tasks.
//! - **ManagerAction / ActionOutcome**: The closed action vocabulary the
//!   controller emits and the per-action result the engine records.
//! - **ManagerObservation**: The per-tick view handed to the controller.
//!
//! # Design Principles
//!
//! 1. Tasks form an arena, not an embedded tree. Derived fields such as
//!    `effective_status` are recomputed by traversal, never mirrored.
//! 2. Action kinds are a closed sum type, matched exhaustively.
//! 3. Everything that crosses a run boundary serializes as plain JSON.

#![deny(unsafe_code)]

mod action;
mod agent;
mod errors;
mod execution;
mod graph;
mod message;
mod observation;
mod resource;
mod run;
mod task;
mod workflow;

pub use action::*;
pub use agent::*;
pub use errors::*;
pub use execution::*;
pub use graph::*;
pub use message::*;
pub use observation::*;
pub use resource::*;
pub use run::*;
pub use task::*;
pub use workflow::*;
