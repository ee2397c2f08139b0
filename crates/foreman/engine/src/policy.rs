//! The controller seam: how an external manager policy plugs into the loop
//!
//! The engine is policy-agnostic. Once per tick it hands the policy a
//! `ManagerObservation` and applies whatever single action comes back.
//! Learned controllers, scripted sequences, and baselines all implement
//! the same trait.

use async_trait::async_trait;
use foreman_types::{ActionKind, ActionRecord, ManagerAction, ManagerObservation};
use std::collections::VecDeque;

// ── Policy Trait ─────────────────────────────────────────────────────

/// An external decision-maker stepped once per tick
#[async_trait]
pub trait ManagerPolicy: Send {
    /// Choose one action for this tick
    async fn step(&mut self, observation: &ManagerObservation) -> ManagerAction;

    /// Called after the engine applies the action, with the recorded
    /// outcome. Default ignores it.
    async fn on_action_result(&mut self, _record: &ActionRecord) {}
}

// ── Scripted Policy ──────────────────────────────────────────────────

/// Plays back a fixed action sequence, then no-ops. The workhorse for
/// integration tests and reproducible demo runs.
pub struct ScriptedPolicy {
    script: VecDeque<ManagerAction>,
}

impl ScriptedPolicy {
    pub fn new(actions: Vec<ManagerAction>) -> Self {
        Self {
            script: actions.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl ManagerPolicy for ScriptedPolicy {
    async fn step(&mut self, _observation: &ManagerObservation) -> ManagerAction {
        self.script
            .pop_front()
            .unwrap_or_else(|| ManagerAction::noop("script exhausted"))
    }
}

// ── Delegate-All Baseline ────────────────────────────────────────────

/// Baseline controller: hand every pending task to the workforce once,
/// then watch the run play out.
#[derive(Default)]
pub struct DelegateAllPolicy {
    delegated: bool,
}

impl DelegateAllPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManagerPolicy for DelegateAllPolicy {
    async fn step(&mut self, observation: &ManagerObservation) -> ManagerAction {
        if self.delegated {
            return ManagerAction::noop("already delegated");
        }
        if observation.available_agents().is_empty() {
            // Roster changes may add someone later.
            return ManagerAction::noop("no available agent to delegate to");
        }
        self.delegated = true;
        ManagerAction::new(
            "Delegate everything up front, then observe",
            ActionKind::AssignAllPendingTasks { agent_id: None },
        )
    }
}
