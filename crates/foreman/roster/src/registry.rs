//! Time-indexed agent registry

use crate::{RosterError, RosterResult, WorkerAgent};
use foreman_types::AgentId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

// ── Scheduled Changes ────────────────────────────────────────────────

enum ChangeKind {
    Add { worker: Arc<dyn WorkerAgent> },
    Remove { agent_id: AgentId },
}

struct ScheduledChange {
    kind: ChangeKind,
    reason: String,
}

// ── Registry ─────────────────────────────────────────────────────────

/// Live agent set plus a schedule of joins and leaves.
///
/// The registry never touches workflow state itself; the engine mirrors
/// its live set into the workflow each tick and prunes only agents the
/// registry introduced.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Arc<dyn WorkerAgent>>,
    scheduled: BTreeMap<u64, Vec<ScheduledChange>>,
    executed_timesteps: HashSet<u64>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Live Set ─────────────────────────────────────────────────────

    /// Register a worker immediately, replacing any previous holder of
    /// the same id
    pub fn register(&mut self, worker: Arc<dyn WorkerAgent>) {
        self.agents.insert(worker.id().clone(), worker);
    }

    pub fn agent(&self, id: &AgentId) -> RosterResult<Arc<dyn WorkerAgent>> {
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| RosterError::AgentNotFound(id.clone()))
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// All live workers, sorted by id
    pub fn agents(&self) -> Vec<Arc<dyn WorkerAgent>> {
        let mut workers: Vec<_> = self.agents.values().cloned().collect();
        workers.sort_by(|a, b| a.id().cmp(b.id()));
        workers
    }

    /// Live agent ids, sorted
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<_> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn remove(&mut self, id: &AgentId) -> bool {
        self.agents.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    // ── Schedule ─────────────────────────────────────────────────────

    /// Plan a worker to join at `timestep`
    pub fn schedule_add(
        &mut self,
        timestep: u64,
        worker: Arc<dyn WorkerAgent>,
        reason: impl Into<String>,
    ) -> RosterResult<()> {
        if self.executed_timesteps.contains(&timestep) {
            return Err(RosterError::TimestepAlreadyApplied(timestep));
        }
        self.scheduled.entry(timestep).or_default().push(ScheduledChange {
            kind: ChangeKind::Add { worker },
            reason: reason.into(),
        });
        Ok(())
    }

    /// Plan an agent to leave at `timestep`
    pub fn schedule_remove(
        &mut self,
        timestep: u64,
        agent_id: AgentId,
        reason: impl Into<String>,
    ) -> RosterResult<()> {
        if self.executed_timesteps.contains(&timestep) {
            return Err(RosterError::TimestepAlreadyApplied(timestep));
        }
        self.scheduled.entry(timestep).or_default().push(ScheduledChange {
            kind: ChangeKind::Remove { agent_id },
            reason: reason.into(),
        });
        Ok(())
    }

    /// Apply every change planned for `timestep` and return descriptions.
    /// Calling again for the same timestep is a no-op.
    pub fn apply_due_changes(&mut self, timestep: u64) -> Vec<String> {
        if self.executed_timesteps.contains(&timestep) {
            return Vec::new();
        }
        self.executed_timesteps.insert(timestep);

        let Some(changes) = self.scheduled.remove(&timestep) else {
            return Vec::new();
        };

        let mut descriptions = Vec::new();
        for change in changes {
            match change.kind {
                ChangeKind::Add { worker } => {
                    let id = worker.id().clone();
                    self.register(worker);
                    tracing::info!(agent = %id, timestep, "agent joined roster");
                    descriptions.push(format!("Added {}: {}", id, change.reason));
                }
                ChangeKind::Remove { agent_id } => {
                    if self.remove(&agent_id) {
                        tracing::info!(agent = %agent_id, timestep, "agent left roster");
                        descriptions.push(format!("Removed {}: {}", agent_id, change.reason));
                    } else {
                        descriptions
                            .push(format!("Could not remove {}: {}", agent_id, change.reason));
                    }
                }
            }
        }
        descriptions
    }

    /// Timesteps that still have unapplied changes
    pub fn pending_change_timesteps(&self) -> Vec<u64> {
        self.scheduled.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstantWorker;
    use foreman_types::AgentProfile;

    fn make_worker(id: &str) -> Arc<dyn WorkerAgent> {
        Arc::new(InstantWorker::new(
            AgentProfile::ai_worker(id).with_id(AgentId::new(id)),
        ))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = AgentRegistry::new();
        registry.register(make_worker("w1"));

        assert!(registry.contains(&AgentId::new("w1")));
        assert!(registry.agent(&AgentId::new("w1")).is_ok());
        assert!(matches!(
            registry.agent(&AgentId::new("ghost")),
            Err(RosterError::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_scheduled_add_applies_at_timestep() {
        let mut registry = AgentRegistry::new();
        registry
            .schedule_add(3, make_worker("late"), "reinforcements")
            .unwrap();

        assert!(registry.apply_due_changes(0).is_empty());
        assert!(!registry.contains(&AgentId::new("late")));

        let changes = registry.apply_due_changes(3);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].contains("Added late"));
        assert!(registry.contains(&AgentId::new("late")));
    }

    #[test]
    fn test_apply_is_idempotent_per_timestep() {
        let mut registry = AgentRegistry::new();
        registry
            .schedule_add(2, make_worker("w1"), "planned")
            .unwrap();

        assert_eq!(registry.apply_due_changes(2).len(), 1);
        assert!(registry.apply_due_changes(2).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_scheduled_remove() {
        let mut registry = AgentRegistry::new();
        registry.register(make_worker("w1"));
        registry
            .schedule_remove(5, AgentId::new("w1"), "rotation")
            .unwrap();

        registry.apply_due_changes(5);
        assert!(!registry.contains(&AgentId::new("w1")));
    }

    #[test]
    fn test_remove_missing_agent_reported() {
        let mut registry = AgentRegistry::new();
        registry
            .schedule_remove(1, AgentId::new("ghost"), "cleanup")
            .unwrap();

        let changes = registry.apply_due_changes(1);
        assert!(changes[0].contains("Could not remove"));
    }

    #[test]
    fn test_scheduling_into_applied_timestep_rejected() {
        let mut registry = AgentRegistry::new();
        registry.apply_due_changes(4);

        let result = registry.schedule_add(4, make_worker("w1"), "too late");
        assert!(matches!(result, Err(RosterError::TimestepAlreadyApplied(4))));
    }

    #[test]
    fn test_agents_sorted_by_id() {
        let mut registry = AgentRegistry::new();
        registry.register(make_worker("zeta"));
        registry.register(make_worker("alpha"));

        let ids = registry.agent_ids();
        assert_eq!(ids, vec![AgentId::new("alpha"), AgentId::new("zeta")]);
    }

    #[test]
    fn test_pending_change_timesteps() {
        let mut registry = AgentRegistry::new();
        registry.schedule_add(7, make_worker("a"), "").unwrap();
        registry.schedule_remove(2, AgentId::new("b"), "").unwrap();

        assert_eq!(registry.pending_change_timesteps(), vec![2, 7]);
        registry.apply_due_changes(2);
        assert_eq!(registry.pending_change_timesteps(), vec![7]);
    }
}
