//! The observation handed to the controller policy each timestep

use crate::{ActionRecord, AgentId, AgentKind, AgentProfile, Message, RunState, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Agent Summary ────────────────────────────────────────────────────

/// Compact roster entry included in observations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub kind: AgentKind,
    pub capabilities: String,
    pub available: bool,
    pub current_task_count: usize,
    pub max_concurrent_tasks: usize,
    pub tasks_completed: usize,
    pub cost_per_hour: f64,
}

impl AgentSummary {
    pub fn from_profile(profile: &AgentProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            kind: profile.kind,
            capabilities: profile.capability_summary(),
            available: profile.available,
            current_task_count: profile.current_task_ids.len(),
            max_concurrent_tasks: profile.max_concurrent_tasks,
            tasks_completed: profile.tasks_completed,
            cost_per_hour: profile.cost_per_hour,
        }
    }
}

// ── Manager Observation ──────────────────────────────────────────────

/// Everything the controller policy sees at the top of a timestep.
/// Built fresh by the engine each tick from workflow state; task ids are
/// sorted so identical states produce identical observations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerObservation {
    /// Current timestep, 0-based
    pub timestep: u64,
    /// Horizon for this run
    pub max_timesteps: u64,
    /// Timesteps left before the horizon, including this one
    pub timesteps_remaining: u64,
    /// Run lifecycle state
    pub run_state: RunState,
    /// Workflow identity and intent
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub goal: String,
    /// Atomic-task counts keyed by status label
    pub task_status_counts: BTreeMap<String, usize>,
    /// Atomic task ids bucketed by status, each sorted
    #[serde(default)]
    pub pending_task_ids: Vec<TaskId>,
    #[serde(default)]
    pub ready_task_ids: Vec<TaskId>,
    #[serde(default)]
    pub running_task_ids: Vec<TaskId>,
    #[serde(default)]
    pub completed_task_ids: Vec<TaskId>,
    #[serde(default)]
    pub failed_task_ids: Vec<TaskId>,
    /// Roster summaries, sorted by agent id
    #[serde(default)]
    pub agents: Vec<AgentSummary>,
    /// Tail of the communication log
    #[serde(default)]
    pub recent_messages: Vec<Message>,
    /// Tail of the applied-action history
    #[serde(default)]
    pub recent_actions: Vec<ActionRecord>,
    /// Fraction of atomic tasks completed, in `[0, 1]`
    pub workflow_progress: f64,
    /// Fraction of the horizon consumed, in `[0, 1]`
    pub time_progress: f64,
    /// Cost accumulated so far
    pub total_cost: f64,
    /// Simulated hours accumulated so far
    pub total_simulated_hours: f64,
    /// Standing constraints the controller must respect
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Whether an end-of-run request is pending
    pub end_requested: bool,
    /// Stakeholder self-description, when one chooses to expose it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakeholder_profile: Option<serde_json::Value>,
}

impl ManagerObservation {
    /// All task ids the controller could act on this tick
    pub fn actionable_task_ids(&self) -> Vec<&TaskId> {
        self.pending_task_ids
            .iter()
            .chain(self.ready_task_ids.iter())
            .collect()
    }

    /// Worker summaries with spare capacity, in id order
    pub fn available_agents(&self) -> Vec<&AgentSummary> {
        self.agents
            .iter()
            .filter(|a| {
                a.available
                    && a.kind != AgentKind::Stakeholder
                    && a.current_task_count < a.max_concurrent_tasks
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_observation() -> ManagerObservation {
        ManagerObservation {
            timestep: 2,
            max_timesteps: 10,
            timesteps_remaining: 8,
            run_state: RunState::Running,
            workflow_id: WorkflowId::new("wf"),
            workflow_name: "demo".into(),
            goal: "ship it".into(),
            task_status_counts: BTreeMap::new(),
            pending_task_ids: vec![TaskId::new("p1")],
            ready_task_ids: vec![TaskId::new("r1"), TaskId::new("r2")],
            running_task_ids: Vec::new(),
            completed_task_ids: Vec::new(),
            failed_task_ids: Vec::new(),
            agents: Vec::new(),
            recent_messages: Vec::new(),
            recent_actions: Vec::new(),
            workflow_progress: 0.0,
            time_progress: 0.2,
            total_cost: 0.0,
            total_simulated_hours: 0.0,
            constraints: Vec::new(),
            end_requested: false,
            stakeholder_profile: None,
        }
    }

    #[test]
    fn test_actionable_ids_merge_pending_and_ready() {
        let obs = make_observation();
        let ids: Vec<&str> = obs
            .actionable_task_ids()
            .iter()
            .map(|t| t.0.as_str())
            .collect();
        assert_eq!(ids, vec!["p1", "r1", "r2"]);
    }

    #[test]
    fn test_available_agent_filter() {
        let mut obs = make_observation();
        let mut busy = AgentSummary::from_profile(&AgentProfile::ai_worker("busy"));
        busy.current_task_count = busy.max_concurrent_tasks;
        obs.agents.push(busy);
        obs.agents
            .push(AgentSummary::from_profile(&AgentProfile::ai_worker("free")));
        obs.agents.push(AgentSummary::from_profile(
            &AgentProfile::stakeholder("sponsor"),
        ));

        let available = obs.available_agents();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "free");
    }
}
