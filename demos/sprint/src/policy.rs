//! A small heuristic controller for the sprint scenario
//!
//! Plays one move per tick from what the observation shows: kick off
//! with a broadcast, split the dashboard task into phases, then spread
//! unstarted work across the roster round-robin. When failures leave
//! nothing runnable it asks the engine to wind the run down.

use async_trait::async_trait;
use foreman_engine::ManagerPolicy;
use foreman_types::{
    ActionKind, ActionRecord, AgentId, ManagerAction, ManagerObservation, SubtaskSpec, TaskId,
};
use std::collections::HashSet;

pub struct SprintPolicy {
    dashboard_task: TaskId,
    kicked_off: bool,
    decomposed_dashboard: bool,
    wrap_posted: bool,
    end_requested: bool,
    /// Tasks this policy has already handed out
    assigned: HashSet<TaskId>,
    next_agent: usize,
}

impl SprintPolicy {
    pub fn new(dashboard_task: TaskId) -> Self {
        Self {
            dashboard_task,
            kicked_off: false,
            decomposed_dashboard: false,
            wrap_posted: false,
            end_requested: false,
            assigned: HashSet::new(),
            next_agent: 0,
        }
    }

    /// Seed the handed-out set with work that was assigned before the
    /// run started, so the round-robin skips it.
    pub fn with_preassigned(mut self, task_ids: Vec<TaskId>) -> Self {
        self.assigned.extend(task_ids);
        self
    }

    fn next_assignment(&mut self, observation: &ManagerObservation) -> Option<(TaskId, AgentId)> {
        let agents = observation.available_agents();
        if agents.is_empty() {
            return None;
        }
        // Ready tasks first so nothing startable sits idle.
        let candidate = observation
            .ready_task_ids
            .iter()
            .chain(observation.pending_task_ids.iter())
            .find(|id| !self.assigned.contains(*id))?
            .clone();
        let agent = agents[self.next_agent % agents.len()].id.clone();
        self.next_agent += 1;
        self.assigned.insert(candidate.clone());
        Some((candidate, agent))
    }

    /// Failures with nothing left running or startable mean the sprint
    /// cannot finish on its own.
    fn is_stalled(&self, observation: &ManagerObservation) -> bool {
        !observation.failed_task_ids.is_empty()
            && observation.running_task_ids.is_empty()
            && observation
                .ready_task_ids
                .iter()
                .chain(observation.pending_task_ids.iter())
                .all(|id| self.assigned.contains(id))
    }
}

#[async_trait]
impl ManagerPolicy for SprintPolicy {
    async fn step(&mut self, observation: &ManagerObservation) -> ManagerAction {
        if !self.kicked_off {
            self.kicked_off = true;
            return ManagerAction::new(
                "Open the sprint with the plan",
                ActionKind::SendMessage {
                    content: format!(
                        "Sprint start: {}. Schema first, API and UI in parallel, QA last.",
                        observation.goal
                    ),
                    recipient_id: None,
                },
            );
        }

        if !self.decomposed_dashboard
            && observation.pending_task_ids.contains(&self.dashboard_task)
        {
            self.decomposed_dashboard = true;
            return ManagerAction::new(
                "The dashboard is too big for one sitting",
                ActionKind::DecomposeTask {
                    task_id: self.dashboard_task.clone(),
                    subtasks: vec![
                        SubtaskSpec::new("wireframe", "lay out the dashboard panels"),
                        SubtaskSpec::new("implement ui", "build the laid-out panels")
                            .with_dependency_indices(vec![0]),
                    ],
                },
            );
        }

        if let Some((task_id, agent_id)) = self.next_assignment(observation) {
            return ManagerAction::new(
                "Spread unstarted work across the roster",
                ActionKind::AssignTask { task_id, agent_id },
            );
        }

        if !self.wrap_posted
            && observation.pending_task_ids.is_empty()
            && observation.ready_task_ids.is_empty()
            && observation.running_task_ids.len() == 1
        {
            self.wrap_posted = true;
            return ManagerAction::new(
                "Everything else has landed",
                ActionKind::SendMessage {
                    content: "One task left in flight; start wrapping up your lanes.".to_string(),
                    recipient_id: None,
                },
            );
        }

        if !self.end_requested && self.is_stalled(observation) {
            self.end_requested = true;
            return ManagerAction::new(
                "Remaining work is blocked behind failures",
                ActionKind::RequestEndWorkflow {
                    reason: Some("sprint stalled on failed tasks".to_string()),
                },
            );
        }

        ManagerAction::noop("waiting on the team")
    }

    async fn on_action_result(&mut self, record: &ActionRecord) {
        if !record.outcome.success {
            tracing::warn!(
                action = %record.outcome.action_type,
                summary = %record.outcome.summary,
                "sprint action was rejected"
            );
        }
    }
}
