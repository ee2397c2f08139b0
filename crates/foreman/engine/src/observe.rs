//! Building the controller's per-tick view of the run

use crate::EngineConfig;
use foreman_comms::CommsService;
use foreman_preferences::StakeholderAgent;
use foreman_types::{
    ActionBuffer, AgentSummary, ManagerObservation, RunState, TaskId, TaskStatus, Workflow,
};

/// Assemble the observation handed to the policy at the top of a tick.
/// Task and agent listings are sorted so identical run states produce
/// identical observations regardless of map iteration order.
pub fn build_observation(
    workflow: &Workflow,
    comms: &CommsService,
    actions: &ActionBuffer,
    stakeholder: Option<&StakeholderAgent>,
    timestep: u64,
    run_state: RunState,
    config: &EngineConfig,
) -> ManagerObservation {
    let mut pending_task_ids: Vec<TaskId> = Vec::new();
    let mut ready_task_ids: Vec<TaskId> = Vec::new();
    let mut running_task_ids: Vec<TaskId> = Vec::new();
    let mut completed_task_ids: Vec<TaskId> = Vec::new();
    let mut failed_task_ids: Vec<TaskId> = Vec::new();
    for task in workflow.tasks.values().filter(|t| t.is_atomic()) {
        let bucket = match task.status {
            TaskStatus::Pending => &mut pending_task_ids,
            TaskStatus::Ready => &mut ready_task_ids,
            TaskStatus::Running => &mut running_task_ids,
            TaskStatus::Completed => &mut completed_task_ids,
            TaskStatus::Failed => &mut failed_task_ids,
        };
        bucket.push(task.id.clone());
    }
    pending_task_ids.sort();
    ready_task_ids.sort();
    running_task_ids.sort();
    completed_task_ids.sort();
    failed_task_ids.sort();

    let mut agents: Vec<AgentSummary> = workflow
        .agents
        .values()
        .map(AgentSummary::from_profile)
        .collect();
    agents.sort_by(|a, b| a.id.cmp(&b.id));

    let recent_messages = match comms.recent(config.observation_message_window) {
        Ok(messages) => messages,
        Err(error) => {
            tracing::warn!(error = %error, "could not read recent messages");
            Vec::new()
        }
    };
    let end_requested = match comms.end_requested() {
        Ok(flag) => flag,
        Err(error) => {
            tracing::warn!(error = %error, "could not read end-request flag");
            false
        }
    };

    ManagerObservation {
        timestep,
        max_timesteps: config.max_timesteps,
        timesteps_remaining: config.max_timesteps.saturating_sub(timestep),
        run_state,
        workflow_id: workflow.id.clone(),
        workflow_name: workflow.name.clone(),
        goal: workflow.goal.clone(),
        task_status_counts: workflow.task_status_counts(),
        pending_task_ids,
        ready_task_ids,
        running_task_ids,
        completed_task_ids,
        failed_task_ids,
        agents,
        recent_messages,
        recent_actions: actions
            .recent(config.observation_action_window)
            .into_iter()
            .cloned()
            .collect(),
        workflow_progress: workflow.progress(),
        time_progress: if config.max_timesteps > 0 {
            timestep as f64 / config.max_timesteps as f64
        } else {
            0.0
        },
        total_cost: workflow.total_cost,
        total_simulated_hours: workflow.total_simulated_hours,
        constraints: workflow.constraints.clone(),
        end_requested,
        stakeholder_profile: stakeholder
            .and_then(|s| serde_json::to_value(s.public_profile(timestep)).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_types::{AgentProfile, Task};

    fn make_workflow() -> Workflow {
        let mut workflow = Workflow::new("obs", "observe things");
        let first = Task::new("a", "first").with_id(TaskId::new("t-a"));
        let mut second = Task::new("b", "second").with_id(TaskId::new("t-b"));
        second.status = TaskStatus::Completed;
        workflow.add_task(first).unwrap();
        workflow.add_task(second).unwrap();
        workflow
            .add_agent(AgentProfile::ai_worker("coder").with_id(foreman_types::AgentId::new("w-1")))
            .unwrap();
        workflow
    }

    #[test]
    fn test_observation_buckets_and_sorts_tasks() {
        let workflow = make_workflow();
        let comms = CommsService::new();
        let actions = ActionBuffer::default();
        let config = EngineConfig::default().with_max_timesteps(10);

        let obs = build_observation(
            &workflow,
            &comms,
            &actions,
            None,
            3,
            RunState::Running,
            &config,
        );
        assert_eq!(obs.pending_task_ids, vec![TaskId::new("t-a")]);
        assert_eq!(obs.completed_task_ids, vec![TaskId::new("t-b")]);
        assert_eq!(obs.timesteps_remaining, 7);
        assert!((obs.time_progress - 0.3).abs() < 1e-9);
        assert!((obs.workflow_progress - 0.5).abs() < 1e-9);
        assert_eq!(obs.agents.len(), 1);
        assert!(!obs.end_requested);
        assert!(obs.stakeholder_profile.is_none());
    }

    #[test]
    fn test_end_request_surfaces_in_observation() {
        let workflow = make_workflow();
        let comms = CommsService::new();
        comms.request_end(Some("budget exhausted".into()), 2).unwrap();

        let obs = build_observation(
            &workflow,
            &comms,
            &ActionBuffer::default(),
            None,
            2,
            RunState::Running,
            &EngineConfig::default(),
        );
        assert!(obs.end_requested);
    }
}
