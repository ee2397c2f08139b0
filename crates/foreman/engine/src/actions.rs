//! Applying controller actions to the workflow
//!
//! Every action resolves to exactly one `ActionOutcome`. Invalid moves
//! never panic and never leave the graph half-mutated; they come back as
//! failed outcomes the policy can read and react to.

use foreman_comms::CommsService;
use foreman_types::{
    validate, ActionKind, ActionOutcome, AgentId, AgentSummary, Task, TaskId, TaskStatus, Workflow,
};
use serde_json::json;

/// Apply one action at the current timestep. Errors are captured into a
/// `FailedAction` outcome rather than propagated; the tick always goes on.
pub fn apply_action(
    workflow: &mut Workflow,
    comms: &CommsService,
    manager_id: &AgentId,
    action: &ActionKind,
    timestep: u64,
) -> ActionOutcome {
    match try_apply(workflow, comms, manager_id, action, timestep) {
        Ok(outcome) => outcome,
        Err(message) => {
            tracing::warn!(
                action = action.label(),
                error = %message,
                "action could not be applied"
            );
            ActionOutcome::failed(action, message, timestep)
        }
    }
}

fn try_apply(
    workflow: &mut Workflow,
    comms: &CommsService,
    manager_id: &AgentId,
    action: &ActionKind,
    timestep: u64,
) -> Result<ActionOutcome, String> {
    match action {
        ActionKind::AssignTask { task_id, agent_id } => {
            assign_task(workflow, action, task_id, agent_id, timestep)
        }
        ActionKind::AssignAllPendingTasks { agent_id } => {
            assign_all_pending(workflow, action, agent_id.as_ref(), timestep)
        }
        ActionKind::CreateTask {
            name,
            description,
            estimated_duration_hours,
            estimated_cost,
            dependency_task_ids,
        } => {
            for dependency in dependency_task_ids {
                if !workflow.tasks.contains_key(dependency) {
                    return Err(format!("Unknown dependency task: {dependency}"));
                }
            }
            let mut task =
                Task::new(name, description).with_dependencies(dependency_task_ids.clone());
            if let Some(hours) = estimated_duration_hours {
                task = task.with_estimated_duration(*hours);
            }
            if let Some(cost) = estimated_cost {
                task = task.with_estimated_cost(*cost);
            }
            let task_id = task.id.clone();
            workflow.add_task(task).map_err(|e| e.to_string())?;
            Ok(
                ActionOutcome::mutation(action, format!("Created task '{name}'"), timestep)
                    .with_data(json!({ "task_id": task_id })),
            )
        }
        ActionKind::RemoveTask { task_id } => remove_task(workflow, action, task_id, timestep),
        ActionKind::RefineTask {
            task_id,
            new_name,
            new_description,
            new_estimated_duration_hours,
            new_estimated_cost,
            additional_instructions,
        } => {
            let task = workflow
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| format!("Task not found: {task_id}"))?;
            if task.status.is_terminal() {
                return Err(format!(
                    "Cannot refine task {task_id}: already {}",
                    task.status
                ));
            }
            let mut updated = 0;
            if let Some(name) = new_name {
                task.name = name.clone();
                updated += 1;
            }
            if let Some(description) = new_description {
                task.description = description.clone();
                updated += 1;
            }
            if let Some(hours) = new_estimated_duration_hours {
                task.estimated_duration_hours = Some(*hours);
                updated += 1;
            }
            if let Some(cost) = new_estimated_cost {
                task.estimated_cost = Some(*cost);
                updated += 1;
            }
            if let Some(instructions) = additional_instructions {
                task.set_manager_instructions(instructions);
                updated += 1;
            }
            let name = task.name.clone();
            Ok(ActionOutcome::mutation(
                action,
                format!("Refined task '{name}' ({updated} fields updated)"),
                timestep,
            ))
        }
        ActionKind::AddTaskDependency {
            prerequisite_task_id,
            dependent_task_id,
        } => add_dependency(
            workflow,
            action,
            prerequisite_task_id,
            dependent_task_id,
            timestep,
        ),
        ActionKind::RemoveTaskDependency {
            prerequisite_task_id,
            dependent_task_id,
        } => {
            let task = workflow
                .tasks
                .get_mut(dependent_task_id)
                .ok_or_else(|| format!("Task not found: {dependent_task_id}"))?;
            if !task.dependency_task_ids.contains(prerequisite_task_id) {
                return Ok(ActionOutcome::info(
                    action,
                    format!("{dependent_task_id} does not depend on {prerequisite_task_id}"),
                    timestep,
                ));
            }
            task.dependency_task_ids
                .retain(|id| id != prerequisite_task_id);
            Ok(ActionOutcome::mutation(
                action,
                format!("Removed dependency {prerequisite_task_id} -> {dependent_task_id}"),
                timestep,
            ))
        }
        ActionKind::DecomposeTask { task_id, subtasks } => {
            decompose_task(workflow, action, task_id, subtasks, timestep)
        }
        ActionKind::InspectTask { task_id } => {
            let task = workflow
                .tasks
                .get(task_id)
                .ok_or_else(|| format!("Task not found: {task_id}"))?;
            let data = serde_json::to_value(task).map_err(|e| e.to_string())?;
            Ok(
                ActionOutcome::inspection(action, task.summary_line(), timestep)
                    .with_data(data),
            )
        }
        ActionKind::SendMessage {
            content,
            recipient_id,
        } => match recipient_id {
            Some(recipient) => {
                if !workflow.agents.contains_key(recipient) {
                    return Err(format!("Unknown recipient: {recipient}"));
                }
                comms
                    .send_direct(manager_id.clone(), recipient.clone(), content, timestep)
                    .map_err(|e| e.to_string())?;
                Ok(ActionOutcome::message(
                    action,
                    format!("Sent message to {recipient}"),
                    timestep,
                ))
            }
            None => {
                comms
                    .send_broadcast(manager_id.clone(), content, timestep)
                    .map_err(|e| e.to_string())?;
                Ok(ActionOutcome::message(
                    action,
                    "Broadcast message to all agents",
                    timestep,
                ))
            }
        },
        ActionKind::GetWorkflowStatus => {
            let counts = workflow.task_status_counts();
            let summary = format!(
                "Workflow '{}': {:.0}% complete, cost {:.2}, {:.2} simulated hours",
                workflow.name,
                workflow.progress() * 100.0,
                workflow.total_cost,
                workflow.total_simulated_hours,
            );
            Ok(ActionOutcome::info(action, summary, timestep).with_data(json!({
                "status_counts": counts,
                "progress": workflow.progress(),
                "total_cost": workflow.total_cost,
                "total_simulated_hours": workflow.total_simulated_hours,
                "is_complete": workflow.is_complete(),
            })))
        }
        ActionKind::GetAvailableAgents => {
            let summaries: Vec<AgentSummary> = workflow
                .available_agents()
                .into_iter()
                .map(AgentSummary::from_profile)
                .collect();
            let data = serde_json::to_value(&summaries).map_err(|e| e.to_string())?;
            Ok(ActionOutcome::info(
                action,
                format!("{} agents have spare capacity", summaries.len()),
                timestep,
            )
            .with_data(data))
        }
        ActionKind::GetPendingTasks => {
            let pending = unassigned_task_ids(workflow);
            Ok(ActionOutcome::info(
                action,
                format!("{} tasks awaiting assignment", pending.len()),
                timestep,
            )
            .with_data(json!({ "task_ids": pending })))
        }
        ActionKind::NoOp => Ok(ActionOutcome::noop(action, "No action taken", timestep)),
        ActionKind::RequestEndWorkflow { reason } => {
            comms
                .request_end(reason.clone(), timestep)
                .map_err(|e| e.to_string())?;
            Ok(ActionOutcome::mutation(
                action,
                "Requested end of run at the next tick boundary",
                timestep,
            ))
        }
        ActionKind::Failed { reason } => Err(format!("Policy reported failure: {reason}")),
    }
}

// ── Assignment ───────────────────────────────────────────────────────

fn assign_task(
    workflow: &mut Workflow,
    action: &ActionKind,
    task_id: &TaskId,
    agent_id: &AgentId,
    timestep: u64,
) -> Result<ActionOutcome, String> {
    if !workflow.agents.contains_key(agent_id) {
        return Err(format!("Agent not found: {agent_id}"));
    }
    let task = workflow
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| format!("Task not found: {task_id}"))?;
    if task.is_composite() {
        return Err(format!(
            "Task {task_id} is composite; assign its subtasks instead"
        ));
    }
    if task.status.is_terminal() {
        return Err(format!("Task {task_id} is already {}", task.status));
    }
    if task.assigned_agent_ids.contains(agent_id) {
        return Ok(ActionOutcome::info(
            action,
            format!("Task '{}' is already assigned to {agent_id}", task.name),
            timestep,
        ));
    }
    task.assigned_agent_ids.push(agent_id.clone());
    let name = task.name.clone();
    Ok(ActionOutcome::mutation(
        action,
        format!("Assigned task '{name}' to {agent_id}"),
        timestep,
    )
    .with_data(json!({ "task_id": task_id, "agent_id": agent_id })))
}

fn assign_all_pending(
    workflow: &mut Workflow,
    action: &ActionKind,
    agent_id: Option<&AgentId>,
    timestep: u64,
) -> Result<ActionOutcome, String> {
    let target = match agent_id {
        Some(id) => {
            if !workflow.agents.contains_key(id) {
                return Err(format!("Agent not found: {id}"));
            }
            id.clone()
        }
        None => workflow
            .available_agents()
            .first()
            .map(|a| a.id.clone())
            .ok_or_else(|| "No available agent to assign tasks to".to_string())?,
    };

    let assigned = unassigned_task_ids(workflow);
    if assigned.is_empty() {
        return Ok(ActionOutcome::info(
            action,
            "No unassigned tasks to hand out",
            timestep,
        ));
    }
    for task_id in &assigned {
        if let Some(task) = workflow.tasks.get_mut(task_id) {
            task.assigned_agent_ids.push(target.clone());
        }
    }
    Ok(ActionOutcome::mutation(
        action,
        format!("Assigned {} tasks to {target}", assigned.len()),
        timestep,
    )
    .with_data(json!({ "task_ids": assigned, "agent_id": target })))
}

/// Atomic tasks that are neither finished nor assigned to anyone
fn unassigned_task_ids(workflow: &Workflow) -> Vec<TaskId> {
    let mut ids: Vec<TaskId> = workflow
        .tasks
        .values()
        .filter(|t| t.is_atomic() && !t.status.is_terminal() && t.assigned_agent_ids.is_empty())
        .map(|t| t.id.clone())
        .collect();
    ids.sort();
    ids
}

// ── Graph Surgery ────────────────────────────────────────────────────

fn remove_task(
    workflow: &mut Workflow,
    action: &ActionKind,
    task_id: &TaskId,
    timestep: u64,
) -> Result<ActionOutcome, String> {
    let task = workflow
        .tasks
        .get(task_id)
        .ok_or_else(|| format!("Task not found: {task_id}"))?;
    if task.status == TaskStatus::Running {
        return Err(format!("Cannot remove task {task_id} while it is running"));
    }
    let name = task.name.clone();
    workflow.tasks.remove(task_id);

    // Scrub every reference so the graph stays consistent.
    for task in workflow.tasks.values_mut() {
        task.dependency_task_ids.retain(|id| id != task_id);
        task.subtask_ids.retain(|id| id != task_id);
        if task.parent_id.as_ref() == Some(task_id) {
            task.parent_id = None;
        }
    }
    Ok(ActionOutcome::mutation(
        action,
        format!("Removed task '{name}'"),
        timestep,
    ))
}

fn add_dependency(
    workflow: &mut Workflow,
    action: &ActionKind,
    prerequisite: &TaskId,
    dependent: &TaskId,
    timestep: u64,
) -> Result<ActionOutcome, String> {
    if prerequisite == dependent {
        return Err(format!("Task cannot depend on itself: {dependent}"));
    }
    if !workflow.tasks.contains_key(prerequisite) {
        return Err(format!("Task not found: {prerequisite}"));
    }
    {
        let task = workflow
            .tasks
            .get_mut(dependent)
            .ok_or_else(|| format!("Task not found: {dependent}"))?;
        if task.dependency_task_ids.contains(prerequisite) {
            return Ok(ActionOutcome::info(
                action,
                format!("{dependent} already depends on {prerequisite}"),
                timestep,
            ));
        }
        task.dependency_task_ids.push(prerequisite.clone());
    }
    // Roll the edge back if it closed a cycle.
    if let Err(error) = validate(workflow) {
        if let Some(task) = workflow.tasks.get_mut(dependent) {
            task.dependency_task_ids.retain(|id| id != prerequisite);
        }
        return Err(error.to_string());
    }
    Ok(ActionOutcome::mutation(
        action,
        format!("Added dependency {prerequisite} -> {dependent}"),
        timestep,
    ))
}

fn decompose_task(
    workflow: &mut Workflow,
    action: &ActionKind,
    task_id: &TaskId,
    subtasks: &[foreman_types::SubtaskSpec],
    timestep: u64,
) -> Result<ActionOutcome, String> {
    let parent = workflow
        .tasks
        .get(task_id)
        .ok_or_else(|| format!("Task not found: {task_id}"))?;
    if parent.status.is_terminal() {
        return Err(format!(
            "Cannot decompose task {task_id}: already {}",
            parent.status
        ));
    }
    if parent.status == TaskStatus::Running {
        return Err(format!(
            "Cannot decompose task {task_id} while it is running"
        ));
    }
    if parent.is_composite() {
        return Ok(ActionOutcome::info(
            action,
            format!("Task {task_id} is already decomposed"),
            timestep,
        ));
    }
    if subtasks.is_empty() {
        return Err("Decomposition requires at least one subtask".to_string());
    }
    for (position, spec) in subtasks.iter().enumerate() {
        for index in &spec.dependency_indices {
            if *index >= position {
                return Err(format!(
                    "Subtask '{}' may only depend on earlier subtasks (index {index})",
                    spec.name
                ));
            }
        }
    }
    let parent_name = parent.name.clone();

    let mut child_ids: Vec<TaskId> = Vec::with_capacity(subtasks.len());
    for spec in subtasks {
        let deps = spec
            .dependency_indices
            .iter()
            .map(|index| child_ids[*index].clone())
            .collect();
        let mut child = Task::new(&spec.name, &spec.description)
            .with_parent(task_id.clone())
            .with_dependencies(deps);
        if let Some(hours) = spec.estimated_duration_hours {
            child = child.with_estimated_duration(hours);
        }
        if let Some(cost) = spec.estimated_cost {
            child = child.with_estimated_cost(cost);
        }
        child_ids.push(child.id.clone());
        workflow.add_task(child).map_err(|e| e.to_string())?;
    }
    if let Some(parent) = workflow.tasks.get_mut(task_id) {
        parent.subtask_ids = child_ids.clone();
    }
    Ok(ActionOutcome::mutation(
        action,
        format!(
            "Decomposed task '{parent_name}' into {} subtasks",
            child_ids.len()
        ),
        timestep,
    )
    .with_data(json!({ "subtask_ids": child_ids })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_types::{AgentProfile, OutcomeKind, SubtaskSpec};

    fn make_workflow() -> (Workflow, TaskId, AgentId) {
        let mut workflow = Workflow::new("ops", "run the sprint");
        let task = Task::new("draft", "draft the plan").with_id(TaskId::new("t-draft"));
        let task_id = task.id.clone();
        workflow.add_task(task).unwrap();
        let agent_id = AgentId::new("w-1");
        workflow
            .add_agent(AgentProfile::ai_worker("coder").with_id(agent_id.clone()))
            .unwrap();
        (workflow, task_id, agent_id)
    }

    fn apply(workflow: &mut Workflow, action: ActionKind) -> ActionOutcome {
        let comms = CommsService::new();
        apply_action(workflow, &comms, &AgentId::new("manager"), &action, 0)
    }

    #[test]
    fn test_assign_task_records_agent() {
        let (mut workflow, task_id, agent_id) = make_workflow();
        let outcome = apply(
            &mut workflow,
            ActionKind::AssignTask {
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::Mutation);
        assert_eq!(
            workflow.tasks[&task_id].assigned_agent_ids,
            vec![agent_id.clone()]
        );

        // Assigning again is an informational no-op, not a failure.
        let again = apply(
            &mut workflow,
            ActionKind::AssignTask { task_id, agent_id },
        );
        assert_eq!(again.kind, OutcomeKind::Info);
    }

    #[test]
    fn test_assign_to_unknown_agent_fails_cleanly() {
        let (mut workflow, task_id, _) = make_workflow();
        let outcome = apply(
            &mut workflow,
            ActionKind::AssignTask {
                task_id: task_id.clone(),
                agent_id: AgentId::new("ghost"),
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::FailedAction);
        assert!(!outcome.success);
        assert!(workflow.tasks[&task_id].assigned_agent_ids.is_empty());
    }

    #[test]
    fn test_assign_all_pending_picks_first_available_agent() {
        let (mut workflow, task_id, agent_id) = make_workflow();
        let second = Task::new("review", "review the plan").with_id(TaskId::new("t-review"));
        workflow.add_task(second).unwrap();

        let outcome = apply(
            &mut workflow,
            ActionKind::AssignAllPendingTasks { agent_id: None },
        );
        assert_eq!(outcome.kind, OutcomeKind::Mutation);
        assert_eq!(workflow.tasks[&task_id].assigned_agent_ids, vec![agent_id]);
        assert_eq!(
            workflow.tasks[&TaskId::new("t-review")]
                .assigned_agent_ids
                .len(),
            1
        );
    }

    #[test]
    fn test_create_task_rejects_unknown_dependency() {
        let (mut workflow, _, _) = make_workflow();
        let outcome = apply(
            &mut workflow,
            ActionKind::CreateTask {
                name: "orphan".into(),
                description: "depends on nothing real".into(),
                estimated_duration_hours: None,
                estimated_cost: None,
                dependency_task_ids: vec![TaskId::new("missing")],
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::FailedAction);
        assert_eq!(workflow.tasks.len(), 1);
    }

    #[test]
    fn test_remove_task_scrubs_references() {
        let (mut workflow, task_id, _) = make_workflow();
        let dependent = Task::new("publish", "publish the plan")
            .with_id(TaskId::new("t-publish"))
            .with_dependencies(vec![task_id.clone()]);
        workflow.add_task(dependent).unwrap();

        let outcome = apply(&mut workflow, ActionKind::RemoveTask { task_id });
        assert_eq!(outcome.kind, OutcomeKind::Mutation);
        assert!(workflow.tasks[&TaskId::new("t-publish")]
            .dependency_task_ids
            .is_empty());
    }

    #[test]
    fn test_cycle_creating_dependency_rolls_back() {
        let (mut workflow, task_id, _) = make_workflow();
        let second = Task::new("review", "review")
            .with_id(TaskId::new("t-review"))
            .with_dependencies(vec![task_id.clone()]);
        workflow.add_task(second).unwrap();

        let outcome = apply(
            &mut workflow,
            ActionKind::AddTaskDependency {
                prerequisite_task_id: TaskId::new("t-review"),
                dependent_task_id: task_id.clone(),
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::FailedAction);
        assert!(workflow.tasks[&task_id].dependency_task_ids.is_empty());
    }

    #[test]
    fn test_decompose_builds_sibling_chain() {
        let (mut workflow, task_id, _) = make_workflow();
        let outcome = apply(
            &mut workflow,
            ActionKind::DecomposeTask {
                task_id: task_id.clone(),
                subtasks: vec![
                    SubtaskSpec::new("outline", "sketch sections"),
                    SubtaskSpec::new("write", "fill in the outline")
                        .with_dependency_indices(vec![0]),
                ],
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::Mutation);

        let parent = &workflow.tasks[&task_id];
        assert!(parent.is_composite());
        assert_eq!(parent.subtask_ids.len(), 2);

        let write_id = &parent.subtask_ids[1];
        assert_eq!(
            workflow.tasks[write_id].dependency_task_ids,
            vec![parent.subtask_ids[0].clone()]
        );
        assert_eq!(
            workflow.tasks[write_id].parent_id.as_ref(),
            Some(&task_id)
        );
    }

    #[test]
    fn test_decompose_rejects_forward_reference() {
        let (mut workflow, task_id, _) = make_workflow();
        let outcome = apply(
            &mut workflow,
            ActionKind::DecomposeTask {
                task_id: task_id.clone(),
                subtasks: vec![
                    SubtaskSpec::new("a", "first").with_dependency_indices(vec![1]),
                    SubtaskSpec::new("b", "second"),
                ],
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::FailedAction);
        assert!(workflow.tasks[&task_id].subtask_ids.is_empty());
        assert_eq!(workflow.tasks.len(), 1);
    }

    #[test]
    fn test_send_message_requires_known_recipient() {
        let (mut workflow, _, agent_id) = make_workflow();
        let comms = CommsService::new();
        let manager = AgentId::new("manager");

        let direct = apply_action(
            &mut workflow,
            &comms,
            &manager,
            &ActionKind::SendMessage {
                content: "status please".into(),
                recipient_id: Some(agent_id),
            },
            1,
        );
        assert_eq!(direct.kind, OutcomeKind::Message);
        assert_eq!(comms.len().unwrap(), 1);

        let unknown = apply_action(
            &mut workflow,
            &comms,
            &manager,
            &ActionKind::SendMessage {
                content: "hello?".into(),
                recipient_id: Some(AgentId::new("ghost")),
            },
            1,
        );
        assert_eq!(unknown.kind, OutcomeKind::FailedAction);
        assert_eq!(comms.len().unwrap(), 1);
    }

    #[test]
    fn test_request_end_raises_comms_flag() {
        let (mut workflow, _, _) = make_workflow();
        let comms = CommsService::new();
        let outcome = apply_action(
            &mut workflow,
            &comms,
            &AgentId::new("manager"),
            &ActionKind::RequestEndWorkflow {
                reason: Some("scope met early".into()),
            },
            4,
        );
        assert!(outcome.success);
        assert!(comms.end_requested().unwrap());
        let request = comms.end_request().unwrap().unwrap();
        assert_eq!(request.requested_at_timestep, 4);
    }

    #[test]
    fn test_inspect_returns_full_task_payload() {
        let (mut workflow, task_id, _) = make_workflow();
        let outcome = apply(&mut workflow, ActionKind::InspectTask { task_id });
        assert_eq!(outcome.kind, OutcomeKind::Inspection);
        assert_eq!(outcome.data["name"], "draft");
    }

    #[test]
    fn test_failed_action_is_recorded_not_propagated() {
        let (mut workflow, _, _) = make_workflow();
        let outcome = apply(
            &mut workflow,
            ActionKind::Failed {
                reason: "could not parse model output".into(),
            },
        );
        assert_eq!(outcome.kind, OutcomeKind::FailedAction);
        assert!(outcome.summary.contains("could not parse"));
    }
}
