//! Declarative context assembly for criteria
//!
//! Criteria name the slices of run state they need; the engine gathers
//! everything once per tick into `ContextSources` and hands each criterion
//! only what it asked for.

use foreman_comms::SenderDigest;
use foreman_preferences::{PreferenceChange, StakeholderPublicProfile};
use foreman_types::{
    ActionRecord, AgentSummary, Message, MessageId, Resource, TaskId, ToolUseEvent, Workflow,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ── Context Items ────────────────────────────────────────────────────

/// A slice of run state a criterion can request
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextItem {
    /// Recent controller actions and their outcomes
    ManagerActions,
    /// All messages grouped per sender
    CommsBySender,
    /// All messages grouped per conversation thread
    CommsByThread,
    /// Applied preference weight changes so far
    PreferenceHistory,
    /// The stakeholder's public card
    StakeholderProfile,
    /// Output resources keyed by producing task
    ResourcesByTask,
    /// Tool invocations keyed by task
    ToolUsageByTask,
    /// Roster summaries for every agent
    AgentPublicStates,
}

// ── Sources ──────────────────────────────────────────────────────────

/// Everything assembled once per tick that criteria can draw from.
/// Slices a criterion did not request are never copied into its context.
#[derive(Clone, Debug, Default)]
pub struct ContextSources {
    pub timestep: u64,
    pub output_resources: Vec<Resource>,
    pub manager_actions: Vec<ActionRecord>,
    pub comms_by_sender: Vec<SenderDigest>,
    pub comms_by_thread: BTreeMap<MessageId, Vec<Message>>,
    pub preference_history: Vec<PreferenceChange>,
    pub stakeholder_profile: Option<StakeholderPublicProfile>,
    pub resources_by_task: BTreeMap<TaskId, Vec<Resource>>,
    pub tool_usage_by_task: BTreeMap<TaskId, Vec<ToolUseEvent>>,
    pub agent_public_states: Vec<AgentSummary>,
}

impl ContextSources {
    /// Seed the sources with what the workflow itself can provide:
    /// produced resources, their per-task grouping, and agent summaries.
    pub fn for_workflow(workflow: &Workflow, timestep: u64) -> Self {
        let mut agent_public_states: Vec<AgentSummary> = workflow
            .agents
            .values()
            .map(AgentSummary::from_profile)
            .collect();
        agent_public_states.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            timestep,
            output_resources: output_resources(workflow),
            resources_by_task: resources_by_task(workflow),
            agent_public_states,
            ..Self::default()
        }
    }

    pub fn with_manager_actions(mut self, actions: Vec<ActionRecord>) -> Self {
        self.manager_actions = actions;
        self
    }

    /// Group a message log by sender and by thread root.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        let mut by_sender: BTreeMap<_, Vec<Message>> = BTreeMap::new();
        let mut by_thread: BTreeMap<MessageId, Vec<Message>> = BTreeMap::new();
        for message in messages {
            let root = message
                .thread_id
                .clone()
                .unwrap_or_else(|| message.id.clone());
            by_thread.entry(root).or_default().push(message.clone());
            by_sender
                .entry(message.sender_id.clone())
                .or_default()
                .push(message);
        }
        self.comms_by_sender = by_sender
            .into_iter()
            .map(|(sender_id, messages)| SenderDigest {
                sender_id,
                message_count: messages.len(),
                messages,
            })
            .collect();
        self.comms_by_thread = by_thread;
        self
    }

    pub fn with_preference_history(mut self, history: Vec<PreferenceChange>) -> Self {
        self.preference_history = history;
        self
    }

    pub fn with_stakeholder_profile(mut self, profile: StakeholderPublicProfile) -> Self {
        self.stakeholder_profile = Some(profile);
        self
    }

    pub fn with_tool_usage(mut self, events: Vec<ToolUseEvent>) -> Self {
        let mut by_task: BTreeMap<TaskId, Vec<ToolUseEvent>> = BTreeMap::new();
        for event in events {
            by_task.entry(event.task_id.clone()).or_default().push(event);
        }
        self.tool_usage_by_task = by_task;
        self
    }

    /// Build the per-criterion view: timestep and output resources always
    /// travel; everything else only when requested.
    pub fn assemble(&self, required: &BTreeSet<ContextItem>) -> EvaluationContext {
        let mut context = EvaluationContext {
            timestep: self.timestep,
            output_resources: self.output_resources.clone(),
            ..EvaluationContext::default()
        };
        for item in required {
            match item {
                ContextItem::ManagerActions => {
                    context.manager_actions = self.manager_actions.clone();
                }
                ContextItem::CommsBySender => {
                    context.comms_by_sender = self.comms_by_sender.clone();
                }
                ContextItem::CommsByThread => {
                    context.comms_by_thread = self.comms_by_thread.clone();
                }
                ContextItem::PreferenceHistory => {
                    context.preference_history = self.preference_history.clone();
                }
                ContextItem::StakeholderProfile => {
                    context.stakeholder_profile = self.stakeholder_profile.clone();
                }
                ContextItem::ResourcesByTask => {
                    context.resources_by_task = self.resources_by_task.clone();
                }
                ContextItem::ToolUsageByTask => {
                    context.tool_usage_by_task = self.tool_usage_by_task.clone();
                }
                ContextItem::AgentPublicStates => {
                    context.agent_public_states = self.agent_public_states.clone();
                }
            }
        }
        context
    }
}

// ── Per-Criterion Context ────────────────────────────────────────────

/// The view one criterion evaluates against. Unrequested slices stay
/// empty.
#[derive(Clone, Debug, Default)]
pub struct EvaluationContext {
    pub timestep: u64,
    pub output_resources: Vec<Resource>,
    pub manager_actions: Vec<ActionRecord>,
    pub comms_by_sender: Vec<SenderDigest>,
    pub comms_by_thread: BTreeMap<MessageId, Vec<Message>>,
    pub preference_history: Vec<PreferenceChange>,
    pub stakeholder_profile: Option<StakeholderPublicProfile>,
    pub resources_by_task: BTreeMap<TaskId, Vec<Resource>>,
    pub tool_usage_by_task: BTreeMap<TaskId, Vec<ToolUseEvent>>,
    pub agent_public_states: Vec<AgentSummary>,
}

impl EvaluationContext {
    /// Output resources produced for one task
    pub fn resources_for(&self, task_id: &TaskId) -> &[Resource] {
        self.resources_by_task
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total characters of produced content, a cheap proxy for how much
    /// material there is to review
    pub fn content_chars(&self) -> usize {
        self.output_resources
            .iter()
            .filter_map(|r| r.content.as_ref())
            .map(|c| c.chars().count())
            .sum()
    }
}

// ── Workflow Projections ─────────────────────────────────────────────

/// Every resource referenced as a task output, in task-id order,
/// deduplicated when tasks share outputs.
pub fn output_resources(workflow: &Workflow) -> Vec<Resource> {
    let mut task_ids: Vec<&TaskId> = workflow.tasks.keys().collect();
    task_ids.sort();

    let mut seen = HashSet::new();
    let mut resources = Vec::new();
    for task_id in task_ids {
        let Some(task) = workflow.tasks.get(task_id) else {
            continue;
        };
        for resource_id in &task.output_resource_ids {
            if !seen.insert(resource_id.clone()) {
                continue;
            }
            if let Some(resource) = workflow.resources.get(resource_id) {
                resources.push(resource.clone());
            }
        }
    }
    resources
}

/// Output resources grouped per producing task
pub fn resources_by_task(workflow: &Workflow) -> BTreeMap<TaskId, Vec<Resource>> {
    let mut grouped = BTreeMap::new();
    for (task_id, task) in &workflow.tasks {
        let resolved: Vec<Resource> = task
            .output_resource_ids
            .iter()
            .filter_map(|id| workflow.resources.get(id).cloned())
            .collect();
        if !resolved.is_empty() {
            grouped.insert(task_id.clone(), resolved);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_types::{AgentId, ExecutionId, ResourceDraft, Task};

    fn make_workflow_with_output() -> (Workflow, TaskId) {
        let mut workflow = Workflow::new("demo", "ship it");
        let task = Task::new("write", "write the report");
        let task_id = task.id.clone();
        workflow.add_task(task).unwrap();

        let resource = ResourceDraft::new("report", "the report")
            .with_content("# Report\n\nFindings.")
            .into_resource(ExecutionId::new("x-ctx"));
        let resource_id = resource.id.clone();
        workflow.resources.insert(resource_id.clone(), resource);
        if let Some(task) = workflow.tasks.get_mut(&task_id) {
            task.output_resource_ids.push(resource_id);
        }
        (workflow, task_id)
    }

    #[test]
    fn test_assemble_copies_only_requested_items() {
        let (workflow, _) = make_workflow_with_output();
        let sources = ContextSources::for_workflow(&workflow, 4).with_messages(vec![
            Message::broadcast(AgentId::new("stakeholder"), "please hurry", 3),
        ]);

        let empty = sources.assemble(&BTreeSet::new());
        assert_eq!(empty.timestep, 4);
        assert_eq!(empty.output_resources.len(), 1);
        assert!(empty.comms_by_sender.is_empty());
        assert!(empty.resources_by_task.is_empty());

        let mut required = BTreeSet::new();
        required.insert(ContextItem::CommsBySender);
        required.insert(ContextItem::ResourcesByTask);
        let full = sources.assemble(&required);
        assert_eq!(full.comms_by_sender.len(), 1);
        assert_eq!(full.resources_by_task.len(), 1);
        assert!(full.manager_actions.is_empty());
    }

    #[test]
    fn test_messages_group_by_sender_and_thread() {
        let root = Message::direct(AgentId::new("mgr"), AgentId::new("worker"), "status?", 1);
        let root_id = root.id.clone();
        let reply = Message::direct(AgentId::new("worker"), AgentId::new("mgr"), "on it", 2)
            .with_thread(root_id.clone());

        let sources = ContextSources::default().with_messages(vec![root, reply]);
        assert_eq!(sources.comms_by_sender.len(), 2);
        assert_eq!(sources.comms_by_thread.len(), 1);
        assert_eq!(sources.comms_by_thread[&root_id].len(), 2);
    }

    #[test]
    fn test_output_resources_resolve_and_dedupe() {
        let (workflow, task_id) = make_workflow_with_output();
        let outputs = output_resources(&workflow);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "report");

        let grouped = resources_by_task(&workflow);
        assert_eq!(grouped[&task_id].len(), 1);
    }

    #[test]
    fn test_content_chars_counts_resource_bodies() {
        let (workflow, _) = make_workflow_with_output();
        let context = ContextSources::for_workflow(&workflow, 0).assemble(&BTreeSet::new());
        assert!(context.content_chars() > 0);
    }
}
