//! The discrete-timestep simulation loop
//!
//! # Key Concepts
//!
//! - `SimulationEngine`: owns the workflow and every collaborator for one
//!   run and advances them tick by tick
//! - Tick order: roster changes, observation, one policy action, the
//!   execution barrier, readiness spawning, derived-state refresh, the
//!   stakeholder step, evaluation, recording
//! - The barrier collects whatever finished since the last tick; on
//!   timeout the stragglers stay in flight and are re-collected next tick
//! - `run` drives ticks to completion, cancellation, or the horizon, then
//!   runs the completion-cadence evaluation exactly once

use crate::{
    actions::apply_action, observe::build_observation, EngineConfig, EngineError, EngineResult,
    JsonlRunRecorder, ManagerPolicy, NullRecorder, RunRecorder, RunSnapshot, RunSummary,
    TickReport, SNAPSHOT_VERSION,
};
use chrono::Utc;
use foreman_comms::CommsService;
use foreman_evaluation::{
    ContextSources, EvaluationEngine, EvaluationSuite, JudgeBackend, RewardProjection,
    RunCondition,
};
use foreman_preferences::{PreferenceChange, PreferenceWeights, StakeholderAgent};
use foreman_roster::{AgentRegistry, WorkContext, WorkerAgent};
use foreman_types::{
    compute_ready, refresh_derived_state, validate, ActionBuffer, ActionRecord, AgentId,
    ExecutionId, OutputSelection, Resource, ResourceId, RunState, Task, TaskExecution, TaskId,
    TaskOutcome, TaskStatus, Workflow,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

type TickCallback = Box<dyn FnMut(&TickReport) -> Result<(), String> + Send>;

/// Tracks one task's concurrent variant attempts until all have reported
struct VariantGroup {
    expected: usize,
    finished: usize,
}

/// Collected per-variant data used when a task's attempt set finishes
struct VariantResult {
    execution_id: ExecutionId,
    output_resource_ids: Vec<ResourceId>,
    cost: f64,
    duration_hours: f64,
}

// ── Engine ───────────────────────────────────────────────────────────

/// One simulation run: the workflow, its collaborators, and the loop
pub struct SimulationEngine {
    config: EngineConfig,
    workflow: Workflow,
    comms: Arc<CommsService>,
    registry: AgentRegistry,
    stakeholder: Option<StakeholderAgent>,
    policy: Box<dyn ManagerPolicy>,
    manager_id: AgentId,
    actions: ActionBuffer,
    run_state: RunState,
    timestep: u64,
    evaluation: EvaluationEngine,
    suite: EvaluationSuite,
    in_flight: JoinSet<(ExecutionId, TaskOutcome)>,
    in_flight_ids: HashMap<tokio::task::Id, ExecutionId>,
    variant_groups: HashMap<TaskId, VariantGroup>,
    /// Agents the registry introduced, so pruning never touches profiles
    /// added directly to the workflow
    registry_agent_ids: HashSet<AgentId>,
    recorder: Box<dyn RunRecorder>,
    callbacks: Vec<TickCallback>,
    reports: Vec<TickReport>,
}

impl SimulationEngine {
    /// Build an engine over a validated workflow. Rejects graphs with
    /// cycles or dangling references up front.
    pub fn new(
        config: EngineConfig,
        mut workflow: Workflow,
        policy: Box<dyn ManagerPolicy>,
    ) -> EngineResult<Self> {
        validate(&workflow).map_err(EngineError::InvalidGraph)?;
        let manager_id = workflow
            .manager_agent_id
            .clone()
            .unwrap_or_else(|| AgentId::new("manager"));
        workflow.manager_agent_id = Some(manager_id.clone());

        let recorder: Box<dyn RunRecorder> = match &config.output_dir {
            Some(dir) => Box::new(JsonlRunRecorder::new(dir)?),
            None => Box::new(NullRecorder),
        };
        let evaluation = EvaluationEngine::new(&config.evaluation);
        let actions = ActionBuffer::new(config.action_buffer_capacity);
        Ok(Self {
            config,
            workflow,
            comms: Arc::new(CommsService::new()),
            registry: AgentRegistry::new(),
            stakeholder: None,
            policy,
            manager_id,
            actions,
            run_state: RunState::Initialized,
            timestep: 0,
            evaluation,
            suite: EvaluationSuite::new(),
            in_flight: JoinSet::new(),
            in_flight_ids: HashMap::new(),
            variant_groups: HashMap::new(),
            registry_agent_ids: HashSet::new(),
            recorder,
            callbacks: Vec::new(),
            reports: Vec::new(),
        })
    }

    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_stakeholder(mut self, stakeholder: StakeholderAgent) -> Self {
        self.stakeholder = Some(stakeholder);
        self
    }

    /// Install the evaluation suite after checking it is well formed
    pub fn with_suite(mut self, suite: EvaluationSuite) -> EngineResult<Self> {
        suite.validate()?;
        self.suite = suite;
        Ok(self)
    }

    /// Swap the judge backend. Resets evaluation history, so call before
    /// the first tick.
    pub fn with_judge(mut self, judge: Arc<dyn JudgeBackend>) -> Self {
        self.evaluation = EvaluationEngine::with_judge(&self.config.evaluation, judge);
        self
    }

    pub fn with_reward_projection(mut self, projection: RewardProjection) -> Self {
        self.evaluation = std::mem::take(&mut self.evaluation).with_projection(projection);
        self
    }

    pub fn with_recorder(mut self, recorder: Box<dyn RunRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Register a per-tick callback. Failures are logged and ignored.
    pub fn with_callback(
        mut self,
        callback: impl FnMut(&TickReport) -> Result<(), String> + Send + 'static,
    ) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn state(&self) -> RunState {
        self.run_state
    }

    pub fn manager_id(&self) -> &AgentId {
        &self.manager_id
    }

    pub fn evaluation(&self) -> &EvaluationEngine {
        &self.evaluation
    }

    pub fn reports(&self) -> &[TickReport] {
        &self.reports
    }

    pub fn comms(&self) -> Arc<CommsService> {
        Arc::clone(&self.comms)
    }

    // ── Tick ─────────────────────────────────────────────────────────

    /// Advance the run by exactly one timestep
    pub async fn tick(&mut self) -> EngineResult<TickReport> {
        if self.run_state.is_terminal() {
            return Err(EngineError::RunTerminal(self.run_state));
        }
        let tick_started = std::time::Instant::now();
        let timestep = self.timestep;
        let statuses_before: HashMap<TaskId, TaskStatus> = self
            .workflow
            .tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.status))
            .collect();

        // 1. Due roster changes, mirrored into the workflow
        let roster_changes = self.registry.apply_due_changes(timestep);
        self.mirror_roster();

        // 2. Observation and one policy decision
        self.run_state = RunState::WaitingForManager;
        let observation = build_observation(
            &self.workflow,
            &self.comms,
            &self.actions,
            self.stakeholder.as_ref(),
            timestep,
            self.run_state,
            &self.config,
        );
        let action = self.policy.step(&observation).await;

        // 3. Apply the action and record the outcome
        self.run_state = RunState::Running;
        let outcome = apply_action(
            &mut self.workflow,
            &self.comms,
            &self.manager_id,
            &action.kind,
            timestep,
        );
        let record = ActionRecord {
            timestep,
            action,
            outcome,
        };
        self.actions.push(record.clone());
        self.policy.on_action_result(&record).await;

        // 4. Collect finished executions at the barrier
        self.run_state = RunState::ExecutingTasks;
        let finished_groups = self.collect_executions().await;
        for task_id in finished_groups {
            self.finalize_task(&task_id).await;
        }

        // 5. Start everything that just became startable
        self.spawn_ready();

        // 6. Propagate completion through composites
        let now = Utc::now();
        refresh_derived_state(&mut self.workflow, now);
        if self.workflow.is_complete() && self.workflow.completed_at.is_none() {
            self.workflow.completed_at = Some(now);
        }

        // 7. Stakeholder reacts to the tick (skipped at t=0, before any
        // work has happened)
        let mut preference_changes: Vec<PreferenceChange> = Vec::new();
        if timestep > 0 {
            if let Some(stakeholder) = self.stakeholder.as_mut() {
                match stakeholder.policy_step(timestep, &self.comms) {
                    Ok(changes) => preference_changes = changes,
                    Err(error) => {
                        tracing::warn!(error = %error, timestep, "stakeholder step failed");
                    }
                }
            }
        }

        // 8. Evaluate whatever is due this tick
        self.sync_messages();
        self.run_state = RunState::Running;
        let evaluation = if self.suite.is_empty() {
            None
        } else {
            let sources = self.build_sources();
            let weights = self.current_weights();
            Some(
                self.evaluation
                    .evaluate_tick(
                        &self.workflow,
                        timestep,
                        RunCondition::EachTimestep,
                        &weights,
                        &self.suite,
                        &sources,
                    )
                    .await,
            )
        };

        // 9. Report, record, advance
        let mut completed_task_ids = Vec::new();
        let mut failed_task_ids = Vec::new();
        for (id, task) in &self.workflow.tasks {
            if statuses_before.get(id).copied() == Some(task.status) {
                continue;
            }
            match task.status {
                TaskStatus::Completed => completed_task_ids.push(id.clone()),
                TaskStatus::Failed => failed_task_ids.push(id.clone()),
                _ => {}
            }
        }
        completed_task_ids.sort();
        failed_task_ids.sort();

        let report = TickReport {
            timestep,
            run_state: self.run_state,
            action: Some(record),
            roster_changes,
            completed_task_ids,
            failed_task_ids,
            evaluation,
            preference_changes,
            status_counts: self.workflow.task_status_counts(),
            total_cost: self.workflow.total_cost,
            total_simulated_hours: self.workflow.total_simulated_hours,
            wall_time_ms: tick_started.elapsed().as_millis() as u64,
        };
        if let Err(error) = self.recorder.record_tick(&report) {
            tracing::warn!(error = %error, timestep, "tick recorder failed");
        }
        for callback in &mut self.callbacks {
            if let Err(error) = callback(&report) {
                tracing::warn!(error = %error, timestep, "tick callback failed");
            }
        }
        self.reports.push(report.clone());
        self.timestep += 1;
        Ok(report)
    }

    // ── Run Loop ─────────────────────────────────────────────────────

    /// Tick until the workflow completes, the run is cancelled, or the
    /// horizon is exhausted, then evaluate completion-cadence criteria
    /// and emit the summary.
    pub async fn run(&mut self) -> EngineResult<RunSummary> {
        if self.run_state.is_terminal() {
            return Err(EngineError::RunTerminal(self.run_state));
        }
        self.run_state = RunState::Running;
        tracing::info!(
            workflow = %self.workflow.id,
            max_timesteps = self.config.max_timesteps,
            "run started"
        );

        while self.timestep < self.config.max_timesteps {
            self.tick().await?;
            // Completion wins over a pending cancellation raised the
            // same tick.
            if self.workflow.is_complete() {
                self.run_state = RunState::Completed;
                break;
            }
            if self.comms.end_requested()? {
                self.run_state = RunState::Cancelled;
                break;
            }
        }
        if !self.run_state.is_terminal() {
            self.run_state = if self.workflow.is_complete() {
                RunState::Completed
            } else {
                RunState::Failed
            };
        }
        self.workflow.is_active = false;
        if self.workflow.completed_at.is_none() {
            self.workflow.completed_at = Some(Utc::now());
        }

        // Terminal evaluation runs on every exit path.
        let final_evaluation = if self.suite.is_empty() {
            None
        } else {
            let sources = self.build_sources();
            let weights = self.current_weights();
            Some(
                self.evaluation
                    .evaluate_tick(
                        &self.workflow,
                        self.timestep,
                        RunCondition::OnCompletion,
                        &weights,
                        &self.suite,
                        &sources,
                    )
                    .await,
            )
        };

        let status_counts = self.workflow.task_status_counts();
        let summary = RunSummary {
            workflow_id: self.workflow.id.clone(),
            workflow_name: self.workflow.name.clone(),
            run_state: self.run_state,
            timesteps_executed: self.timestep,
            progress: self.workflow.progress(),
            total_cost: self.workflow.total_cost,
            total_simulated_hours: self.workflow.total_simulated_hours,
            completed_tasks: status_counts.get("completed").copied().unwrap_or(0),
            failed_tasks: status_counts.get("failed").copied().unwrap_or(0),
            reward_series: self.evaluation.reward_series().to_vec(),
            most_recent_reward: self.evaluation.most_recent_reward(),
            final_evaluation,
        };
        tracing::info!(
            state = %self.run_state,
            timesteps = self.timestep,
            cost = self.workflow.total_cost,
            "run finished"
        );
        if let Err(error) = self.recorder.record_summary(&summary) {
            tracing::warn!(error = %error, "summary recorder failed");
        }
        Ok(summary)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Capture the run at the current tick boundary. Refused while
    /// executions are in flight, since those cannot be serialized.
    pub fn capture(&mut self) -> EngineResult<RunSnapshot> {
        if !self.in_flight.is_empty() {
            return Err(EngineError::InFlightWork(self.in_flight.len()));
        }
        self.sync_messages();
        Ok(RunSnapshot {
            version: SNAPSHOT_VERSION,
            captured_at: Utc::now(),
            timestep: self.timestep,
            run_state: self.run_state,
            seed: self.config.seed,
            workflow: self.workflow.clone(),
            messages: self.workflow.messages.clone(),
            end_request: self.comms.end_request()?,
            action_records: self
                .actions
                .recent(self.actions.capacity())
                .into_iter()
                .cloned()
                .collect(),
            action_capacity: self.actions.capacity(),
            preference_timeline: self.stakeholder.as_ref().map(|s| s.timeline().clone()),
        })
    }

    /// Replace this engine's run state with a snapshot's. The engine may
    /// carry a different suite or judge than the one that produced the
    /// snapshot; evaluation history starts fresh.
    pub fn restore(&mut self, snapshot: RunSnapshot) -> EngineResult<()> {
        if !self.in_flight.is_empty() {
            return Err(EngineError::InFlightWork(self.in_flight.len()));
        }
        validate(&snapshot.workflow).map_err(EngineError::InvalidGraph)?;

        let message_count = snapshot.messages.len();
        self.comms.reset_with(snapshot.messages)?;
        if let Some(request) = snapshot.end_request {
            self.comms
                .request_end(request.reason, request.requested_at_timestep)?;
        }
        self.workflow = snapshot.workflow;
        self.manager_id = self
            .workflow
            .manager_agent_id
            .clone()
            .unwrap_or_else(|| AgentId::new("manager"));
        self.timestep = snapshot.timestep;
        self.run_state = snapshot.run_state;
        self.actions = ActionBuffer::new(snapshot.action_capacity);
        for record in snapshot.action_records {
            self.actions.push(record);
        }
        if let (Some(stakeholder), Some(timeline)) =
            (self.stakeholder.as_mut(), snapshot.preference_timeline)
        {
            stakeholder.restore(timeline, snapshot.timestep, message_count);
        }
        self.evaluation.reset();
        self.in_flight_ids.clear();
        self.variant_groups.clear();
        self.reports.clear();
        tracing::info!(timestep = self.timestep, "run state restored from snapshot");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Mirror registry workers into the workflow roster and prune the
    /// ones the registry has dropped. Profiles already in the workflow
    /// keep their runtime fields.
    fn mirror_roster(&mut self) {
        for worker in self.registry.agents() {
            let id = worker.id().clone();
            self.registry_agent_ids.insert(id.clone());
            if !self.workflow.agents.contains_key(&id) {
                if let Err(error) = self.workflow.add_agent(worker.profile()) {
                    tracing::warn!(agent = %id, error = %error, "could not mirror worker");
                }
            }
        }
        let departed: Vec<AgentId> = self
            .registry_agent_ids
            .iter()
            .filter(|id| !self.registry.contains(id))
            .cloned()
            .collect();
        for id in departed {
            self.registry_agent_ids.remove(&id);
            self.workflow.agents.remove(&id);
        }
        if let Some(stakeholder) = &self.stakeholder {
            if !self.workflow.agents.contains_key(stakeholder.id()) {
                if let Err(error) = self.workflow.add_agent(stakeholder.profile()) {
                    tracing::warn!(error = %error, "could not mirror stakeholder");
                }
            }
        }
    }

    /// Drain the barrier: join executions until none remain or the
    /// timeout budget runs out. Returns tasks whose whole attempt set
    /// finished.
    async fn collect_executions(&mut self) -> Vec<TaskId> {
        let deadline = tokio::time::Instant::now() + self.config.barrier_timeout();
        let mut finished_groups = Vec::new();
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.in_flight.join_next_with_id()).await {
                Ok(Some(Ok((id, (execution_id, outcome))))) => {
                    self.in_flight_ids.remove(&id);
                    if let Some(task_id) = self.merge_outcome(execution_id, outcome) {
                        finished_groups.push(task_id);
                    }
                }
                Ok(Some(Err(join_error))) => {
                    let Some(execution_id) = self.in_flight_ids.remove(&join_error.id()) else {
                        tracing::warn!(error = %join_error, "join failure with no recorded execution");
                        continue;
                    };
                    let outcome =
                        TaskOutcome::failure(format!("executor panicked: {join_error}"), 0.0, 0.0);
                    if let Some(task_id) = self.merge_outcome(execution_id, outcome) {
                        finished_groups.push(task_id);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        in_flight = self.in_flight.len(),
                        timeout_secs = self.config.barrier_timeout_secs,
                        "barrier timeout; carrying executions into the next tick"
                    );
                    break;
                }
            }
        }
        finished_groups
    }

    /// Record one finished execution: status, artifacts, totals, agent
    /// bookkeeping. Returns the task id when its whole variant group has
    /// now reported.
    fn merge_outcome(&mut self, execution_id: ExecutionId, outcome: TaskOutcome) -> Option<TaskId> {
        let TaskOutcome {
            success,
            resources,
            cost,
            duration_hours,
            error_message,
        } = outcome;

        let (task_id, agent_id) = {
            let Some(execution) = self.workflow.executions.get_mut(&execution_id) else {
                tracing::warn!(execution = %execution_id, "outcome for unknown execution dropped");
                return None;
            };
            if success {
                execution.complete(cost, duration_hours);
            } else {
                execution
                    .fail(error_message.unwrap_or_else(|| "execution failed".to_string()));
                execution.actual_cost = Some(cost);
                execution.actual_duration_hours = Some(duration_hours);
            }
            (execution.task_id.clone(), execution.agent_id.clone())
        };

        // Artifacts land in the arena even for failed attempts; selection
        // decides later what the task exposes.
        let mut resource_ids = Vec::with_capacity(resources.len());
        for draft in resources {
            let resource = draft.into_resource(execution_id.clone());
            resource_ids.push(resource.id.clone());
            self.workflow.resources.insert(resource.id.clone(), resource);
        }
        if let Some(execution) = self.workflow.executions.get_mut(&execution_id) {
            execution.output_resource_ids = resource_ids;
        }

        // Only successful work bills the workflow.
        if success {
            if self.workflow.tasks.contains_key(&task_id) {
                self.workflow.total_cost += cost;
                self.workflow.total_simulated_hours += duration_hours;
            } else {
                tracing::warn!(
                    task = %task_id,
                    execution = %execution_id,
                    "completed work for a task no longer in the workflow"
                );
            }
        }

        if let Some(profile) = self.workflow.agents.get_mut(&agent_id) {
            profile.current_task_ids.retain(|id| id != &task_id);
            if success {
                profile.tasks_completed += 1;
            }
        }

        match self.variant_groups.get_mut(&task_id) {
            Some(group) => {
                group.finished += 1;
                if group.finished >= group.expected {
                    self.variant_groups.remove(&task_id);
                    Some(task_id)
                } else {
                    None
                }
            }
            None => Some(task_id),
        }
    }

    /// Resolve a finished attempt set into task state: rank variants when
    /// evaluators are named, select outputs, and settle the task status.
    async fn finalize_task(&mut self, task_id: &TaskId) {
        let Some(task) = self.workflow.tasks.get(task_id) else {
            tracing::warn!(task = %task_id, "finished attempts for a removed task");
            return;
        };
        let evaluator_names = task.completion_evaluator_names.clone();
        let selection = task.output_selection;
        let execution_ids = task.execution_ids.clone();

        let mut successes: Vec<VariantResult> = Vec::new();
        let mut failure_notes: Vec<String> = Vec::new();
        let mut ordered: Vec<&TaskExecution> = execution_ids
            .iter()
            .filter_map(|id| self.workflow.executions.get(id))
            .collect();
        ordered.sort_by_key(|e| e.variant_index);
        for execution in ordered {
            if execution.is_success() {
                successes.push(VariantResult {
                    execution_id: execution.id.clone(),
                    output_resource_ids: execution.output_resource_ids.clone(),
                    cost: execution.actual_cost.unwrap_or(0.0),
                    duration_hours: execution.actual_duration_hours.unwrap_or(0.0),
                });
            } else if let Some(error) = &execution.error_message {
                failure_notes.push(error.clone());
            }
        }

        let now = Utc::now();
        if successes.is_empty() {
            if let Some(task) = self.workflow.tasks.get_mut(task_id) {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
                let note = match failure_notes.first() {
                    Some(error) if execution_ids.len() == 1 => format!("Failed: {error}"),
                    _ => format!("All {} attempts failed", execution_ids.len()),
                };
                task.add_note(note);
            }
            tracing::warn!(task = %task_id, attempts = execution_ids.len(), "task failed");
            return;
        }

        // Rank competing variants only when the task names evaluators.
        let mut selected: Vec<&VariantResult> = Vec::new();
        if successes.len() > 1 && !evaluator_names.is_empty() {
            let sources = self.build_sources();
            let mut aggregates: Vec<(usize, HashMap<String, f64>, f64)> = Vec::new();
            for (index, variant) in successes.iter().enumerate() {
                let bundle: Vec<Resource> = variant
                    .output_resource_ids
                    .iter()
                    .filter_map(|id| self.workflow.resources.get(id).cloned())
                    .collect();
                let mut scores = HashMap::new();
                for name in &evaluator_names {
                    match self.suite.rubric_named(name) {
                        Some(rubric) => {
                            let report = self
                                .evaluation
                                .score_resources(&self.workflow, rubric, &sources, &bundle)
                                .await;
                            scores.insert(name.clone(), report.aggregated_score);
                        }
                        None => {
                            tracing::warn!(evaluator = %name, task = %task_id, "unknown completion evaluator");
                        }
                    }
                }
                let aggregate = if scores.is_empty() {
                    0.0
                } else {
                    scores.values().sum::<f64>() / scores.len() as f64
                };
                aggregates.push((index, scores, aggregate));
            }
            // Stable sort: ties keep variant order.
            aggregates.sort_by(|a, b| {
                b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal)
            });

            for (rank_index, (variant_index, scores, aggregate)) in
                aggregates.iter().enumerate()
            {
                let execution_id = successes[*variant_index].execution_id.clone();
                if let Some(execution) = self.workflow.executions.get_mut(&execution_id) {
                    execution.evaluation_scores = scores.clone();
                    execution.aggregate_score = Some(*aggregate);
                    execution.rank = Some(rank_index as u32 + 1);
                }
            }

            let keep = match selection {
                OutputSelection::Best => 1,
                OutputSelection::TopK { k } => k.max(1),
                OutputSelection::All => aggregates.len(),
            };
            for (variant_index, _, _) in aggregates.iter().take(keep) {
                selected.push(&successes[*variant_index]);
            }
        } else {
            // No ranking: every successful variant's output propagates.
            selected.extend(successes.iter());
        }

        let output_resource_ids: Vec<ResourceId> = selected
            .iter()
            .flat_map(|v| v.output_resource_ids.iter().cloned())
            .collect();
        let total_cost: f64 = successes.iter().map(|v| v.cost).sum();
        let max_duration = successes
            .iter()
            .map(|v| v.duration_hours)
            .fold(0.0, f64::max);

        if let Some(task) = self.workflow.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            task.output_resource_ids = output_resource_ids;
            task.actual_cost = Some(total_cost);
            task.actual_duration_hours = Some(max_duration);
        }
        tracing::info!(
            task = %task_id,
            variants = successes.len(),
            cost = total_cost,
            "task completed"
        );
    }

    /// Mark startable tasks Ready and launch an execution per assigned
    /// agent. Tasks whose assigned agents are all unregistered stay Ready
    /// until the roster catches up.
    fn spawn_ready(&mut self) {
        let now = Utc::now();
        compute_ready(&mut self.workflow, now);

        let mut ready_ids: Vec<TaskId> = self
            .workflow
            .tasks
            .values()
            .filter(|t| t.is_atomic() && t.status == TaskStatus::Ready)
            .map(|t| t.id.clone())
            .collect();
        ready_ids.sort();

        for task_id in ready_ids {
            let assigned = match self.workflow.tasks.get(&task_id) {
                Some(task) => task.assigned_agent_ids.clone(),
                None => continue,
            };
            if assigned.is_empty() {
                continue;
            }
            let mut workers: Vec<Arc<dyn WorkerAgent>> = Vec::new();
            for agent_id in &assigned {
                match self.registry.agent(agent_id) {
                    Ok(worker) => workers.push(worker),
                    Err(_) => {
                        tracing::warn!(
                            task = %task_id,
                            agent = %agent_id,
                            "assigned agent is not registered; variant skipped"
                        );
                    }
                }
            }
            if workers.is_empty() {
                continue;
            }

            if let Some(task) = self.workflow.tasks.get_mut(&task_id) {
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
            }
            if self.workflow.started_at.is_none() {
                self.workflow.started_at = Some(now);
            }

            let mut spawned: Vec<(ExecutionId, Arc<dyn WorkerAgent>)> =
                Vec::with_capacity(workers.len());
            for (variant_index, worker) in workers.into_iter().enumerate() {
                let execution =
                    TaskExecution::start(task_id.clone(), worker.id().clone(), variant_index);
                let execution_id = execution.id.clone();
                self.workflow
                    .executions
                    .insert(execution_id.clone(), execution);
                if let Some(task) = self.workflow.tasks.get_mut(&task_id) {
                    task.execution_ids.push(execution_id.clone());
                }
                if let Some(profile) = self.workflow.agents.get_mut(worker.id()) {
                    if !profile.current_task_ids.contains(&task_id) {
                        profile.current_task_ids.push(task_id.clone());
                    }
                }
                spawned.push((execution_id, worker));
            }
            self.variant_groups.insert(
                task_id.clone(),
                VariantGroup {
                    expected: spawned.len(),
                    finished: 0,
                },
            );

            // Inputs resolve once per task; unknown ids are skipped.
            let inputs: Vec<Resource> = self
                .workflow
                .tasks
                .get(&task_id)
                .map(|task| {
                    task.input_resource_ids
                        .iter()
                        .filter_map(|id| self.workflow.resources.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default();
            let task_snapshot: Task = match self.workflow.tasks.get(&task_id) {
                Some(task) => task.clone(),
                None => continue,
            };
            tracing::info!(task = %task_id, variants = spawned.len(), "task started");

            for (execution_id, worker) in spawned {
                let task = task_snapshot.clone();
                let context = WorkContext::new(self.workflow.goal.clone(), Arc::clone(&self.comms))
                    .with_inputs(inputs.clone())
                    .with_manager(self.manager_id.clone())
                    .with_timestep(self.timestep);
                let moved_id = execution_id.clone();
                let handle = self.in_flight.spawn(async move {
                    let outcome = worker.execute_task(&task, &context).await;
                    (moved_id, outcome)
                });
                self.in_flight_ids.insert(handle.id(), execution_id);
            }
        }
    }

    /// Mirror the comms log onto the workflow so observations, snapshots
    /// and evaluation all see the same history
    fn sync_messages(&mut self) {
        match self.comms.messages_since(0) {
            Ok(messages) => self.workflow.messages = messages,
            Err(error) => tracing::warn!(error = %error, "could not sync message log"),
        }
    }

    fn current_weights(&self) -> PreferenceWeights {
        self.stakeholder
            .as_ref()
            .map(|s| s.weights_for(self.timestep).clone())
            .unwrap_or_default()
    }

    /// Assemble everything evaluation criteria can ask for this tick
    fn build_sources(&self) -> ContextSources {
        let messages = match self.comms.messages_since(0) {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(error = %error, "could not read message log for evaluation");
                Vec::new()
            }
        };
        let mut sources = ContextSources::for_workflow(&self.workflow, self.timestep)
            .with_manager_actions(
                self.actions
                    .recent(self.actions.capacity())
                    .into_iter()
                    .cloned()
                    .collect(),
            )
            .with_messages(messages)
            .with_tool_usage(
                self.registry
                    .agents()
                    .iter()
                    .flat_map(|worker| worker.tool_usage())
                    .collect(),
            );
        if let Some(stakeholder) = &self.stakeholder {
            sources = sources
                .with_preference_history(stakeholder.timeline().history().to_vec())
                .with_stakeholder_profile(stakeholder.public_profile(self.timestep));
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedPolicy;
    use foreman_roster::InstantWorker;
    use foreman_types::{ActionKind, AgentProfile, ManagerAction};

    fn worker(id: &str) -> Arc<dyn WorkerAgent> {
        Arc::new(InstantWorker::new(
            AgentProfile::ai_worker(id).with_id(AgentId::new(id)),
        ))
    }

    fn single_task_workflow() -> (Workflow, TaskId) {
        let mut workflow = Workflow::new("unit", "one task");
        let task = Task::new("only", "the only task").with_id(TaskId::new("t-only"));
        let task_id = task.id.clone();
        workflow.add_task(task).unwrap();
        (workflow, task_id)
    }

    fn engine_with(
        workflow: Workflow,
        script: Vec<ManagerAction>,
        workers: Vec<Arc<dyn WorkerAgent>>,
    ) -> SimulationEngine {
        let mut registry = AgentRegistry::new();
        for worker in workers {
            registry.register(worker);
        }
        SimulationEngine::new(
            EngineConfig::default().with_max_timesteps(10),
            workflow,
            Box::new(ScriptedPolicy::new(script)),
        )
        .unwrap()
        .with_registry(registry)
    }

    #[tokio::test]
    async fn test_tick_mirrors_roster_into_workflow() {
        let (workflow, _) = single_task_workflow();
        let mut engine = engine_with(workflow, Vec::new(), vec![worker("w-1")]);

        engine.tick().await.unwrap();
        assert!(engine.workflow().agents.contains_key(&AgentId::new("w-1")));
    }

    #[tokio::test]
    async fn test_assigned_task_spawns_and_completes_next_tick() {
        let (workflow, task_id) = single_task_workflow();
        let script = vec![ManagerAction::new(
            "start the work",
            ActionKind::AssignTask {
                task_id: task_id.clone(),
                agent_id: AgentId::new("w-1"),
            },
        )];
        let mut engine = engine_with(workflow, script, vec![worker("w-1")]);

        engine.tick().await.unwrap();
        assert_eq!(engine.workflow().tasks[&task_id].status, TaskStatus::Running);
        assert_eq!(engine.workflow().executions.len(), 1);

        let report = engine.tick().await.unwrap();
        assert_eq!(
            engine.workflow().tasks[&task_id].status,
            TaskStatus::Completed
        );
        assert_eq!(report.completed_task_ids, vec![task_id]);
        assert!(engine.workflow().is_complete());
    }

    #[tokio::test]
    async fn test_unregistered_assignee_leaves_task_ready() {
        let (workflow, task_id) = single_task_workflow();
        let script = vec![ManagerAction::new(
            "assign to someone who never shows up",
            ActionKind::AssignTask {
                task_id: task_id.clone(),
                agent_id: AgentId::new("w-1"),
            },
        )];
        // Agent profile exists in the workflow but has no registered worker.
        let mut workflow = workflow;
        workflow
            .add_agent(AgentProfile::ai_worker("w-1").with_id(AgentId::new("w-1")))
            .unwrap();
        let mut engine = engine_with(workflow, script, Vec::new());

        engine.tick().await.unwrap();
        engine.tick().await.unwrap();
        assert_eq!(engine.workflow().tasks[&task_id].status, TaskStatus::Ready);
        assert!(engine.workflow().executions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_worker_fails_task_and_skips_billing() {
        let (workflow, task_id) = single_task_workflow();
        let failing: Arc<dyn WorkerAgent> = Arc::new(
            InstantWorker::new(AgentProfile::ai_worker("w-1").with_id(AgentId::new("w-1")))
                .with_outcome(12.0, 2.0)
                .failing(),
        );
        let script = vec![ManagerAction::new(
            "assign",
            ActionKind::AssignTask {
                task_id: task_id.clone(),
                agent_id: AgentId::new("w-1"),
            },
        )];
        let mut engine = engine_with(workflow, script, vec![failing]);

        engine.tick().await.unwrap();
        let report = engine.tick().await.unwrap();

        let task = &engine.workflow().tasks[&task_id];
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.execution_notes.iter().any(|n| n.contains("Failed")));
        assert_eq!(report.failed_task_ids, vec![task_id]);
        assert_eq!(engine.workflow().total_cost, 0.0);
        assert_eq!(engine.workflow().total_simulated_hours, 0.0);
    }

    #[tokio::test]
    async fn test_terminal_engine_refuses_ticks() {
        let (workflow, _) = single_task_workflow();
        let mut engine = engine_with(workflow, Vec::new(), Vec::new());
        engine.run_state = RunState::Cancelled;

        assert!(matches!(
            engine.tick().await,
            Err(EngineError::RunTerminal(RunState::Cancelled))
        ));
    }
}
