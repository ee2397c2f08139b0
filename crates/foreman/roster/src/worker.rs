//! The worker execution seam and deterministic in-repo workers

use async_trait::async_trait;
use foreman_comms::CommsService;
use foreman_types::{
    AgentId, AgentProfile, Message, MessageType, Resource, ResourceDraft, Task, TaskOutcome,
    ToolUseEvent,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// ── Work Context ─────────────────────────────────────────────────────

/// Everything a worker gets to see while executing one task
pub struct WorkContext {
    /// The workflow goal, for workers that condition on it
    pub goal: String,
    /// Resolved input resources for the task
    pub inputs: Vec<Resource>,
    /// Where clarification questions go, when a controller is registered
    pub manager_id: Option<AgentId>,
    /// Current simulation timestep
    pub timestep: u64,
    /// Shared message log
    pub comms: Arc<CommsService>,
}

impl WorkContext {
    pub fn new(goal: impl Into<String>, comms: Arc<CommsService>) -> Self {
        Self {
            goal: goal.into(),
            inputs: Vec::new(),
            manager_id: None,
            timestep: 0,
            comms,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<Resource>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_manager(mut self, manager_id: AgentId) -> Self {
        self.manager_id = Some(manager_id);
        self
    }

    pub fn with_timestep(mut self, timestep: u64) -> Self {
        self.timestep = timestep;
        self
    }
}

// ── Worker Trait ─────────────────────────────────────────────────────

/// An executor the engine can drive. Implementations decide how work is
/// actually performed; failures are reported through the outcome, never
/// by panicking.
#[async_trait]
pub trait WorkerAgent: Send + Sync {
    /// Stable roster identity
    fn id(&self) -> &AgentId;

    /// Profile snapshot mirrored into the workflow roster
    fn profile(&self) -> AgentProfile;

    /// Perform one task attempt and report what happened
    async fn execute_task(&self, task: &Task, context: &WorkContext) -> TaskOutcome;

    /// Tool invocations recorded so far, surfaced to evaluation criteria
    /// that ask for per-task tool usage. Workers without telemetry report
    /// nothing.
    fn tool_usage(&self) -> Vec<ToolUseEvent> {
        Vec::new()
    }
}

// ── Simulated Worker ─────────────────────────────────────────────────

/// Behavior knobs for `SimulatedWorker`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulatedWorkerConfig {
    /// Probability an attempt succeeds
    pub success_rate: f64,
    /// Symmetric jitter applied to the nominal duration
    pub duration_jitter: f64,
    /// Symmetric jitter applied to the computed cost
    pub cost_jitter: f64,
    /// Nominal hours when the task carries no estimate
    pub default_duration_hours: f64,
    /// Probability of asking the controller a clarification question
    pub clarification_rate: f64,
}

impl Default for SimulatedWorkerConfig {
    fn default() -> Self {
        Self {
            success_rate: 0.95,
            duration_jitter: 0.2,
            cost_jitter: 0.1,
            default_duration_hours: 1.0,
            clarification_rate: 0.0,
        }
    }
}

/// A worker that simulates doing the task: duration comes from the task
/// estimate and the profile's speed factor, cost from the hourly rate,
/// and failures from a seeded draw. The same seed and task id always
/// produce the same outcome.
pub struct SimulatedWorker {
    profile: AgentProfile,
    config: SimulatedWorkerConfig,
    seed: u64,
    usage: Mutex<Vec<ToolUseEvent>>,
}

impl SimulatedWorker {
    pub fn new(profile: AgentProfile) -> Self {
        Self {
            profile,
            config: SimulatedWorkerConfig::default(),
            seed: 0,
            usage: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: SimulatedWorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn maybe_ask_clarification(&self, rng: &mut StdRng, task: &Task, context: &WorkContext) {
        if self.config.clarification_rate <= 0.0 {
            return;
        }
        let Some(manager_id) = &context.manager_id else {
            return;
        };
        if !rng.gen_bool(self.config.clarification_rate.clamp(0.0, 1.0)) {
            return;
        }
        let question = Message::direct(
            self.profile.id.clone(),
            manager_id.clone(),
            format!("Before I start '{}': any constraints I should know about?", task.name),
            context.timestep,
        )
        .with_type(MessageType::Clarification)
        .with_related_task(task.id.clone());
        if let Err(error) = context.comms.post(question) {
            tracing::warn!(error = %error, "failed to post clarification question");
        }
    }

    fn record_tool_use(&self, task: &Task, tool_name: &str, succeeded: bool) {
        let mut event = ToolUseEvent::new(self.profile.id.clone(), task.id.clone(), tool_name);
        if !succeeded {
            event = event.failed();
        }
        if let Ok(mut log) = self.usage.lock() {
            log.push(event);
        }
    }
}

#[async_trait]
impl WorkerAgent for SimulatedWorker {
    fn id(&self) -> &AgentId {
        &self.profile.id
    }

    fn profile(&self) -> AgentProfile {
        self.profile.clone()
    }

    async fn execute_task(&self, task: &Task, context: &WorkContext) -> TaskOutcome {
        let mut rng = StdRng::seed_from_u64(mix_seed(self.seed, &task.id.0));

        self.maybe_ask_clarification(&mut rng, task, context);

        let nominal = task
            .estimated_duration_hours
            .unwrap_or(self.config.default_duration_hours);
        let jitter = self.config.duration_jitter.abs();
        let duration = (nominal / self.profile.speed_factor.max(0.1)
            * (1.0 + rng.gen_range(-jitter..=jitter)))
        .max(0.05);
        let cost_jitter = self.config.cost_jitter.abs();
        let cost = (duration
            * self.profile.cost_per_hour
            * (1.0 + rng.gen_range(-cost_jitter..=cost_jitter)))
        .max(0.0);

        if rng.gen_bool(self.config.success_rate.clamp(0.0, 1.0)) {
            self.record_tool_use(task, "draft_deliverable", true);
            let draft = ResourceDraft::new(
                format!("{} output", task.name),
                format!("Deliverable for '{}' produced by {}", task.name, self.profile.name),
            )
            .with_content(format!(
                "# {}\n\nCompleted by {} after {:.2} simulated hours.\n\nGoal context: {}",
                task.name, self.profile.name, duration, context.goal
            ));
            TaskOutcome::success(vec![draft], cost, duration)
        } else {
            self.record_tool_use(task, "draft_deliverable", false);
            TaskOutcome::failure(
                format!("{} could not finish '{}'", self.profile.name, task.name),
                cost * 0.5,
                duration * 0.5,
            )
        }
    }

    fn tool_usage(&self) -> Vec<ToolUseEvent> {
        self.usage.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

// ── Instant Worker ───────────────────────────────────────────────────

/// A worker that finishes immediately with a fixed outcome. Intended
/// for engine and scenario tests.
pub struct InstantWorker {
    profile: AgentProfile,
    succeed: bool,
    cost: f64,
    duration_hours: f64,
}

impl InstantWorker {
    pub fn new(profile: AgentProfile) -> Self {
        Self {
            profile,
            succeed: true,
            cost: 0.0,
            duration_hours: 0.0,
        }
    }

    pub fn with_outcome(mut self, cost: f64, duration_hours: f64) -> Self {
        self.cost = cost;
        self.duration_hours = duration_hours;
        self
    }

    pub fn failing(mut self) -> Self {
        self.succeed = false;
        self
    }
}

#[async_trait]
impl WorkerAgent for InstantWorker {
    fn id(&self) -> &AgentId {
        &self.profile.id
    }

    fn profile(&self) -> AgentProfile {
        self.profile.clone()
    }

    async fn execute_task(&self, task: &Task, _context: &WorkContext) -> TaskOutcome {
        if self.succeed {
            let draft = ResourceDraft::new(
                format!("{} output", task.name),
                format!("Instant deliverable for '{}'", task.name),
            );
            TaskOutcome::success(vec![draft], self.cost, self.duration_hours)
        } else {
            TaskOutcome::failure(
                format!("instant failure on '{}'", task.name),
                self.cost,
                self.duration_hours,
            )
        }
    }
}

/// Fold a string id into a base seed, FNV-1a style
fn mix_seed(seed: u64, id: &str) -> u64 {
    let mut hash = seed ^ 0xcbf2_9ce4_8422_2325;
    for byte in id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_types::TaskId;

    fn make_context() -> WorkContext {
        WorkContext::new("ship the demo", Arc::new(CommsService::new()))
    }

    fn make_task(id: &str, hours: f64) -> Task {
        Task::new("analysis", "run the numbers")
            .with_id(TaskId::new(id))
            .with_estimated_duration(hours)
    }

    fn make_worker(success_rate: f64) -> SimulatedWorker {
        SimulatedWorker::new(
            AgentProfile::ai_worker("sim").with_cost_per_hour(20.0),
        )
        .with_config(SimulatedWorkerConfig {
            success_rate,
            duration_jitter: 0.0,
            cost_jitter: 0.0,
            ..SimulatedWorkerConfig::default()
        })
        .with_seed(7)
    }

    #[tokio::test]
    async fn test_simulated_worker_is_deterministic() {
        let worker = make_worker(0.5);
        let task = make_task("t-1", 2.0);
        let context = make_context();

        let first = worker.execute_task(&task, &context).await;
        let second = worker.execute_task(&task, &context).await;
        assert_eq!(first.success, second.success);
        assert_eq!(first.cost, second.cost);
        assert_eq!(first.duration_hours, second.duration_hours);
    }

    #[tokio::test]
    async fn test_duration_uses_estimate_and_rate() {
        let worker = make_worker(1.0);
        let task = make_task("t-2", 2.0);
        let outcome = worker.execute_task(&task, &make_context()).await;

        assert!(outcome.success);
        assert!((outcome.duration_hours - 2.0).abs() < 1e-9);
        assert!((outcome.cost - 40.0).abs() < 1e-9);
        assert_eq!(outcome.resources.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_success_rate_always_fails() {
        let worker = make_worker(0.0);
        let outcome = worker.execute_task(&make_task("t-3", 1.0), &make_context()).await;
        assert!(!outcome.success);
        assert!(outcome.error_message.is_some());
        assert!(outcome.resources.is_empty());
    }

    #[tokio::test]
    async fn test_speed_factor_shortens_duration() {
        let worker = SimulatedWorker::new(
            AgentProfile::ai_worker("fast")
                .with_cost_per_hour(20.0)
                .with_speed_factor(2.0),
        )
        .with_config(SimulatedWorkerConfig {
            success_rate: 1.0,
            duration_jitter: 0.0,
            cost_jitter: 0.0,
            ..SimulatedWorkerConfig::default()
        });
        let outcome = worker.execute_task(&make_task("t-4", 2.0), &make_context()).await;
        assert!((outcome.duration_hours - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_clarification_sent_to_manager() {
        let comms = Arc::new(CommsService::new());
        let context = WorkContext::new("goal", comms.clone())
            .with_manager(AgentId::new("mgr"))
            .with_timestep(3);
        let worker = SimulatedWorker::new(AgentProfile::ai_worker("curious"))
            .with_config(SimulatedWorkerConfig {
                clarification_rate: 1.0,
                success_rate: 1.0,
                ..SimulatedWorkerConfig::default()
            });

        worker.execute_task(&make_task("t-5", 1.0), &context).await;

        let inbox = comms
            .messages_for_agent(&AgentId::new("mgr"), None, None)
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message_type, MessageType::Clarification);
        assert_eq!(inbox[0].related_task_id, Some(TaskId::new("t-5")));
    }

    #[tokio::test]
    async fn test_instant_worker_outcomes() {
        let ok = InstantWorker::new(AgentProfile::ai_worker("i1")).with_outcome(5.0, 0.5);
        let outcome = ok.execute_task(&make_task("t-6", 1.0), &make_context()).await;
        assert!(outcome.success);
        assert_eq!(outcome.cost, 5.0);

        let bad = InstantWorker::new(AgentProfile::ai_worker("i2")).failing();
        let outcome = bad.execute_task(&make_task("t-7", 1.0), &make_context()).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_tool_usage_recorded_per_attempt() {
        let worker = make_worker(1.0);
        assert!(worker.tool_usage().is_empty());

        worker.execute_task(&make_task("t-8", 1.0), &make_context()).await;
        worker.execute_task(&make_task("t-9", 1.0), &make_context()).await;

        let usage = worker.tool_usage();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].task_id, TaskId::new("t-8"));
        assert!(usage[0].succeeded);
    }

    #[test]
    fn test_mix_seed_varies_by_id_and_seed() {
        assert_ne!(mix_seed(1, "a"), mix_seed(1, "b"));
        assert_ne!(mix_seed(1, "a"), mix_seed(2, "a"));
        assert_eq!(mix_seed(9, "task"), mix_seed(9, "task"));
    }
}
