//! The simulated stakeholder persona

use crate::{
    PreferenceChange, PreferenceResult, PreferenceTimeline, PreferenceWeights,
    WeightUpdateRequest,
};
use foreman_comms::CommsService;
use foreman_types::{AgentId, AgentProfile, Message, MessageId, MessageType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

// ── Configuration ────────────────────────────────────────────────────

/// Persona and messaging behavior for the stakeholder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeholderConfig {
    pub agent_id: AgentId,
    pub display_name: String,
    pub role: String,
    pub persona_description: String,
    /// Weights the timeline starts from
    pub initial_preferences: PreferenceWeights,
    /// Reply latency range, in timesteps
    pub response_latency_steps_min: u64,
    pub response_latency_steps_max: u64,
    /// Chance per timestep to proactively push a message
    pub push_probability_per_timestep: f64,
    /// How often a push actually turns into a suggestion
    pub suggestion_rate: f64,
    /// Probability of replying to a direct message
    pub clarification_reply_rate: f64,
    /// Higher is stricter when reviewing work
    pub strictness: f64,
    /// Verbosity of stakeholder messages, 0..=5
    pub verbosity: u8,
    /// Weight updates to apply as their timesteps come due
    #[serde(default)]
    pub weight_update_schedule: Vec<WeightUpdateRequest>,
}

impl StakeholderConfig {
    pub fn new(
        agent_id: AgentId,
        display_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            agent_id,
            display_name: display_name.into(),
            role: role.into(),
            persona_description: "Stakeholder persona".to_string(),
            initial_preferences: PreferenceWeights::default(),
            response_latency_steps_min: 0,
            response_latency_steps_max: 2,
            push_probability_per_timestep: 0.0,
            suggestion_rate: 0.25,
            clarification_reply_rate: 1.0,
            strictness: 0.5,
            verbosity: 1,
            weight_update_schedule: Vec::new(),
        }
    }

    pub fn with_persona(mut self, description: impl Into<String>) -> Self {
        self.persona_description = description.into();
        self
    }

    pub fn with_initial_preferences(mut self, weights: PreferenceWeights) -> Self {
        self.initial_preferences = weights;
        self
    }

    pub fn with_latency(mut self, min_steps: u64, max_steps: u64) -> Self {
        self.response_latency_steps_min = min_steps;
        self.response_latency_steps_max = max_steps.max(min_steps);
        self
    }

    pub fn with_push_probability(mut self, probability: f64) -> Self {
        self.push_probability_per_timestep = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_suggestion_rate(mut self, rate: f64) -> Self {
        self.suggestion_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_clarification_reply_rate(mut self, rate: f64) -> Self {
        self.clarification_reply_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_strictness(mut self, strictness: f64) -> Self {
        self.strictness = strictness.clamp(0.0, 1.0);
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity.min(5);
        self
    }

    pub fn schedule_weight_update(mut self, request: WeightUpdateRequest) -> Self {
        self.weight_update_schedule.push(request);
        self
    }
}

/// What the controller is allowed to see about the stakeholder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeholderPublicProfile {
    pub display_name: String,
    pub role: String,
    pub preference_summary: String,
}

// ── Agent ────────────────────────────────────────────────────────────

struct OutboxEntry {
    due_timestep: u64,
    recipient: AgentId,
    content: String,
    thread_id: Option<MessageId>,
}

/// Seeded stakeholder: owns the preference timeline, answers direct
/// messages after a sampled latency, and occasionally pushes suggestions
pub struct StakeholderAgent {
    config: StakeholderConfig,
    timeline: PreferenceTimeline,
    rng: StdRng,
    outbox: Vec<OutboxEntry>,
    pending_updates: Vec<WeightUpdateRequest>,
    inbox_cursor: usize,
}

impl StakeholderAgent {
    pub fn new(config: StakeholderConfig, seed: u64) -> Self {
        let timeline = PreferenceTimeline::new(config.initial_preferences.clone());
        let mut pending_updates = config.weight_update_schedule.clone();
        pending_updates.sort_by_key(|r| r.timestep);
        Self {
            config,
            timeline,
            rng: StdRng::seed_from_u64(seed),
            outbox: Vec::new(),
            pending_updates,
            inbox_cursor: 0,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.config.agent_id
    }

    /// Roster profile mirrored into the workflow
    pub fn profile(&self) -> AgentProfile {
        AgentProfile::stakeholder(self.config.display_name.clone())
            .with_id(self.config.agent_id.clone())
    }

    /// The public face shown in controller observations
    pub fn public_profile(&self, timestep: u64) -> StakeholderPublicProfile {
        StakeholderPublicProfile {
            display_name: self.config.display_name.clone(),
            role: self.config.role.clone(),
            preference_summary: self.weights_for(timestep).summary(),
        }
    }

    pub fn weights_for(&self, timestep: u64) -> &PreferenceWeights {
        self.timeline.get_for_timestep(timestep)
    }

    pub fn timeline(&self) -> &PreferenceTimeline {
        &self.timeline
    }

    /// Apply one update immediately, outside the schedule
    pub fn apply_weight_update(
        &mut self,
        request: &WeightUpdateRequest,
    ) -> PreferenceResult<PreferenceChange> {
        self.timeline.apply(request)
    }

    /// Replace the timeline from a snapshot taken at `timestep`.
    /// Scheduled updates at or before that point are dropped (the
    /// restored timeline already reflects them), queued replies are
    /// discarded, and the inbox cursor jumps past `seen_messages` so old
    /// traffic is not re-answered.
    pub fn restore(&mut self, timeline: PreferenceTimeline, timestep: u64, seen_messages: usize) {
        self.timeline = timeline;
        self.pending_updates.retain(|r| r.timestep > timestep);
        self.outbox.clear();
        self.inbox_cursor = seen_messages;
    }

    /// Run one policy tick: apply due weight updates, send due replies,
    /// react to fresh inbox traffic, and maybe push a suggestion.
    /// Returns the preference changes that took effect this tick.
    pub fn policy_step(
        &mut self,
        timestep: u64,
        comms: &CommsService,
    ) -> PreferenceResult<Vec<PreferenceChange>> {
        let mut changes = Vec::new();

        // Due scheduled weight updates
        while let Some(next) = self.pending_updates.first() {
            if next.timestep > timestep {
                break;
            }
            let request = self.pending_updates.remove(0);
            changes.push(self.timeline.apply(&request)?);
        }

        // Due replies
        let due: Vec<OutboxEntry> = {
            let mut kept = Vec::new();
            let mut due = Vec::new();
            for entry in self.outbox.drain(..) {
                if entry.due_timestep <= timestep {
                    due.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            self.outbox = kept;
            due
        };
        for entry in due {
            let mut reply = Message::direct(
                self.config.agent_id.clone(),
                entry.recipient,
                entry.content,
                timestep,
            )
            .with_type(MessageType::Clarification);
            if let Some(thread_id) = entry.thread_id {
                reply = reply.with_thread(thread_id);
            }
            comms.post(reply)?;
        }

        // Fresh inbox traffic since the last tick
        let fresh = comms.messages_since(self.inbox_cursor)?;
        self.inbox_cursor += fresh.len();
        for message in fresh {
            let direct_to_me = !message.broadcast
                && message.recipient_ids.contains(&self.config.agent_id)
                && message.sender_id != self.config.agent_id;
            if !direct_to_me {
                continue;
            }
            if self.rng.gen_bool(self.config.clarification_reply_rate.clamp(0.0, 1.0)) {
                let delay = self.sample_latency_steps();
                self.outbox.push(OutboxEntry {
                    due_timestep: timestep + delay,
                    recipient: message.sender_id.clone(),
                    content: self.format_reply(&message.content),
                    thread_id: Some(message.id.clone()),
                });
            }
        }

        // Spontaneous suggestion
        if self
            .rng
            .gen_bool(self.config.push_probability_per_timestep.clamp(0.0, 1.0))
            && self.rng.gen_bool(self.config.suggestion_rate.clamp(0.0, 1.0))
        {
            let suggestion = Message::broadcast(
                self.config.agent_id.clone(),
                self.generate_suggestion(),
                timestep,
            )
            .with_type(MessageType::Suggestion);
            comms.post(suggestion)?;
        }

        Ok(changes)
    }

    fn sample_latency_steps(&mut self) -> u64 {
        let min = self.config.response_latency_steps_min;
        let max = self.config.response_latency_steps_max.max(min);
        if min == max {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    fn format_reply(&self, incoming: &str) -> String {
        let base =
            "Thanks for the update. My priorities remain as discussed; please proceed accordingly."
                .to_string();
        if self.config.verbosity <= 1 {
            return base;
        }
        let snippet: String = incoming.chars().take(200).collect();
        format!("{base}\nRegarding your message: {snippet}")
    }

    fn generate_suggestion(&self) -> String {
        format!(
            "Suggestion from {} ({}): please keep critical-path tasks moving and leave time for review before final delivery.",
            self.config.display_name, self.config.role
        )
    }
}
