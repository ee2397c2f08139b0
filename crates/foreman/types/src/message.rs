//! Messages exchanged between the controller, workers, and stakeholders

use crate::{AgentId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Message Identifier ───────────────────────────────────────────────

/// Unique identifier for a message
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Message Type ─────────────────────────────────────────────────────

/// Purpose of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Point-to-point note
    Direct,
    /// Sent to every registered agent
    Broadcast,
    /// High-priority notice, also used for workflow-wide announcements
    Alert,
    /// A worker asking the controller to resolve ambiguity
    Clarification,
    /// An unprompted stakeholder nudge about priorities
    Suggestion,
}

impl MessageType {
    pub fn label(&self) -> &'static str {
        match self {
            MessageType::Direct => "direct",
            MessageType::Broadcast => "broadcast",
            MessageType::Alert => "alert",
            MessageType::Clarification => "clarification",
            MessageType::Suggestion => "suggestion",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ── Message ──────────────────────────────────────────────────────────

/// A message on the workflow communication log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: MessageId,
    /// Who sent it
    pub sender_id: AgentId,
    /// Explicit recipients; empty for broadcasts
    #[serde(default)]
    pub recipient_ids: Vec<AgentId>,
    /// Whether this message goes to every agent
    pub broadcast: bool,
    /// Message body
    pub content: String,
    /// Purpose of the message
    pub message_type: MessageType,
    /// Conversation thread this message continues, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<MessageId>,
    /// Task context, if the message is about a specific task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<TaskId>,
    /// Simulation timestep at which the message was sent
    pub timestep: u64,
    /// Wall-clock send time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Point-to-point message to a single recipient
    pub fn direct(
        sender_id: AgentId,
        recipient_id: AgentId,
        content: impl Into<String>,
        timestep: u64,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            sender_id,
            recipient_ids: vec![recipient_id],
            broadcast: false,
            content: content.into(),
            message_type: MessageType::Direct,
            thread_id: None,
            related_task_id: None,
            timestep,
            timestamp: Utc::now(),
        }
    }

    /// Message addressed to every registered agent
    pub fn broadcast(sender_id: AgentId, content: impl Into<String>, timestep: u64) -> Self {
        Self {
            id: MessageId::generate(),
            sender_id,
            recipient_ids: Vec::new(),
            broadcast: true,
            content: content.into(),
            message_type: MessageType::Broadcast,
            thread_id: None,
            related_task_id: None,
            timestep,
            timestamp: Utc::now(),
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_thread(mut self, thread_id: MessageId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_related_task(mut self, task_id: TaskId) -> Self {
        self.related_task_id = Some(task_id);
        self
    }

    /// Whether `agent_id` should see this message in its inbox
    pub fn is_visible_to(&self, agent_id: &AgentId) -> bool {
        self.broadcast || self.recipient_ids.contains(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_message_visibility() {
        let msg = Message::direct(AgentId::new("mgr"), AgentId::new("w1"), "status?", 3);
        assert!(msg.is_visible_to(&AgentId::new("w1")));
        assert!(!msg.is_visible_to(&AgentId::new("w2")));
        assert_eq!(msg.message_type, MessageType::Direct);
        assert!(!msg.broadcast);
    }

    #[test]
    fn test_broadcast_visible_to_everyone() {
        let msg = Message::broadcast(AgentId::new("mgr"), "all hands", 1);
        assert!(msg.is_visible_to(&AgentId::new("anyone")));
        assert!(msg.recipient_ids.is_empty());
        assert!(msg.broadcast);
    }

    #[test]
    fn test_builder_extras() {
        let root = MessageId::new("m-root");
        let msg = Message::direct(AgentId::new("w1"), AgentId::new("mgr"), "which format?", 2)
            .with_type(MessageType::Clarification)
            .with_thread(root.clone())
            .with_related_task(TaskId::new("t-9"));
        assert_eq!(msg.message_type, MessageType::Clarification);
        assert_eq!(msg.thread_id, Some(root));
        assert_eq!(msg.related_task_id, Some(TaskId::new("t-9")));
    }
}
