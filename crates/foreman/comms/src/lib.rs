//! Shared message log for a simulation run
//!
//! One `CommsService` instance backs a whole run. The engine and every
//! agent hold it behind an `Arc`; all methods take `&self` and guard the
//! log with an `RwLock`. Beyond delivery it carries the end-of-run flag
//! a controller raises with a `RequestEndWorkflow` action.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use foreman_types::{AgentId, Message, MessageId, MessageType, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

/// Visible messages for one agent, grouped under the sender
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenderDigest {
    pub sender_id: AgentId,
    pub message_count: usize,
    pub messages: Vec<Message>,
}

/// A raised end-of-run request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requested_at_timestep: u64,
}

/// The run-wide communication service
pub struct CommsService {
    messages: RwLock<Vec<Message>>,
    end_request: RwLock<Option<EndRequest>>,
}

impl CommsService {
    /// Create an empty service
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            end_request: RwLock::new(None),
        }
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Append a pre-built message to the log
    pub fn post(&self, message: Message) -> Result<Message, CommsError> {
        let mut messages = self.messages.write().map_err(|_| CommsError::LockError)?;
        messages.push(message.clone());
        Ok(message)
    }

    /// Send a point-to-point message
    pub fn send_direct(
        &self,
        sender_id: AgentId,
        recipient_id: AgentId,
        content: impl Into<String>,
        timestep: u64,
    ) -> Result<Message, CommsError> {
        self.post(Message::direct(sender_id, recipient_id, content, timestep))
    }

    /// Send a message to every agent
    pub fn send_broadcast(
        &self,
        sender_id: AgentId,
        content: impl Into<String>,
        timestep: u64,
    ) -> Result<Message, CommsError> {
        self.post(Message::broadcast(sender_id, content, timestep))
    }

    /// Reply on an existing message's thread. The reply goes back to the
    /// root sender and carries the root id as its thread.
    pub fn reply(
        &self,
        sender_id: AgentId,
        root_id: &MessageId,
        content: impl Into<String>,
        message_type: MessageType,
        timestep: u64,
    ) -> Result<Message, CommsError> {
        let root_sender = {
            let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
            messages
                .iter()
                .find(|m| m.id == *root_id)
                .map(|m| m.sender_id.clone())
                .ok_or_else(|| CommsError::MessageNotFound(root_id.clone()))?
        };
        let reply = Message::direct(sender_id, root_sender, content, timestep)
            .with_type(message_type)
            .with_thread(root_id.clone());
        self.post(reply)
    }

    // ── Views ────────────────────────────────────────────────────────

    /// Messages visible to an agent, oldest first. `since` and `limit`
    /// trim the result; the limit keeps the newest entries.
    pub fn messages_for_agent(
        &self,
        agent_id: &AgentId,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, CommsError> {
        let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
        let mut visible: Vec<Message> = messages
            .iter()
            .filter(|m| m.is_visible_to(agent_id))
            .filter(|m| since.map(|s| m.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let start = visible.len().saturating_sub(limit);
            visible.drain(..start);
        }
        Ok(visible)
    }

    /// Visible messages for an agent grouped by sender, senders in id order
    pub fn inbox_digest(&self, agent_id: &AgentId) -> Result<Vec<SenderDigest>, CommsError> {
        let visible = self.messages_for_agent(agent_id, None, None)?;
        let mut grouped: BTreeMap<AgentId, Vec<Message>> = BTreeMap::new();
        for message in visible {
            grouped
                .entry(message.sender_id.clone())
                .or_default()
                .push(message);
        }
        Ok(grouped
            .into_iter()
            .map(|(sender_id, messages)| SenderDigest {
                sender_id,
                message_count: messages.len(),
                messages,
            })
            .collect())
    }

    /// Direct traffic between two agents, oldest first
    pub fn conversation(
        &self,
        agent_a: &AgentId,
        agent_b: &AgentId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, CommsError> {
        let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
        let mut between: Vec<Message> = messages
            .iter()
            .filter(|m| !m.broadcast)
            .filter(|m| {
                (m.sender_id == *agent_a && m.recipient_ids.contains(agent_b))
                    || (m.sender_id == *agent_b && m.recipient_ids.contains(agent_a))
            })
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let start = between.len().saturating_sub(limit);
            between.drain(..start);
        }
        Ok(between)
    }

    /// Messages attached to a task, oldest first
    pub fn task_messages(&self, task_id: &TaskId) -> Result<Vec<Message>, CommsError> {
        let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
        Ok(messages
            .iter()
            .filter(|m| m.related_task_id.as_ref() == Some(task_id))
            .cloned()
            .collect())
    }

    /// A thread: the root plus every reply carrying it, oldest first
    pub fn thread(&self, root_id: &MessageId) -> Result<Vec<Message>, CommsError> {
        let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
        Ok(messages
            .iter()
            .filter(|m| m.id == *root_id || m.thread_id.as_ref() == Some(root_id))
            .cloned()
            .collect())
    }

    /// The newest `count` messages on the log, oldest first
    pub fn recent(&self, count: usize) -> Result<Vec<Message>, CommsError> {
        let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
        let start = messages.len().saturating_sub(count);
        Ok(messages[start..].to_vec())
    }

    /// Entries appended at or after a log cursor, for incremental sync
    pub fn messages_since(&self, cursor: usize) -> Result<Vec<Message>, CommsError> {
        let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
        Ok(messages.get(cursor..).unwrap_or_default().to_vec())
    }

    pub fn len(&self) -> Result<usize, CommsError> {
        let messages = self.messages.read().map_err(|_| CommsError::LockError)?;
        Ok(messages.len())
    }

    pub fn is_empty(&self) -> Result<bool, CommsError> {
        Ok(self.len()? == 0)
    }

    // ── Run Control ──────────────────────────────────────────────────

    /// Raise the end-of-run flag. The engine honors it at the next tick
    /// boundary; raising it twice keeps the first request.
    pub fn request_end(
        &self,
        reason: Option<String>,
        timestep: u64,
    ) -> Result<(), CommsError> {
        let mut end = self.end_request.write().map_err(|_| CommsError::LockError)?;
        if end.is_some() {
            return Ok(());
        }
        match &reason {
            Some(reason) => tracing::warn!(reason = %reason, "end of run requested"),
            None => tracing::warn!("end of run requested"),
        }
        *end = Some(EndRequest {
            reason,
            requested_at_timestep: timestep,
        });
        Ok(())
    }

    pub fn end_requested(&self) -> Result<bool, CommsError> {
        let end = self.end_request.read().map_err(|_| CommsError::LockError)?;
        Ok(end.is_some())
    }

    pub fn end_request(&self) -> Result<Option<EndRequest>, CommsError> {
        let end = self.end_request.read().map_err(|_| CommsError::LockError)?;
        Ok(end.clone())
    }

    /// Replace the whole log and clear the end flag. Used when a
    /// snapshot is restored over a live run.
    pub fn reset_with(&self, messages: Vec<Message>) -> Result<(), CommsError> {
        let mut log = self.messages.write().map_err(|_| CommsError::LockError)?;
        *log = messages;
        let mut end = self.end_request.write().map_err(|_| CommsError::LockError)?;
        *end = None;
        Ok(())
    }
}

impl Default for CommsService {
    fn default() -> Self {
        Self::new()
    }
}

/// Communication-related errors
#[derive(Debug, Error)]
pub enum CommsError {
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Lock error")]
    LockError,
}
