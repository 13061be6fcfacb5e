use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Intent of a collaboration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Asks the recipient to do something.
    Request,
    /// Answers a request.
    Response,
    /// Comments on the recipient's work.
    Feedback,
    /// Informs without expecting a reply.
    Notification,
}

/// A message from one registered agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationMessage {
    /// Unique message id.
    pub id: Uuid,
    /// Sending agent.
    pub sender: String,
    /// Receiving agent.
    pub recipient: String,
    /// Intent of the message.
    pub message_type: MessageType,
    /// Message body.
    pub content: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Structured extras, e.g. run id and step.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CollaborationMessage {
    /// New message stamped with a fresh id and the current time.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: recipient.into(),
            message_type,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// Messages exchanged among a group of agents working on one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationSession {
    /// The shared task.
    pub task: String,
    /// Agents whose messages to each other are recorded.
    pub participants: Vec<String>,
    /// Recorded messages, in delivery order.
    pub messages: Vec<CollaborationMessage>,
    /// When the session opened.
    pub started_at: DateTime<Utc>,
    /// When the session closed; `None` while open.
    pub ended_at: Option<DateTime<Utc>>,
    /// Outcome given at close.
    pub outcome: Option<String>,
}

impl CollaborationSession {
    /// Whether the session still records messages.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub(crate) fn involves(&self, sender: &str, recipient: &str) -> bool {
        self.participants.iter().any(|p| p == sender) && self.participants.iter().any(|p| p == recipient)
    }
}

/// Summary of a coordinator's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStats {
    /// Registered agents.
    pub total_agents: usize,
    /// Messages delivered since creation, including drained ones.
    pub total_messages: usize,
    /// Sessions currently retained, open or closed.
    pub total_sessions: usize,
    /// Retained sessions that are still open.
    pub open_sessions: usize,
    /// Registered agent names, sorted.
    pub agents: Vec<String>,
}
