use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

/// Who authored a message.
///
/// Wire and store labels are `user` and `ai`; the remote schema and the
/// completion endpoint both expect exactly these strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai")]
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "ai",
        }
    }

    pub fn from_label(label: &str) -> Result<Self, ProtocolError> {
        match label {
            "user" => Ok(Sender::User),
            "ai" => Ok(Sender::Assistant),
            other => Err(ProtocolError::InvalidSender(other.to_string())),
        }
    }
}

/// A single entry in a conversation's message list.
///
/// The id is assigned once at creation and never reassigned; the remote
/// store upserts by id, which is what makes re-sending a message idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// Completion-service response id threading multi-turn context.
    /// Only ever set on assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
    /// Locally manufactured content (welcome text). Shown in the list,
    /// never persisted remotely.
    #[serde(default)]
    pub boilerplate: bool,
}

impl Message {
    fn new(content: impl Into<String>, sender: Sender) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
            continuation: None,
            boilerplate: false,
        }
    }

    /// A message typed by the user.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content, Sender::User)
    }

    /// An assistant reply, optionally carrying the continuation token the
    /// completion service returned for this turn.
    pub fn assistant(content: impl Into<String>, continuation: Option<String>) -> Self {
        Self {
            continuation,
            ..Self::new(content, Sender::Assistant)
        }
    }

    /// Locally manufactured assistant content (welcome text) that is shown
    /// but never persisted.
    pub fn boilerplate(content: impl Into<String>) -> Self {
        Self {
            boilerplate: true,
            ..Self::new(content, Sender::Assistant)
        }
    }
}
