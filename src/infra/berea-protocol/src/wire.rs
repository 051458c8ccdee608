use serde::{Deserialize, Serialize};

use crate::{Message, Sender};

/// Request body for the hosted completion endpoint.
///
/// Field names are a compatibility contract with deployed clients; the
/// `previous_response_id` field is always present and serializes as `null`
/// when there is no prior turn to continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The message the user just sent.
    pub user_input: String,
    /// Recent conversation context, oldest first.
    #[serde(default)]
    pub message_history: Vec<HistoryEntry>,
    /// Continuation token from the previous assistant turn, if any.
    #[serde(default)]
    pub previous_response_id: Option<String>,
}

/// One prior message, reduced to what the completion service needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub content: String,
    pub sender: Sender,
}

impl From<&Message> for HistoryEntry {
    fn from(msg: &Message) -> Self {
        Self {
            content: msg.content.clone(),
            sender: msg.sender,
        }
    }
}

/// Success body from the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant reply text.
    pub response: String,
    /// Continuation token for the next turn.
    pub response_id: String,
}

/// Error body shared by the gateway and its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatErrorBody {
    pub error: String,
}
