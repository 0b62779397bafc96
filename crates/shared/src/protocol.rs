use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{Sender, ThreadId};

pub const CONVERSATION_HISTORY_ROUTE: &str = "/conversation-history/";
pub const SEND_MESSAGE_ROUTE: &str = "/send-message/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Sender,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistoryQuery {
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageQuery {
    pub thread_id: ThreadId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistoryResponse {
    pub thread_id: ThreadId,
    pub conversation_history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_received: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryShapeError {
    #[error("response body is not a JSON object")]
    NotAnObject,
    #[error("response is missing `conversation_history`")]
    MissingField,
    #[error("`conversation_history` is {found}, expected an array")]
    NotAnArray { found: &'static str },
    #[error("`conversation_history[{index}]` is not a message: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// Extracts the message list from a raw history response body.
///
/// Only an object whose `conversation_history` field is an array of
/// `{sender, content}` entries is accepted; every other shape is reported
/// instead of being coerced into an empty list.
pub fn parse_conversation_history(body: Value) -> Result<Vec<ChatMessage>, HistoryShapeError> {
    let Value::Object(mut fields) = body else {
        return Err(HistoryShapeError::NotAnObject);
    };
    let history = fields
        .remove("conversation_history")
        .ok_or(HistoryShapeError::MissingField)?;
    let Value::Array(entries) = history else {
        return Err(HistoryShapeError::NotAnArray {
            found: json_kind(&history),
        });
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value::<ChatMessage>(entry).map_err(|e| {
                HistoryShapeError::InvalidEntry {
                    index,
                    reason: e.to_string(),
                }
            })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
