use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::ThreadId,
    error::{ApiError, ErrorCode},
    protocol::{ChatMessage, ConversationHistoryResponse, SendMessageResponse},
};
use storage::{Storage, StoredExchange};
use tracing::{error, info};

/// Produces the assistant's reply to one user message. A model-backed
/// assistant implements this and is handed to `ApiContext` in place of
/// `EchoAssistant`.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn reply(&self, thread_id: &ThreadId, message: &str) -> Result<String>;
}

/// Answers every message by quoting it back.
pub struct EchoAssistant;

#[async_trait]
impl Assistant for EchoAssistant {
    async fn reply(&self, _thread_id: &ThreadId, message: &str) -> Result<String> {
        Ok(format!("You said: {}", message.trim()))
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub assistant: Arc<dyn Assistant>,
}

pub async fn conversation_history(
    ctx: &ApiContext,
    thread_id: &ThreadId,
) -> Result<ConversationHistoryResponse, ApiError> {
    ensure_thread_id(thread_id)?;
    let exchanges = ctx
        .storage
        .list_exchanges(thread_id)
        .await
        .map_err(internal)?;

    Ok(ConversationHistoryResponse {
        thread_id: thread_id.clone(),
        conversation_history: flatten_exchanges(exchanges),
    })
}

pub async fn send_message(
    ctx: &ApiContext,
    thread_id: &ThreadId,
    message: &str,
) -> Result<SendMessageResponse, ApiError> {
    ensure_thread_id(thread_id)?;
    if message.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "message must not be empty",
        ));
    }

    let reply = ctx
        .assistant
        .reply(thread_id, message)
        .await
        .map_err(|e| {
            error!(%thread_id, error = %e, "assistant failed to reply");
            ApiError::new(ErrorCode::Upstream, format!("assistant unavailable: {e}"))
        })?;

    ctx.storage
        .insert_exchange(thread_id, message, &reply)
        .await
        .map_err(internal)?;
    info!(%thread_id, "conversation saved");

    Ok(SendMessageResponse {
        thread_id: Some(thread_id.clone()),
        response: reply,
        message_received: Some(message.to_string()),
    })
}

fn flatten_exchanges(exchanges: Vec<StoredExchange>) -> Vec<ChatMessage> {
    exchanges
        .into_iter()
        .flat_map(|exchange| {
            [
                ChatMessage::user(exchange.user_message),
                ChatMessage::assistant(exchange.ai_response),
            ]
        })
        .collect()
}

fn ensure_thread_id(thread_id: &ThreadId) -> Result<(), ApiError> {
    if thread_id.as_str().trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "thread_id must not be empty",
        ));
    }
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
