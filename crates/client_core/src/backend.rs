use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use shared::{
    domain::ThreadId,
    protocol::{
        parse_conversation_history, ChatMessage, ConversationHistoryQuery, SendMessageQuery,
        SendMessageResponse, CONVERSATION_HISTORY_ROUTE, SEND_MESSAGE_ROUTE,
    },
};
use tracing::debug;

use crate::{
    config::ChatConfig,
    error::{SyncError, HISTORY_OPERATION, SEND_OPERATION},
};

/// The remote side of a conversation: history reads and message round trips.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn fetch_history(&self, thread_id: &ThreadId) -> Result<Vec<ChatMessage>, SyncError>;
    async fn send_message(&self, thread_id: &ThreadId, text: &str) -> Result<String, SyncError>;
}

pub struct HttpAssistantBackend {
    http: Client,
    config: ChatConfig,
}

impl HttpAssistantBackend {
    pub fn new(config: &ChatConfig) -> reqwest::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: Client, config: &ChatConfig) -> Self {
        Self {
            http,
            config: config.clone(),
        }
    }
}

fn check_status(operation: &'static str, res: Response) -> Result<Response, SyncError> {
    let status = res.status();
    if status.is_success() {
        Ok(res)
    } else {
        Err(SyncError::Status {
            operation,
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl AssistantBackend for HttpAssistantBackend {
    async fn fetch_history(&self, thread_id: &ThreadId) -> Result<Vec<ChatMessage>, SyncError> {
        let res = self
            .http
            .get(self.config.endpoint(CONVERSATION_HISTORY_ROUTE))
            .query(&ConversationHistoryQuery {
                thread_id: thread_id.clone(),
            })
            .send()
            .await
            .map_err(|e| SyncError::transport(HISTORY_OPERATION, e))?;
        let body: Value = check_status(HISTORY_OPERATION, res)?
            .json()
            .await
            .map_err(|e| SyncError::malformed(HISTORY_OPERATION, e))?;
        debug!(%thread_id, "conversation history response received");

        parse_conversation_history(body).map_err(|e| SyncError::malformed(HISTORY_OPERATION, e))
    }

    async fn send_message(&self, thread_id: &ThreadId, text: &str) -> Result<String, SyncError> {
        let res = self
            .http
            .post(self.config.endpoint(SEND_MESSAGE_ROUTE))
            .query(&SendMessageQuery {
                thread_id: thread_id.clone(),
                message: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| SyncError::transport(SEND_OPERATION, e))?;
        let body: SendMessageResponse = check_status(SEND_OPERATION, res)?
            .json()
            .await
            .map_err(|e| SyncError::malformed(SEND_OPERATION, e))?;
        debug!(%thread_id, "send-message response received");

        Ok(body.response)
    }
}
