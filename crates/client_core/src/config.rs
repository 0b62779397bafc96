use std::time::Duration;

use shared::domain::ThreadId;
use thiserror::Error;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("api_url is not a valid URL: {0}")]
    InvalidApiUrl(String),
    #[error("api_url must use http or https, got `{0}`")]
    UnsupportedScheme(String),
    #[error("thread_id must not be empty")]
    EmptyThreadId,
}

/// Immutable session inputs for one chat screen: where the assistant service
/// lives and which thread the screen is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    api_url: String,
    thread_id: ThreadId,
    request_timeout: Duration,
}

impl ChatConfig {
    pub fn new(api_url: &str, thread_id: impl Into<String>) -> Result<Self, ConfigError> {
        let api_url = api_url.trim().trim_end_matches('/');
        let parsed =
            Url::parse(api_url).map_err(|e| ConfigError::InvalidApiUrl(format!("{api_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let thread_id = thread_id.into();
        if thread_id.trim().is_empty() {
            return Err(ConfigError::EmptyThreadId);
        }

        Ok(Self {
            api_url: api_url.to_string(),
            thread_id: ThreadId(thread_id),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn endpoint(&self, route: &str) -> String {
        format!("{}{route}", self.api_url)
    }
}
