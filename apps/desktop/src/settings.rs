use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use client_core::ChatConfig;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Looked up as `config.json`, `config.toml`, ... in the working directory.
pub const DEFAULT_CONFIG_BASENAME: &str = "config";
pub const ENV_PREFIX: &str = "CHAT";

#[derive(Debug, Deserialize)]
struct RawChatSettings {
    api_url: Option<String>,
    thread_id: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub thread_id: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Layers the config file, `CHAT__*` environment variables and command-line
/// overrides, in increasing precedence.
pub fn load_chat_config(config_file: Option<&Path>, overrides: ConfigOverrides) -> Result<ChatConfig> {
    let file_source = match config_file {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_BASENAME).required(false),
    };

    let raw: RawChatSettings = Config::builder()
        .add_source(file_source)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("api_url", overrides.api_url)?
        .set_override_option("thread_id", overrides.thread_id)?
        .set_override_option(
            "request_timeout_secs",
            overrides.request_timeout_secs.map(|secs| secs as i64),
        )?
        .build()
        .context("failed to read chat settings")?
        .try_deserialize()
        .context("invalid chat settings")?;

    let api_url = raw
        .api_url
        .context("api_url is not configured (config file, CHAT__API_URL or --api-url)")?;
    let thread_id = raw
        .thread_id
        .context("thread_id is not configured (config file, CHAT__THREAD_ID, --thread-id or --new-thread)")?;

    let mut chat_config = ChatConfig::new(&api_url, thread_id)?;
    if let Some(secs) = raw.request_timeout_secs {
        chat_config = chat_config.with_request_timeout(Duration::from_secs(secs));
    }
    Ok(chat_config)
}
