use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{ExchangeId, ThreadId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// One user message and the assistant reply it produced.
#[derive(Debug, Clone)]
pub struct StoredExchange {
    pub exchange_id: ExchangeId,
    pub thread_id: ThreadId,
    pub user_message: String,
    pub ai_response: String,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty
        // database, so keep exactly one alive for the pool's lifetime.
        let pool_options = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn insert_exchange(
        &self,
        thread_id: &ThreadId,
        user_message: &str,
        ai_response: &str,
    ) -> Result<ExchangeId> {
        let rec = sqlx::query(
            "INSERT INTO conversation_history (thread_id, user_message, ai_response, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(thread_id.as_str())
        .bind(user_message)
        .bind(ai_response)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to store exchange for thread {thread_id}"))?;
        let exchange_id = ExchangeId(rec.get::<i64, _>(0));
        debug!(%thread_id, exchange_id = exchange_id.0, "exchange stored");
        Ok(exchange_id)
    }

    /// Exchanges of a thread, oldest first.
    pub async fn list_exchanges(&self, thread_id: &ThreadId) -> Result<Vec<StoredExchange>> {
        let rows = sqlx::query(
            "SELECT id, thread_id, user_message, ai_response, created_at
             FROM conversation_history
             WHERE thread_id = ?
             ORDER BY id ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list exchanges for thread {thread_id}"))?;

        rows.into_iter()
            .map(|row| -> Result<StoredExchange> {
                Ok(StoredExchange {
                    exchange_id: ExchangeId(row.try_get("id")?),
                    thread_id: ThreadId(row.try_get("thread_id")?),
                    user_message: row.try_get("user_message")?,
                    ai_response: row.try_get("ai_response")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
