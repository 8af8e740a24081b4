//! Registry of logged-out tokens.
//!
//! Entries are keyed by the SHA-256 fingerprint of the raw token and kept
//! until the token would have expired anyway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{Pool, Postgres};

use crate::clock::Clock;
use crate::crypto::Hasher;
use crate::error::Result;

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Mark `token` as revoked until `expires_at`. Overwrites any entry.
    async fn revoke(&self, token: &str, expires_at: u64) -> Result<()>;

    /// Whether `token` is revoked and not yet expired at `now`.
    async fn is_revoked(&self, token: &str, now: u64) -> Result<bool>;

    /// Drop every entry expired at `now`. Returns how many were removed.
    async fn prune(&self, now: u64) -> Result<u64>;
}

/// In-process registry.
#[derive(Debug, Default)]
pub struct MemoryRevocations {
    entries: DashMap<String, u64>,
}

impl MemoryRevocations {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocations {
    async fn revoke(&self, token: &str, expires_at: u64) -> Result<()> {
        self.entries.insert(Hasher::digest(token), expires_at);
        Ok(())
    }

    async fn is_revoked(&self, token: &str, now: u64) -> Result<bool> {
        let key = Hasher::digest(token);

        // Lazy cleanup of the entry we just met.
        if self
            .entries
            .remove_if(&key, |_, expires_at| *expires_at <= now)
            .is_some()
        {
            return Ok(false);
        }

        Ok(self.entries.contains_key(&key))
    }

    async fn prune(&self, now: u64) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

/// Registry shared between instances through PostgreSQL.
#[derive(Clone, Debug)]
pub struct PgRevocations {
    pool: Pool<Postgres>,
}

impl PgRevocations {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocations {
    async fn revoke(&self, token: &str, expires_at: u64) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO revoked_tokens (fingerprint, expires_at) VALUES ($1, $2)
                ON CONFLICT (fingerprint) DO UPDATE SET expires_at = EXCLUDED.expires_at"#,
        )
        .bind(Hasher::digest(token))
        .bind(expires_at as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_revoked(&self, token: &str, now: u64) -> Result<bool> {
        let revoked: Option<i64> = sqlx::query_scalar(
            r#"SELECT expires_at FROM revoked_tokens WHERE fingerprint = $1 AND expires_at > $2"#,
        )
        .bind(Hasher::digest(token))
        .bind(now as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(revoked.is_some())
    }

    async fn prune(&self, now: u64) -> Result<u64> {
        let result =
            sqlx::query(r#"DELETE FROM revoked_tokens WHERE expires_at <= $1"#)
                .bind(now as i64)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}

/// Periodically prune `store` on a background task.
pub fn spawn_sweeper(
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match store.prune(clock.now()).await {
                Ok(0) => {},
                Ok(removed) => {
                    tracing::debug!(removed, "pruned expired revoked tokens")
                },
                Err(err) => {
                    tracing::warn!(error = %err, "failed to prune revoked tokens")
                },
            }
        }
    })
}
