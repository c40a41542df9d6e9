//! Key-value cache in front of the workspace store.
//!
//! Two implementations:
//! - `UpstashCache` - shared Redis cache over the Upstash REST API
//! - `MemoryCache` - per-process map with lazy expiry, used when Upstash is
//!   not configured and in tests

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::upstash::{UpstashClient, UpstashError};
use crate::metrics;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Upstash(#[from] UpstashError),

    #[error("unexpected cache value: {0}")]
    UnexpectedValue(String),
}

/// Get/set/delete on string values with a per-entry TTL.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop expired entries, returning how many were removed. Backends that
    /// expire entries server-side have nothing to do.
    async fn sweep(&self) -> usize {
        0
    }
}

// =============================================================================
// Upstash
// =============================================================================

pub struct UpstashCache {
    client: UpstashClient,
}

impl UpstashCache {
    pub fn new(client: UpstashClient) -> Self {
        Self { client }
    }
}

/// Decode a `GET` result.
///
/// Values written by JSON-serializing clients arrive quoted (`"\"acme\""`);
/// those are unwrapped so both writers interoperate.
fn decode_value(result: Value) -> Result<Option<String>, CacheError> {
    match result {
        Value::Null => Ok(None),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::String(inner)) => Ok(Some(inner)),
            _ => Ok(Some(raw)),
        },
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(CacheError::UnexpectedValue(other.to_string())),
    }
}

#[async_trait]
impl KeyValueCache for UpstashCache {
    fn name(&self) -> &'static str {
        "upstash"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let result = self.client.command(&[json!("GET"), json!(key)]).await?;
        decode_value(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let seconds = ttl.as_secs().max(1);
        self.client
            .command(&[json!("SET"), json!(key), json!(value), json!("EX"), json!(seconds)])
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client.command(&[json!("DEL"), json!(key)]).await?;
        Ok(())
    }
}

// =============================================================================
// In-process
// =============================================================================

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Longest lifetime the in-process cache grants an entry.
pub const MAX_MEMORY_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// In-process cache. Entries are expired lazily on read and by `sweep`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it unless a writer refreshed it in between.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let Some(expires_at) = Instant::now().checked_add(ttl.min(MAX_MEMORY_TTL)) else {
            debug!(key, "Cache TTL out of range, entry not stored");
            return Ok(());
        };
        let entry = Entry {
            value: value.to_string(),
            expires_at,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();

        metrics::set_memory_cache_entries(entries.len());
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Swept expired cache entries");
        }
        removed
    }
}
