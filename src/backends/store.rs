//! Durable workspace store: custom domain to workspace slug.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Upper bound on a single store query.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("more than one workspace claims custom domain {0}")]
    Ambiguous(String),
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Slug of the workspace whose custom domain is exactly `hostname`.
    async fn slug_for_custom_domain(&self, hostname: &str) -> Result<Option<String>, StoreError>;
}

#[derive(Debug, Deserialize)]
struct SlugRow {
    slug: String,
}

/// Supabase (PostgREST) store.
///
/// Issues `GET /rest/v1/{table}?select=slug&custom_domain=eq.{host}&limit=2`;
/// the second row only exists to detect a duplicated custom domain.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SupabaseStore {
    /// # Errors
    ///
    /// Returns `StoreError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        table: &str,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(STORE_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{table}", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl WorkspaceStore for SupabaseStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn slug_for_custom_domain(&self, hostname: &str) -> Result<Option<String>, StoreError> {
        let filter = format!("eq.{hostname}");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("select", "slug"), ("custom_domain", filter.as_str()), ("limit", "2")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let mut rows: Vec<SlugRow> = response.json().await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop().map(|row| row.slug)),
            _ => Err(StoreError::Ambiguous(hostname.to_string())),
        }
    }
}

/// Fixed in-process map, for development and tests.
///
/// Counts queries so callers can check the cache kept lookups off the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    domains: HashMap<String, String>,
    queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new<I, H, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = (H, S)>,
        H: Into<String>,
        S: Into<String>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|(host, slug)| (host.into(), slug.into()))
                .collect(),
            queries: AtomicUsize::new(0),
        }
    }

    /// Number of lookups served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn slug_for_custom_domain(&self, hostname: &str) -> Result<Option<String>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(self.domains.get(hostname).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_lookup_counts_queries() {
        let store = MemoryStore::new([("docs.customer.com", "customer1")]);

        assert_eq!(
            store.slug_for_custom_domain("docs.customer.com").await.unwrap(),
            Some("customer1".to_string())
        );
        assert_eq!(store.slug_for_custom_domain("other.com").await.unwrap(), None);
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_match_is_exact() {
        let store = MemoryStore::new([("docs.customer.com", "customer1")]);
        assert_eq!(store.slug_for_custom_domain("DOCS.customer.com").await.unwrap(), None);
    }

    #[test]
    fn test_supabase_endpoint() {
        let store = SupabaseStore::new("https://abc.supabase.co/", "secret-key", "workspaces").unwrap();
        assert_eq!(store.endpoint, "https://abc.supabase.co/rest/v1/workspaces");
        assert!(!format!("{store:?}").contains("secret-key"));
    }
}
