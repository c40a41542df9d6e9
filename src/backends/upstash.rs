//! Minimal Upstash Redis REST client.
//!
//! Upstash accepts a Redis command as a JSON array posted to the database
//! URL and answers with `{"result": ...}` or `{"error": "..."}`.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Upper bound on a single Upstash round trip.
pub const UPSTASH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum UpstashError {
    #[error("upstash request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstash returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("upstash command error: {0}")]
    Command(String),
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for one Upstash Redis database.
#[derive(Clone)]
pub struct UpstashClient {
    client: Client,
    url: String,
    token: String,
}

impl std::fmt::Debug for UpstashClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstashClient")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl UpstashClient {
    /// Create a client for the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns `UpstashError::Transport` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, UpstashError> {
        let client = Client::builder().timeout(UPSTASH_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Execute one command and return its `result` (`Value::Null` for nil).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or a command
    /// error reported by Redis.
    pub async fn command(&self, args: &[Value]) -> Result<Value, UpstashError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<CommandResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(UpstashError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: CommandResponse = response.json().await?;
        if let Some(error) = parsed.error {
            return Err(UpstashError::Command(error));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}
