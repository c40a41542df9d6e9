//! Sliding-window rate limiter backends keyed by client IP.
//!
//! # Backends
//!
//! - `UpstashSlidingWindow`: shared across every instance of the service.
//!   Each window is a Redis counter; the previous window's count is weighted
//!   by how much of it still overlaps the sliding window, so traffic at a
//!   window boundary cannot double the allowance. The check-and-increment is a
//!   single Lua script, so concurrent requests never over-admit.
//! - `LocalRateLimiter`: per-process GCRA limiter from the Governor crate,
//!   used when no shared backend is configured and local enforcement is
//!   requested. Allows `requests` in a burst, refilled evenly over `window`.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use super::upstash::{UpstashClient, UpstashError};

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error(transparent)]
    Upstash(#[from] UpstashError),

    #[error("unexpected limiter response: {0}")]
    UnexpectedResponse(String),

    #[error("rate limit must allow at least one request per non-zero window")]
    InvalidQuota,
}

/// Result of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the window resets, as Unix milliseconds.
    pub reset_ms: u64,
}

#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Requests allowed per window.
    fn limit(&self) -> u32;

    /// Count one request for `identifier` and report whether it is allowed.
    async fn check(&self, identifier: &str) -> Result<RateLimitOutcome, LimiterError>;

    /// Forget idle keys, returning how many were removed.
    async fn sweep(&self) -> usize {
        0
    }
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Upstash sliding window
// =============================================================================

/// KEYS: current window, previous window.
/// ARGV: limit, now (ms), window (ms), increment.
/// Returns the remaining allowance, or -1 when the request is rejected.
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local currentKey  = KEYS[1]
local previousKey = KEYS[2]
local tokens      = tonumber(ARGV[1])
local now         = tonumber(ARGV[2])
local window      = tonumber(ARGV[3])
local incrementBy = tonumber(ARGV[4])

local current = tonumber(redis.call("GET", currentKey) or "0")
local previous = tonumber(redis.call("GET", previousKey) or "0")

local elapsed = (now % window) / window
previous = math.floor((1 - elapsed) * previous)

if previous + current >= tokens then
  return -1
end

local newValue = redis.call("INCRBY", currentKey, incrementBy)
if newValue == incrementBy then
  redis.call("PEXPIRE", currentKey, window * 2 + 1000)
end
return tokens - (newValue + previous)
"#;

/// Redis keys for the window containing `now_ms`, and that window's end.
fn window_keys(
    prefix: &str,
    identifier: &str,
    now_ms: u64,
    window_ms: u64,
) -> (String, String, u64) {
    let current = now_ms / window_ms;
    let previous = current.saturating_sub(1);
    (
        format!("{prefix}:{identifier}:{current}"),
        format!("{prefix}:{identifier}:{previous}"),
        (current + 1) * window_ms,
    )
}

/// Map the script's reply to an outcome. `-1` (or any negative) is a rejection.
fn outcome_from_reply(
    reply: &Value,
    limit: u32,
    reset_ms: u64,
) -> Result<RateLimitOutcome, LimiterError> {
    let remaining = match reply {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| LimiterError::UnexpectedResponse(reply.to_string()))?;

    Ok(RateLimitOutcome {
        success: remaining >= 0,
        limit,
        remaining: u32::try_from(remaining).unwrap_or(0),
        reset_ms,
    })
}

pub struct UpstashSlidingWindow {
    client: UpstashClient,
    prefix: String,
    limit: u32,
    window_ms: u64,
}

impl UpstashSlidingWindow {
    /// # Errors
    ///
    /// Returns `LimiterError::InvalidQuota` if `limit` is 0 or `window` is
    /// shorter than a millisecond.
    pub fn new(
        client: UpstashClient,
        prefix: impl Into<String>,
        limit: u32,
        window: Duration,
    ) -> Result<Self, LimiterError> {
        let window_ms = duration_ms(window);
        if limit == 0 || window_ms == 0 {
            return Err(LimiterError::InvalidQuota);
        }
        Ok(Self {
            client,
            prefix: prefix.into(),
            limit,
            window_ms,
        })
    }
}

#[async_trait]
impl RateLimitBackend for UpstashSlidingWindow {
    fn name(&self) -> &'static str {
        "upstash"
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    async fn check(&self, identifier: &str) -> Result<RateLimitOutcome, LimiterError> {
        self.check_at(identifier, now_ms()).await
    }
}

impl UpstashSlidingWindow {
    /// `EVAL` command counting one request at `now_ms`, plus the window end.
    fn eval_command(&self, identifier: &str, now_ms: u64) -> (Vec<Value>, u64) {
        let (current_key, previous_key, reset_ms) =
            window_keys(&self.prefix, identifier, now_ms, self.window_ms);
        let command = vec![
            json!("EVAL"),
            json!(SLIDING_WINDOW_SCRIPT),
            json!(2),
            json!(current_key),
            json!(previous_key),
            json!(self.limit),
            json!(now_ms),
            json!(self.window_ms),
            json!(1),
        ];
        (command, reset_ms)
    }

    /// Count one request for `identifier` with the clock at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if Upstash is unreachable or replies with something
    /// other than an integer.
    pub async fn check_at(
        &self,
        identifier: &str,
        now_ms: u64,
    ) -> Result<RateLimitOutcome, LimiterError> {
        let (command, reset_ms) = self.eval_command(identifier, now_ms);
        let reply = self.client.command(&command).await?;
        outcome_from_reply(&reply, self.limit, reset_ms)
    }
}

// =============================================================================
// In-process (Governor)
// =============================================================================

type KeyedLimiter = RateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    DefaultClock,
    StateInformationMiddleware,
>;

pub struct LocalRateLimiter {
    limiter: KeyedLimiter,
    limit: u32,
    window: Duration,
}

impl LocalRateLimiter {
    /// # Errors
    ///
    /// Returns `LimiterError::InvalidQuota` if `limit` is 0 or `window` is zero.
    pub fn new(limit: u32, window: Duration) -> Result<Self, LimiterError> {
        let burst = NonZeroU32::new(limit).ok_or(LimiterError::InvalidQuota)?;
        let quota = Quota::with_period(window / limit)
            .ok_or(LimiterError::InvalidQuota)?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
            limit,
            window,
        })
    }

    /// Keys currently tracked.
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

#[async_trait]
impl RateLimitBackend for LocalRateLimiter {
    fn name(&self) -> &'static str {
        "local"
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    async fn check(&self, identifier: &str) -> Result<RateLimitOutcome, LimiterError> {
        let now = now_ms();
        let key = identifier.to_string();

        let outcome = match self.limiter.check_key(&key) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                // Time until the bucket is full again.
                let used = self.limit.saturating_sub(remaining);
                let refill = duration_ms(self.window) * u64::from(used) / u64::from(self.limit);
                RateLimitOutcome {
                    success: true,
                    limit: self.limit,
                    remaining,
                    reset_ms: now + refill,
                }
            }
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                RateLimitOutcome {
                    success: false,
                    limit: self.limit,
                    remaining: 0,
                    reset_ms: now + duration_ms(wait),
                }
            }
        };
        Ok(outcome)
    }

    async fn sweep(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let removed = before.saturating_sub(self.limiter.len());
        if removed > 0 {
            debug!(removed, "Swept idle rate limiter keys");
        }
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keys() {
        let (current, previous, reset) = window_keys("ratelimit", "1.2.3.4", 25_000, 10_000);
        assert_eq!(current, "ratelimit:1.2.3.4:2");
        assert_eq!(previous, "ratelimit:1.2.3.4:1");
        assert_eq!(reset, 30_000);
    }

    #[test]
    fn test_window_keys_first_window() {
        let (current, previous, reset) = window_keys("rl", "ip", 500, 10_000);
        assert_eq!(current, "rl:ip:0");
        assert_eq!(previous, "rl:ip:0");
        assert_eq!(reset, 10_000);
    }

    fn upstash_limiter() -> UpstashSlidingWindow {
        let client = UpstashClient::new("http://127.0.0.1:1", "token").unwrap();
        UpstashSlidingWindow::new(client, "ratelimit", 10, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_eval_command_arguments() {
        let (command, reset_ms) = upstash_limiter().eval_command("203.0.113.7", 25_000);

        assert_eq!(
            command,
            vec![
                json!("EVAL"),
                json!(SLIDING_WINDOW_SCRIPT),
                json!(2),
                json!("ratelimit:203.0.113.7:2"),
                json!("ratelimit:203.0.113.7:1"),
                json!(10),
                json!(25_000),
                json!(10_000),
                json!(1),
            ]
        );
        assert_eq!(reset_ms, 30_000);
    }

    #[test]
    fn test_eval_command_across_window_boundary() {
        let limiter = upstash_limiter();

        let (before, reset_before) = limiter.eval_command("ip", 29_999);
        let (after, reset_after) = limiter.eval_command("ip", 30_000);

        assert_eq!(before[3], json!("ratelimit:ip:2"));
        assert_eq!(before[4], json!("ratelimit:ip:1"));
        assert_eq!(reset_before, 30_000);

        // The old current window becomes the weighted previous window
        assert_eq!(after[3], json!("ratelimit:ip:3"));
        assert_eq!(after[4], json!("ratelimit:ip:2"));
        assert_eq!(reset_after, 40_000);
    }

    #[test]
    fn test_script_reply_mapping() {
        let allowed = outcome_from_reply(&json!(3), 10, 30_000).unwrap();
        assert!(allowed.success);
        assert_eq!(allowed.remaining, 3);
        assert_eq!(allowed.reset_ms, 30_000);

        let last = outcome_from_reply(&json!("0"), 10, 30_000).unwrap();
        assert!(last.success);
        assert_eq!(last.remaining, 0);

        let rejected = outcome_from_reply(&json!(-1), 10, 40_000).unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.limit, 10);

        assert!(matches!(
            outcome_from_reply(&Value::Null, 10, 0),
            Err(LimiterError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_local_rejects_zero_limit() {
        assert!(matches!(
            LocalRateLimiter::new(0, Duration::from_secs(10)),
            Err(LimiterError::InvalidQuota)
        ));
        assert!(matches!(
            LocalRateLimiter::new(10, Duration::ZERO),
            Err(LimiterError::InvalidQuota)
        ));
    }

    #[tokio::test]
    async fn test_local_allows_limit_then_rejects() {
        let limiter = LocalRateLimiter::new(10, Duration::from_secs(10)).unwrap();

        for expected_remaining in (0..10).rev() {
            let outcome = limiter.check("10.0.0.1").await.unwrap();
            assert!(outcome.success);
            assert_eq!(outcome.remaining, expected_remaining);
            assert_eq!(outcome.limit, 10);
        }

        let outcome = limiter.check("10.0.0.1").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.remaining, 0);
        assert!(outcome.reset_ms > now_ms().saturating_sub(1_000));
    }

    #[tokio::test]
    async fn test_local_keys_are_independent() {
        let limiter = LocalRateLimiter::new(1, Duration::from_secs(10)).unwrap();
        assert!(limiter.check("a").await.unwrap().success);
        assert!(!limiter.check("a").await.unwrap().success);
        assert!(limiter.check("b").await.unwrap().success);
        assert_eq!(limiter.len(), 2);
    }
}
