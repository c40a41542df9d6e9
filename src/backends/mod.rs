//! External collaborators of the routing core.
//!
//! Each concern sits behind a trait so the routing layer can be assembled
//! from remote backends in production and in-process ones in development
//! and tests. Implementations are constructed once at startup (see
//! `state::Backends`) and shared through `Arc<dyn ...>`.

pub mod cache;
pub mod limiter;
pub mod session;
pub mod store;
pub mod upstash;

pub use cache::{CacheError, KeyValueCache, MemoryCache, UpstashCache};
pub use limiter::{
    LimiterError, LocalRateLimiter, RateLimitBackend, RateLimitOutcome, UpstashSlidingWindow,
};
pub use session::{
    NoopSessionRefresher, SessionError, SessionRefresher, SupabaseSessionRefresher,
};
pub use store::{MemoryStore, StoreError, SupabaseStore, WorkspaceStore};
pub use upstash::{UpstashClient, UpstashError};
