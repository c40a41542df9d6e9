//! # OpenPolicy Router
//!
//! Multi-tenant request routing for a hosted policy-page platform. Every
//! workspace is reachable three ways, and all of them land on the same
//! internal `/{workspace}/...` routes:
//!
//! - `acme.openpolicyhq.com/privacy` (workspace subdomain)
//! - `docs.customer.com/terms` (custom domain mapped to a workspace)
//! - `openpolicyhq.com/acme/privacy` (path-based, passed through)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Rate Limit Gate (API paths, sliding window per client IP)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Tenant Routing (session refresh → classify → resolve →     │
//! │                  rewrite → Set-Cookie propagation)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Router (request id, tracing, CORS → handlers)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Backends: Upstash cache + limiter, Supabase store + auth   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use openpolicy_router::{AppState, Backends, Config, build_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let backends = Backends::from_config(&config)?;
//!
//!     let state = AppState::new(config, backends);
//!     let app = build_app(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Backend Configuration
//!
//! Enable the shared cache and rate limiter:
//! ```bash
//! UPSTASH_REDIS_REST_URL=https://... UPSTASH_REDIS_REST_TOKEN=... cargo run
//! ```
//!
//! Map a custom domain locally without a database:
//! ```bash
//! STATIC_CUSTOM_DOMAINS=docs.customer.lvh.me=customer1 cargo run
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod tenancy;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::{App, build_app, build_router};
pub use state::{AppState, Backends};
pub use tenancy::{RoutingDecision, TenantRouter};
