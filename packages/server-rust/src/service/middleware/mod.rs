//! Guards for the request pipeline, each a tower layer.
//!
//! - [`auth`]: Bearer token authentication
//! - [`rate_limit`]: Fixed-window rate limiting per client
//! - [`cache`]: Read-through response cache
//! - [`metrics`]: Request timing into bounded per-endpoint sample lists
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`timeout`]: Per-request deadline enforcement
//! - [`pipeline`]: Composes guards and a terminal handler into one service

pub mod auth;
pub mod cache;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod timeout;

pub use auth::{AuthLayer, Authenticator, JwtAuthenticator};
pub use cache::{CacheLayer, ResponseCache};
pub use load_shed::LoadShedLayer;
pub use metrics::{MetricsLayer, MetricsRecorder};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use rate_limit::{RateLimitLayer, RateLimiter};
pub use timeout::TimeoutLayer;
