//! axum handlers and the state they share.

pub mod api;
pub mod health;

pub use api::api_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::{Duration, Instant};

use fitsync_core::CounterStore;

use super::{NetworkConfig, ShutdownController};
use crate::service::middleware::cache::CacheStats;
use crate::service::RouteTable;

/// Shared state handed to every handler via `State` extraction.
///
/// Everything is behind `Arc`, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Pipelines for every `/api` route.
    pub routes: Arc<RouteTable>,
    /// Shared store, pinged by `/health`.
    pub store: Arc<dyn CounterStore>,
    /// Response cache counters, reported by `/health`.
    pub cache_stats: Arc<CacheStats>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Deadline stamped on each pipeline request.
    pub api_timeout: Duration,
    /// Used for uptime reporting.
    pub start_time: Instant,
}
