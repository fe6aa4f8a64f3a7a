use std::time::Duration;

use fitsync_core::CacheKeyScope;

/// What a guard does when the shared store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Skip the guard's function and let the request through.
    Open,
    /// Reject the request with `503 store_unavailable`.
    Closed,
}

/// Server-level configuration for the request pipeline.
///
/// Controls store access, guard policies, batch limits, and overall request bounds.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub batch: BatchConfig,
    /// Limiter for `POST /api/auth/register`.
    pub register_limit: RateLimitConfig,
    /// Limiter for the `/api/ai` routes.
    pub ai_limit: RateLimitConfig,
    /// Maximum number of concurrent API requests before load shedding.
    pub max_concurrent_requests: u32,
    /// Deadline applied to each API request.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            batch: BatchConfig::default(),
            register_limit: RateLimitConfig {
                limit: 5,
                window: Duration::from_secs(15 * 60),
                on_store_error: FailurePolicy::Open,
            },
            ai_limit: RateLimitConfig {
                limit: 20,
                window: Duration::from_secs(60),
                on_store_error: FailurePolicy::Open,
            },
            max_concurrent_requests: 1000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `redis://` URL. `None` selects the in-memory backend.
    pub redis_url: Option<String>,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Upper bound for any single store operation.
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            pool_size: 16,
            op_timeout: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for HS256 bearer tokens.
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
        }
    }
}

/// Fixed-window limit for one limiter scope.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window: Duration,
    pub on_store_error: FailurePolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub scope: CacheKeyScope,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            scope: CacheKeyScope::PerPrincipal,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    /// Latency samples kept per endpoint.
    pub max_samples: usize,
    /// Inactivity expiry of an endpoint's sample list.
    pub retention: Duration,
    /// Capacity of the recorder's queue; samples beyond it are dropped.
    pub queue_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_samples: 1000,
            retention: Duration::from_secs(24 * 60 * 60),
            queue_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Maximum work items running at once.
    pub concurrency_limit: usize,
    /// Largest accepted batch.
    pub max_items: usize,
    /// Upper bound on one `process` call; unfinished items are reported as cancelled.
    pub max_wait: Duration,
    /// Simulated per-item work time of the bulk endpoint.
    pub item_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            max_items: 1000,
            max_wait: Duration::from_secs(30),
            item_delay: Duration::from_millis(100),
        }
    }
}
