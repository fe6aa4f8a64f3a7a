//! Fixed-window rate limiting backed by the shared counter store.
//!
//! Each admission is a single atomic `incr_with_ttl` followed by a compare
//! against the limit, so two concurrent requests can never both observe
//! "under the limit" for the last slot. The TTL is applied only when the
//! increment opens a new window.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use fitsync_core::keys::rate_limit_key;
use fitsync_core::{CounterStore, PipelineResponse, StoreError};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::service::config::{FailurePolicy, RateLimitConfig};
use crate::service::operation::{PipelineError, PipelineFuture, PipelineRequest};

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; `remaining` more requests fit in the current window.
    Allowed { remaining: u64 },
    /// Over the limit.
    ///
    /// `retry_after` is the full window length. The true reset may come
    /// sooner; callers retrying after this hint are always admitted.
    Denied { retry_after: Duration },
}

/// Fixed-window limiter for one named scope.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    scope: String,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, scope: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            store,
            scope: scope.into(),
            config,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one request from `client_key` and decides whether it may proceed.
    ///
    /// Denied requests still count, so a client hammering the endpoint keeps
    /// the counter above the limit until the window expires.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] when the counter cannot be incremented;
    /// the caller applies the configured [`FailurePolicy`].
    pub async fn admit(&self, client_key: &str) -> Result<Admission, StoreError> {
        let key = rate_limit_key(&self.scope, client_key);
        let count = self.store.incr_with_ttl(&key, self.config.window).await?;
        let count = u64::try_from(count).unwrap_or(0);

        if count <= self.config.limit {
            Ok(Admission::Allowed {
                remaining: self.config.limit - count,
            })
        } else {
            Ok(Admission::Denied {
                retry_after: self.config.window,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitLayer
// ---------------------------------------------------------------------------

/// Tower layer that admits or rejects requests per `ctx.client_key`.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<PipelineRequest> for RateLimitService<S>
where
    S: Service<PipelineRequest, Response = PipelineResponse, Error = PipelineError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PipelineRequest) -> Self::Future {
        // The admission check is async, so drive a fresh clone and keep the
        // service that was polled ready.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);

        Box::pin(async move {
            let limit = limiter.config.limit;
            let remaining = match limiter.admit(&req.ctx.client_key).await {
                Ok(Admission::Allowed { remaining }) => Some(remaining),
                Ok(Admission::Denied { retry_after }) => {
                    debug!(
                        scope = %limiter.scope,
                        client = %req.ctx.client_key,
                        "rate limit exceeded"
                    );
                    metrics::counter!("fitsync_rate_limit_denied_total", "scope" => limiter.scope.clone())
                        .increment(1);
                    return Err(PipelineError::RateLimited { limit, retry_after });
                }
                Err(e) => match limiter.config.on_store_error {
                    FailurePolicy::Open => {
                        warn!(scope = %limiter.scope, error = %e, "rate limiter store error, admitting");
                        metrics::counter!("fitsync_rate_limit_store_errors_total", "scope" => limiter.scope.clone())
                            .increment(1);
                        None
                    }
                    FailurePolicy::Closed => {
                        warn!(scope = %limiter.scope, error = %e, "rate limiter store error, rejecting");
                        return Err(PipelineError::StoreUnavailable(e));
                    }
                },
            };

            let mut resp = inner.oneshot(req).await?;
            resp.insert_header("x-ratelimit-limit", limit.to_string());
            if let Some(remaining) = remaining {
                resp.insert_header("x-ratelimit-remaining", remaining.to_string());
            }
            Ok(resp)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
