//! Load-shedding guard.
//!
//! Rejects requests when the number in flight already equals
//! `max_concurrent_requests`, with `PipelineError::Overloaded`. The permit
//! pool is global, but sheds are logged and counted per route so the
//! routes that hit the ceiling are visible.

use std::sync::Arc;
use std::task::{Context, Poll};

use fitsync_core::PipelineResponse;
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::service::operation::{PipelineError, PipelineFuture, PipelineRequest};

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent requests via a semaphore.
///
/// When all permits are taken, incoming requests are rejected immediately
/// rather than queued. Clones share the same semaphore, so one layer instance
/// applied to several pipelines enforces one global ceiling.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
    limit: u32,
}

impl LoadShedLayer {
    /// Create a new `LoadShedLayer` with the given concurrency limit.
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            limit: max_concurrent,
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
            limit: self.limit,
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
    limit: u32,
}

impl<S> Service<PipelineRequest> for LoadShedService<S>
where
    S: Service<PipelineRequest, Response = PipelineResponse, Error = PipelineError> + Send,
    S::Future: Send + 'static,
{
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PipelineRequest) -> Self::Future {
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            tracing::warn!(
                request_id = %req.ctx.request_id,
                method = %req.ctx.method,
                path = %req.ctx.path,
                limit = self.limit,
                "shedding request, server overloaded"
            );
            metrics::counter!(
                "fitsync_load_shed_total",
                "method" => req.ctx.method.to_string(),
                "path" => req.ctx.path.clone()
            )
            .increment(1);
            return Box::pin(async { Err(PipelineError::Overloaded) });
        };

        let fut = self.inner.call(req);
        Box::pin(async move {
            // Hold the permit for the duration of the request.
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
