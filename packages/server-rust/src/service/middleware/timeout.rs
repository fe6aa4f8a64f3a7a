//! Timeout guard.
//!
//! Aborts requests that exceed their `ctx.timeout` with `PipelineError::Timeout`.
//! Each expiry is logged and counted with the stage the request had reached,
//! so slow guards (store round trips) can be told apart from slow handlers.

use std::task::{Context, Poll};

use fitsync_core::{PipelineResponse, RequestPhase};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{PipelineError, PipelineFuture, PipelineRequest};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-request timeout enforcement.
///
/// The deadline is read from each request's `ctx.timeout`, so different routes
/// can carry different bounds.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<PipelineRequest> for TimeoutService<S>
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
        let duration = req.ctx.timeout;
        let lifecycle = req.ctx.lifecycle();
        let request_id = req.ctx.request_id.clone();
        let path = req.ctx.path.clone();
        let fut = self.inner.call(req);
        Box::pin(async move {
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = duration.as_millis() as u64;
                    let stage = stalled_stage(lifecycle.phase());
                    warn!(
                        request_id = %request_id,
                        path = %path,
                        timeout_ms,
                        stage,
                        "request deadline exceeded"
                    );
                    metrics::counter!(
                        "fitsync_request_timeouts_total",
                        "path" => path,
                        "stage" => stage
                    )
                    .increment(1);
                    Err(PipelineError::Timeout { timeout_ms })
                }
            }
        })
    }
}

/// Where a request was when its deadline passed.
fn stalled_stage(phase: RequestPhase) -> &'static str {
    match phase {
        RequestPhase::InHandler => "handler",
        _ => "guards",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use fitsync_core::{RequestContext, Termination};
    use http::{Method, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::service::handler::handler_fn;
    use crate::service::middleware::PipelineBuilder;

    /// Service that takes a configurable delay before responding.
    #[derive(Clone)]
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<PipelineRequest> for SlowService {
        type Response = PipelineResponse;
        type Error = PipelineError;
        type Future = PipelineFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: PipelineRequest) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(PipelineResponse::new(StatusCode::OK, "text/plain", ""))
            })
        }
    }

    fn make_req(timeout_ms: u64) -> PipelineRequest {
        let ctx = RequestContext::new(Method::GET, "/api/x", "c")
            .with_timeout(Duration::from_millis(timeout_ms));
        PipelineRequest::new(ctx, "")
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 10 });
        let resp = svc.oneshot(make_req(1000)).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 200 });
        let err = svc.oneshot(make_req(50)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 50 }));
    }

    #[test]
    fn stage_follows_lifecycle_phase() {
        assert_eq!(stalled_stage(RequestPhase::InHandler), "handler");
        assert_eq!(stalled_stage(RequestPhase::InGuardChain), "guards");
        assert_eq!(stalled_stage(RequestPhase::Pending), "guards");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_aborts_the_lifecycle_with_504() {
        let pipeline = PipelineBuilder::new("slow")
            .guard(TimeoutLayer)
            .handler(Arc::new(handler_fn(|_ctx, _body| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(PipelineResponse::new(StatusCode::OK, "text/plain", ""))
            })));

        let req = make_req(100);
        let lifecycle = req.ctx.lifecycle();
        let err = pipeline.run(req).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.reason(), "timeout");
        assert_eq!(
            lifecycle.termination(),
            Some(Termination::Aborted { status: 504 })
        );
    }
}
