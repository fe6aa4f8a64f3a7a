//! Terminal handlers: the business logic at the end of a pipeline.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::{PipelineResponse, RequestContext, RequestPhase};
use futures_util::FutureExt;
use tower::Service;
use tracing::error;

use super::operation::{HandlerError, PipelineError, PipelineFuture, PipelineRequest};

/// Business logic invoked once every guard has let the request through.
///
/// Supplied by the application and opaque to the pipeline.
#[async_trait]
pub trait TerminalHandler: Send + Sync + 'static {
    async fn invoke(
        &self,
        ctx: RequestContext,
        body: Bytes,
    ) -> Result<PipelineResponse, HandlerError>;
}

// ---------------------------------------------------------------------------
// Closure handlers
// ---------------------------------------------------------------------------

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wraps an async closure as a [`TerminalHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RequestContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PipelineResponse, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> TerminalHandler for FnHandler<F>
where
    F: Fn(RequestContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PipelineResponse, HandlerError>> + Send + 'static,
{
    async fn invoke(
        &self,
        ctx: RequestContext,
        body: Bytes,
    ) -> Result<PipelineResponse, HandlerError> {
        (self.0)(ctx, body).await
    }
}

// ---------------------------------------------------------------------------
// HandlerService
// ---------------------------------------------------------------------------

/// Innermost pipeline service: marks the request `InHandler` and runs the handler.
///
/// A panicking handler is caught and reported as [`HandlerError::Panicked`] so
/// the outer guards still unwind and run their post-processing.
pub struct HandlerService {
    handler: Arc<dyn TerminalHandler>,
}

impl HandlerService {
    #[must_use]
    pub fn new(handler: Arc<dyn TerminalHandler>) -> Self {
        Self { handler }
    }
}

impl Clone for HandlerService {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl Service<PipelineRequest> for HandlerService {
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PipelineRequest) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let PipelineRequest { ctx, body } = req;
            ctx.lifecycle().advance(RequestPhase::InHandler)?;

            let request_id = ctx.request_id.clone();
            match AssertUnwindSafe(handler.invoke(ctx, body))
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(PipelineError::from),
                Err(_) => {
                    error!(request_id = %request_id, "terminal handler panicked");
                    Err(PipelineError::Handler(HandlerError::Panicked))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn request() -> PipelineRequest {
        let mut ctx = RequestContext::new(Method::GET, "/api/x", "10.0.0.1");
        ctx.lifecycle()
            .advance(RequestPhase::InGuardChain)
            .unwrap();
        ctx.request_id = "req-1".to_string();
        PipelineRequest::new(ctx, Bytes::new())
    }

    #[tokio::test]
    async fn runs_handler_and_marks_phase() {
        let svc = HandlerService::new(Arc::new(handler_fn(|ctx, _body| async move {
            assert_eq!(ctx.phase(), RequestPhase::InHandler);
            Ok(PipelineResponse::new(StatusCode::OK, "text/plain", "hi"))
        })));
        let req = request();
        let lifecycle = req.ctx.lifecycle();
        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(&resp.body[..], b"hi");
        assert_eq!(lifecycle.phase(), RequestPhase::InHandler);
    }

    #[tokio::test]
    async fn panic_becomes_handler_error() {
        let svc = HandlerService::new(Arc::new(handler_fn(|_ctx, _body| async move {
            if true {
                panic!("boom");
            }
            Ok(PipelineResponse::new(StatusCode::OK, "text/plain", ""))
        })));
        let err = svc.oneshot(request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Handler(HandlerError::Panicked)));
    }

    #[tokio::test]
    async fn handler_cannot_run_twice_for_one_request() {
        let svc = HandlerService::new(Arc::new(handler_fn(|_ctx, _body| async move {
            Ok(PipelineResponse::new(StatusCode::OK, "text/plain", ""))
        })));
        let req = request();
        let again = req.clone();
        svc.clone().oneshot(req).await.unwrap();
        let err = svc.oneshot(again).await.unwrap_err();
        assert!(matches!(err, PipelineError::Lifecycle(_)));
    }
}
