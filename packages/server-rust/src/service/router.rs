//! Route table: dispatches requests to the pipeline registered for `(method, path)`.

use std::collections::HashMap;
use std::task::{Context, Poll};

use fitsync_core::{PipelineResponse, Termination};
use http::Method;
use parking_lot::Mutex;
use tower::{Service, ServiceExt};

use super::middleware::Pipeline;
use super::operation::{PipelineError, PipelineFuture, PipelineRequest};

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

/// Maps `(method, path)` to the pipeline serving it.
///
/// Pipelines are `Send` but not `Sync`, so each sits behind a mutex that is
/// held only long enough to clone it; requests then run on their own copy.
/// Unregistered routes fail with [`PipelineError::NotFound`].
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<(Method, String), Mutex<Pipeline>>,
}

impl RouteTable {
    /// Create a new empty route table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pipeline` for `method path`, replacing any previous entry.
    pub fn register(&mut self, method: Method, path: impl Into<String>, pipeline: Pipeline) {
        self.routes.insert((method, path.into()), Mutex::new(pipeline));
    }

    #[must_use]
    pub fn contains(&self, method: &Method, path: &str) -> bool {
        self.routes.contains_key(&(method.clone(), path.to_string()))
    }

    /// Registered routes as `(method, path, pipeline name)`, sorted by path.
    #[must_use]
    pub fn routes(&self) -> Vec<(Method, String, String)> {
        let mut out: Vec<_> = self
            .routes
            .iter()
            .map(|((method, path), pipeline)| {
                (method.clone(), path.clone(), pipeline.lock().name().to_string())
            })
            .collect();
        out.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        out
    }

    /// Runs `req` through the pipeline for its method and path.
    pub fn dispatch(&self, req: PipelineRequest) -> PipelineFuture {
        let key = (req.ctx.method.clone(), req.ctx.path.clone());
        let Some(slot) = self.routes.get(&key) else {
            let lifecycle = req.ctx.lifecycle();
            let err = PipelineError::NotFound {
                method: key.0.to_string(),
                path: key.1,
            };
            let _ = lifecycle.finish(Termination::Aborted {
                status: err.status().as_u16(),
            });
            return Box::pin(async move { Err(err) });
        };
        let pipeline = slot.lock().clone();
        Box::pin(pipeline.oneshot(req))
    }
}

impl Service<PipelineRequest> for RouteTable {
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Each dispatch drives its own pipeline clone to readiness.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PipelineRequest) -> Self::Future {
        self.dispatch(req)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fitsync_core::RequestContext;
    use http::StatusCode;

    use super::*;
    use crate::service::handler::handler_fn;
    use crate::service::middleware::PipelineBuilder;

    fn pipeline(name: &'static str) -> Pipeline {
        PipelineBuilder::new(name).handler(Arc::new(handler_fn(move |_ctx, _body| async move {
            Ok(PipelineResponse::new(StatusCode::OK, "text/plain", name))
        })))
    }

    #[tokio::test]
    async fn dispatches_by_method_and_path() {
        let mut table = RouteTable::new();
        table.register(Method::GET, "/api/a", pipeline("get-a"));
        table.register(Method::POST, "/api/a", pipeline("post-a"));

        let get = PipelineRequest::new(RequestContext::new(Method::GET, "/api/a", "c"), "");
        let post = PipelineRequest::new(RequestContext::new(Method::POST, "/api/a", "c"), "");

        assert_eq!(&table.dispatch(get).await.unwrap().body[..], b"get-a");
        assert_eq!(&table.dispatch(post).await.unwrap().body[..], b"post-a");
        assert!(table.contains(&Method::GET, "/api/a"));
        assert_eq!(table.routes().len(), 2);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found_and_aborted() {
        let table = RouteTable::new();
        let req = PipelineRequest::new(RequestContext::new(Method::GET, "/api/missing", "c"), "");
        let lifecycle = req.ctx.lifecycle();

        let err = table.dispatch(req).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            lifecycle.termination(),
            Some(Termination::Aborted { status: 404 })
        );
    }

    #[tokio::test]
    async fn concurrent_dispatch_from_shared_table() {
        let mut table = RouteTable::new();
        table.register(Method::GET, "/api/a", pipeline("a"));
        let table = Arc::new(table);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let table = Arc::clone(&table);
            tasks.spawn(async move {
                let ctx = RequestContext::new(Method::GET, "/api/a", format!("client-{i}"));
                table.dispatch(PipelineRequest::new(ctx, "")).await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap().is_ok());
        }
    }
}
