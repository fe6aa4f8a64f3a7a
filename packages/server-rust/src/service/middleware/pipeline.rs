//! Pipeline composition: an ordered chain of guards in front of one terminal handler.
//!
//! Guards are registered outermost first. Each guard sees the request before
//! every guard registered after it, and sees the response (or error) after
//! them, so post-processing runs in the reverse of registration order.
//!
//! ```text
//! request  -> guard[0] -> guard[1] -> ... -> handler
//! response <- guard[0] <- guard[1] <- ... <- handler
//! ```
//!
//! A guard short-circuits by returning without calling its inner service;
//! nothing registered after it runs.

use std::sync::Arc;
use std::task::{Context, Poll};

use fitsync_core::{PipelineResponse, RequestPhase, Termination};
use tower::util::{BoxCloneService, Oneshot};
use tower::{Layer, Service, ServiceExt};

use crate::service::handler::{HandlerService, TerminalHandler};
use crate::service::operation::{BoxPipelineService, PipelineError, PipelineFuture, PipelineRequest};

type GuardFn = Box<dyn FnOnce(BoxPipelineService) -> BoxPipelineService + Send>;

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Collects guards for one route and seals them around a terminal handler.
pub struct PipelineBuilder {
    name: String,
    guards: Vec<GuardFn>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guards: Vec::new(),
        }
    }

    /// Appends a guard. Guards run in the order they are added.
    #[must_use]
    pub fn guard<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxPipelineService> + Send + 'static,
        L::Service: Service<PipelineRequest, Response = PipelineResponse, Error = PipelineError>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<PipelineRequest>>::Future: Send + 'static,
    {
        self.guards
            .push(Box::new(move |inner| BoxCloneService::new(layer.layer(inner))));
        self
    }

    /// Appends a guard only when `layer` is `Some`.
    #[must_use]
    pub fn guard_opt<L>(self, layer: Option<L>) -> Self
    where
        L: Layer<BoxPipelineService> + Send + 'static,
        L::Service: Service<PipelineRequest, Response = PipelineResponse, Error = PipelineError>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<PipelineRequest>>::Future: Send + 'static,
    {
        match layer {
            Some(layer) => self.guard(layer),
            None => self,
        }
    }

    /// Number of guards registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Seals the chain around `handler`.
    #[must_use]
    pub fn handler(self, handler: Arc<dyn TerminalHandler>) -> Pipeline {
        let mut service: BoxPipelineService = BoxCloneService::new(HandlerService::new(handler));
        // Wrap innermost first so guard[0] ends up outermost.
        for wrap in self.guards.into_iter().rev() {
            service = wrap(service);
        }
        Pipeline {
            name: Arc::from(self.name),
            inner: service,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A sealed guard chain plus handler, driving each request's lifecycle.
///
/// Calling the pipeline moves the request `Pending -> InGuardChain`, runs the
/// chain, and records the termination: `Completed` when the handler answered,
/// `Aborted` when a guard short-circuited (including cache hits) or anything
/// failed.
#[derive(Clone)]
pub struct Pipeline {
    name: Arc<str>,
    inner: BoxPipelineService,
}

impl Pipeline {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs one request through a clone of the pipeline.
    ///
    /// The returned future owns its service, so it is `Send` even though the
    /// pipeline itself is not `Sync`.
    pub fn run(&self, req: PipelineRequest) -> Oneshot<Pipeline, PipelineRequest> {
        self.clone().oneshot(req)
    }
}

impl Service<PipelineRequest> for Pipeline {
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PipelineRequest) -> Self::Future {
        let lifecycle = req.ctx.lifecycle();
        let name = Arc::clone(&self.name);
        if let Err(e) = lifecycle.advance(RequestPhase::InGuardChain) {
            return Box::pin(async move { Err(PipelineError::Lifecycle(e)) });
        }

        let fut = self.inner.call(req);
        Box::pin(async move {
            let result = fut.await;
            let termination = match &result {
                Ok(resp) if lifecycle.phase() == RequestPhase::InHandler => {
                    Termination::Completed {
                        status: resp.status.as_u16(),
                    }
                }
                Ok(resp) => Termination::Aborted {
                    status: resp.status.as_u16(),
                },
                Err(e) => Termination::Aborted {
                    status: e.status().as_u16(),
                },
            };
            if let Err(e) = lifecycle.finish(termination) {
                tracing::error!(pipeline = %name, error = %e, "request terminated twice");
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
