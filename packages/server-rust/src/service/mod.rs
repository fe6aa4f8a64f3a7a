//! Request pipeline framework.
//!
//! 1. **Requests** (`operation`): `PipelineRequest`, `PipelineError`, boxed service types
//! 2. **Guards** (`middleware`): Tower layers (auth, rate limit, cache, metrics, load shed, timeout)
//! 3. **Handlers** (`handler`, `domain`): Terminal business logic per route
//! 4. **Routing** (`router`): Dispatch to pipelines by method and path
//! 5. **Batching** (`batch`): Bounded fan-out used by handlers
//! 6. **Background workers** (`worker`): Fire-and-forget task queues

pub mod batch;
pub mod config;
pub mod domain;
pub mod handler;
pub mod middleware;
pub mod operation;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use batch::{BatchError, BatchExecutor, BatchItemError, BatchWork};
pub use config::{FailurePolicy, ServerConfig};
pub use handler::{handler_fn, HandlerService, TerminalHandler};
pub use middleware::{Pipeline, PipelineBuilder};
pub use operation::{BoxPipelineService, HandlerError, PipelineError, PipelineRequest};
pub use router::RouteTable;
pub use worker::{BackgroundRunnable, BackgroundWorker, WorkerHandle};
