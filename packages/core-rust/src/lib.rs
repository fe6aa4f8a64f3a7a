//! `FitSync` Core: request context, lifecycle, counter store contract, and batch types.

pub mod batch;
pub mod context;
pub mod error;
pub mod keys;
pub mod response;
pub mod traits;
pub mod types;

pub use batch::{BatchJob, BatchReport, BatchResult, BatchStatus};
pub use context::{Lifecycle, LifecycleError, RequestContext, RequestPhase, Termination};
pub use error::StoreError;
pub use keys::CacheKeyScope;
pub use response::PipelineResponse;
pub use traits::CounterStore;
pub use types::Principal;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
