//! Bounded fan-out/fan-in over a list of work items.
//!
//! A per-call semaphore caps how many items run at once. A permit is taken
//! before each task is spawned and moves into the task, so it is released on
//! every exit path, abort included. Results come back in input order no matter
//! which items finish first, and one item failing or panicking never affects
//! its siblings.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use fitsync_core::{BatchJob, BatchReport, BatchResult};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::BatchConfig;

/// Reported for items that had not finished when the deadline passed.
pub const CANCELLED: &str = "cancelled";

// ---------------------------------------------------------------------------
// Work and errors
// ---------------------------------------------------------------------------

/// Failure of a single work item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchItemError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("{0}")]
    Failed(String),
}

/// Whole-batch rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("batch of {size} items exceeds the limit of {max}")]
    TooLarge { size: usize, max: usize },
}

/// Per-item work run by the executor.
#[async_trait]
pub trait BatchWork: Send + Sync + 'static {
    async fn invoke(&self, job: BatchJob) -> Result<Value, BatchItemError>;
}

// ---------------------------------------------------------------------------
// BatchExecutor
// ---------------------------------------------------------------------------

/// Runs batches with at most `concurrency_limit` items in flight.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    /// A `concurrency_limit` of zero is raised to one.
    #[must_use]
    pub fn new(mut config: BatchConfig) -> Self {
        config.concurrency_limit = config.concurrency_limit.max(1);
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Processes `items`, giving up on unfinished ones after `max_wait`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::TooLarge`] when `items` exceeds `max_items`.
    pub async fn process(
        &self,
        items: Vec<Value>,
        work: Arc<dyn BatchWork>,
    ) -> Result<BatchReport, BatchError> {
        let deadline = Instant::now() + self.config.max_wait;
        self.process_until(items, work, deadline).await
    }

    /// Processes `items`, reporting every item not done by `deadline` as
    /// [`CANCELLED`] and aborting its task.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::TooLarge`] when `items` exceeds `max_items`.
    pub async fn process_until(
        &self,
        items: Vec<Value>,
        work: Arc<dyn BatchWork>,
        deadline: Instant,
    ) -> Result<BatchReport, BatchError> {
        let size = items.len();
        if size > self.config.max_items {
            return Err(BatchError::TooLarge {
                size,
                max: self.config.max_items,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let mut tasks: JoinSet<BatchResult> = JoinSet::new();
        let mut slots: Vec<Option<BatchResult>> = vec![None; size];

        let fan_out = async {
            for (index, payload) in items.into_iter().enumerate() {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let work = Arc::clone(&work);
                tasks.spawn(async move {
                    let _permit = permit;
                    run_item(work.as_ref(), BatchJob { index, payload }).await
                });
            }
            while let Some(joined) = tasks.join_next().await {
                if let Ok(result) = joined {
                    let index = result.index;
                    slots[index] = Some(result);
                }
            }
        };

        if tokio::time::timeout_at(deadline, fan_out).await.is_err() {
            warn!(size, "batch deadline passed, cancelling unfinished items");
            tasks.abort_all();
            // Keep results of items that finished before the abort landed.
            while let Some(joined) = tasks.join_next().await {
                if let Ok(result) = joined {
                    let index = result.index;
                    slots[index] = Some(result);
                }
            }
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| BatchResult::failed(index, CANCELLED)))
            .collect();
        let report = BatchReport::from_results(results);
        debug!(
            size,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch processed"
        );
        Ok(report)
    }
}

/// Runs one item, turning errors and panics into a failed result.
async fn run_item(work: &dyn BatchWork, job: BatchJob) -> BatchResult {
    let index = job.index;
    match AssertUnwindSafe(work.invoke(job)).catch_unwind().await {
        Ok(Ok(output)) => BatchResult::succeeded(index, output),
        Ok(Err(e)) => BatchResult::failed(index, e.to_string()),
        Err(_) => {
            warn!(index, "batch item panicked");
            BatchResult::failed(index, "item panicked")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use fitsync_core::BatchStatus;
    use serde_json::json;

    use super::*;

    /// Sleeps per item, tracks peak concurrency, and fails or panics on request.
    struct ScriptedWork {
        delay: Box<dyn Fn(usize) -> Duration + Send + Sync>,
        fail_on: Option<usize>,
        panic_on: Option<usize>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedWork {
        fn fixed(delay: Duration) -> Self {
            Self::with(move |_| delay)
        }

        fn with(delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
            Self {
                delay: Box::new(delay),
                fail_on: None,
                panic_on: None,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BatchWork for ScriptedWork {
        async fn invoke(&self, job: BatchJob) -> Result<Value, BatchItemError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep((self.delay)(job.index)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on == Some(job.index) {
                panic!("item {} exploded", job.index);
            }
            if self.fail_on == Some(job.index) {
                return Err(BatchItemError::Failed(format!("item {} failed", job.index)));
            }
            Ok(json!({ "index": job.index, "echo": job.payload }))
        }
    }

    fn executor(limit: usize) -> BatchExecutor {
        BatchExecutor::new(BatchConfig {
            concurrency_limit: limit,
            ..BatchConfig::default()
        })
    }

    fn items(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!(i)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn runs_in_waves_of_the_concurrency_limit() {
        let work = Arc::new(ScriptedWork::fixed(Duration::from_millis(100)));
        let start = Instant::now();

        let report = executor(10).process(items(20), work.clone()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(200));
        assert_eq!(work.peak.load(Ordering::SeqCst), 10);
        assert_eq!(report.status, BatchStatus::AllSucceeded);
        assert_eq!(report.succeeded, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_affect_siblings() {
        let mut work = ScriptedWork::fixed(Duration::from_millis(10));
        work.fail_on = Some(7);

        let report = executor(4).process(items(20), Arc::new(work)).await.unwrap();

        assert_eq!(report.status, BatchStatus::Partial);
        assert_eq!((report.succeeded, report.failed), (19, 1));
        assert!(!report.results[7].success);
        assert_eq!(report.results[7].error.as_deref(), Some("item 7 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_item_is_isolated() {
        let mut work = ScriptedWork::fixed(Duration::from_millis(10));
        work.panic_on = Some(3);

        let report = executor(2).process(items(6), Arc::new(work)).await.unwrap();

        assert_eq!((report.succeeded, report.failed), (5, 1));
        assert_eq!(report.results[3].error.as_deref(), Some("item panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order_not_completion_order() {
        // Later items finish first.
        let work = ScriptedWork::with(|i| Duration::from_millis(100 - 10 * i as u64));

        let report = executor(10).process(items(10), Arc::new(work)).await.unwrap();

        let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        for (i, result) in report.results.iter().enumerate() {
            assert_eq!(result.output.as_ref().unwrap()["echo"], json!(i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_unfinished_items() {
        let work = Arc::new(ScriptedWork::fixed(Duration::from_secs(1)));
        let deadline = Instant::now() + Duration::from_millis(1500);

        let report = executor(2)
            .process_until(items(5), work, deadline)
            .await
            .unwrap();

        assert_eq!((report.succeeded, report.failed), (2, 3));
        assert!(report.results[0].success && report.results[1].success);
        for result in &report.results[2..] {
            assert_eq!(result.error.as_deref(), Some(CANCELLED));
        }
    }

    #[tokio::test]
    async fn empty_batch() {
        let work = Arc::new(ScriptedWork::fixed(Duration::ZERO));
        let report = executor(3).process(Vec::new(), work).await.unwrap();
        assert_eq!(report.status, BatchStatus::Empty);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let executor = BatchExecutor::new(BatchConfig {
            max_items: 3,
            ..BatchConfig::default()
        });
        let work = Arc::new(ScriptedWork::fixed(Duration::ZERO));
        let err = executor.process(items(4), work).await.unwrap_err();
        assert_eq!(err, BatchError::TooLarge { size: 4, max: 3 });
    }
}
