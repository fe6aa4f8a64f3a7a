//! Request latency metrics.
//!
//! [`MetricsLayer`] times every request that passes through it, whatever the
//! outcome, and hands the sample to a [`MetricsRecorder`]. Recording never
//! blocks the request: samples go through a bounded queue to a background
//! [`SampleWriter`] that appends them to a per-endpoint list in the shared
//! store. A full queue or an unreachable store loses samples, not requests.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::keys::metrics_key;
use fitsync_core::{CounterStore, PipelineResponse, StoreError};
use serde::Serialize;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info_span, warn, Instrument};

use crate::service::config::MetricsConfig;
use crate::service::operation::{PipelineError, PipelineFuture, PipelineRequest};
use crate::service::worker::{BackgroundRunnable, BackgroundWorker, WorkerHandle};

// ---------------------------------------------------------------------------
// Samples and the background writer
// ---------------------------------------------------------------------------

/// One latency observation bound for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub key: String,
    pub duration_ms: u64,
}

/// Appends samples to their endpoint list and refreshes its retention.
pub struct SampleWriter {
    store: Arc<dyn CounterStore>,
    max_samples: usize,
    retention: Duration,
    written: u64,
}

#[async_trait]
impl BackgroundRunnable for SampleWriter {
    type Task = MetricSample;

    async fn run(&mut self, sample: MetricSample) {
        let value = Bytes::from(sample.duration_ms.to_string());
        if let Err(e) = self
            .store
            .list_append_bounded(&sample.key, value, self.max_samples)
            .await
        {
            warn!(key = %sample.key, error = %e, "dropping latency sample");
            return;
        }
        if let Err(e) = self.store.expire(&sample.key, self.retention).await {
            warn!(key = %sample.key, error = %e, "failed to refresh sample retention");
        }
        self.written += 1;
    }

    async fn shutdown(&mut self) {
        debug!(written = self.written, "metrics writer stopped");
    }
}

// ---------------------------------------------------------------------------
// MetricsRecorder
// ---------------------------------------------------------------------------

/// Latency statistics for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EndpointSummary {
    pub samples: usize,
    pub avg_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

impl EndpointSummary {
    /// Summarizes raw samples in any order. `None` when there are none.
    #[must_use]
    pub fn from_samples(mut samples: Vec<u64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        let total: u64 = samples.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let avg_ms = total as f64 / samples.len() as f64;
        Some(Self {
            samples: samples.len(),
            avg_ms,
            p50_ms: nearest_rank(&samples, 50),
            p95_ms: nearest_rank(&samples, 95),
            max_ms: samples[samples.len() - 1],
        })
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice.
fn nearest_rank(sorted: &[u64], pct: usize) -> u64 {
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

/// Fire-and-forget entry point for latency samples.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: WorkerHandle<MetricSample>,
    store: Arc<dyn CounterStore>,
}

impl MetricsRecorder {
    /// Starts the background writer and returns the recorder feeding it.
    ///
    /// The caller owns the worker and must stop it on shutdown so queued
    /// samples are flushed. A `max_samples` of 0 is raised to 1.
    ///
    /// # Errors
    ///
    /// Fails only if the freshly started worker is already closed.
    pub fn start(
        store: Arc<dyn CounterStore>,
        config: MetricsConfig,
    ) -> anyhow::Result<(Self, BackgroundWorker<SampleWriter>)> {
        let writer = SampleWriter {
            store: Arc::clone(&store),
            max_samples: config.max_samples.max(1),
            retention: config.retention,
            written: 0,
        };
        let worker = BackgroundWorker::start(writer, config.queue_capacity);
        let handle = worker.handle()?;
        Ok((Self { handle, store }, worker))
    }

    /// Queues one sample for `METHOD path`. Never waits and never fails.
    pub fn record(&self, method: &str, path: &str, duration_ms: u64) {
        let sample = MetricSample {
            key: metrics_key(method, path),
            duration_ms,
        };
        if let Err(e) = self.handle.try_submit(sample) {
            debug!(method, path, error = %e, "latency sample dropped");
            metrics::counter!("fitsync_metric_samples_dropped_total").increment(1);
        }
    }

    /// Reads back the stored samples for `METHOD path`.
    ///
    /// Entries that are not integers are ignored.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] if the sample list cannot be read.
    pub async fn summary(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Option<EndpointSummary>, StoreError> {
        let raw = self.store.list_range(&metrics_key(method, path)).await?;
        let samples = raw
            .iter()
            .filter_map(|b| std::str::from_utf8(b).ok()?.parse::<u64>().ok())
            .collect();
        Ok(EndpointSummary::from_samples(samples))
    }
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that times requests and records them, for every outcome.
#[derive(Clone)]
pub struct MetricsLayer {
    recorder: MetricsRecorder,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(recorder: MetricsRecorder) -> Self {
        Self { recorder }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            recorder: self.recorder.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    recorder: MetricsRecorder,
}

impl<S> Service<PipelineRequest> for MetricsService<S>
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
        let method = req.ctx.method.clone();
        let path = req.ctx.path.clone();
        let recorder = self.recorder.clone();

        let span = info_span!(
            "request",
            request_id = %req.ctx.request_id,
            method = %method,
            path = %path,
            status = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;

                let (status, outcome) = match &result {
                    Ok(resp) => (resp.status.as_u16(), "ok"),
                    Err(e) => (e.status().as_u16(), e.reason()),
                };

                tracing::Span::current().record("status", status);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::info!(
                    method = %method,
                    path = %path,
                    status,
                    duration_ms,
                    outcome,
                    "request complete"
                );

                #[allow(clippy::cast_precision_loss)]
                let histogram_ms = duration_ms as f64;
                metrics::histogram!(
                    "fitsync_request_duration_ms",
                    "method" => method.to_string(),
                    "path" => path.clone()
                )
                .record(histogram_ms);
                recorder.record(method.as_str(), &path, duration_ms);

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
