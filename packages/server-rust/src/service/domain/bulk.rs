//! `POST /api/bulk/process`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::{BatchJob, BatchReport, PipelineResponse, RequestContext};
use http::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_body, require_user, respond};
use crate::service::batch::{BatchExecutor, BatchItemError, BatchWork};
use crate::service::handler::TerminalHandler;
use crate::service::operation::HandlerError;

/// Stand-in per-item work: waits `delay`, then acknowledges the item.
///
/// `null` items are rejected so callers can see per-item failures.
pub struct SimulatedWork {
    delay: Duration,
}

impl SimulatedWork {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl BatchWork for SimulatedWork {
    async fn invoke(&self, job: BatchJob) -> Result<Value, BatchItemError> {
        if job.payload.is_null() {
            return Err(BatchItemError::InvalidPayload("item is null".into()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(json!({
            "processed": true,
            "result": format!("Processed item {}", job.index),
        }))
    }
}

#[derive(Debug, Serialize)]
struct BulkResponse {
    message: &'static str,
    processed_count: usize,
    #[serde(flatten)]
    report: BatchReport,
}

/// Fans the submitted array out over the batch executor.
pub struct BulkProcessHandler {
    executor: BatchExecutor,
    work: Arc<dyn BatchWork>,
}

impl BulkProcessHandler {
    #[must_use]
    pub fn new(executor: BatchExecutor, work: Arc<dyn BatchWork>) -> Self {
        Self { executor, work }
    }
}

#[async_trait]
impl TerminalHandler for BulkProcessHandler {
    async fn invoke(
        &self,
        ctx: RequestContext,
        body: Bytes,
    ) -> Result<PipelineResponse, HandlerError> {
        let user_id = require_user(&ctx)?;
        let items: Vec<Value> = parse_body(&body)?;
        let report = self
            .executor
            .process(items, Arc::clone(&self.work))
            .await
            .map_err(|e| HandlerError::BadRequest(e.to_string()))?;

        info!(
            user_id = %user_id,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk batch processed"
        );
        respond(
            StatusCode::OK,
            &BulkResponse {
                message: "Bulk processing completed",
                processed_count: report.results.len(),
                report,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use fitsync_core::Principal;
    use http::Method;

    use super::*;
    use crate::service::config::BatchConfig;

    fn handler(max_items: usize) -> BulkProcessHandler {
        let executor = BatchExecutor::new(BatchConfig {
            max_items,
            ..BatchConfig::default()
        });
        BulkProcessHandler::new(executor, Arc::new(SimulatedWork::new(Duration::from_millis(100))))
    }

    fn ctx() -> RequestContext {
        let mut ctx = RequestContext::new(Method::POST, "/api/bulk/process", "c");
        ctx.set_principal(Principal::new("u1"));
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn reports_each_item_in_order() {
        let body = Bytes::from_static(br#"[{"a":1}, null, {"c":3}]"#);
        let resp = handler(10).invoke(ctx(), body).await.unwrap();

        let json: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(json["processed_count"], 3);
        assert_eq!(json["status"], "partial");
        assert_eq!(json["results"][0]["output"]["result"], "Processed item 0");
        assert_eq!(json["results"][1]["success"], false);
        assert_eq!(json["results"][2]["index"], 2);
    }

    #[tokio::test]
    async fn non_array_body_is_bad_request() {
        let err = handler(10)
            .invoke(ctx(), Bytes::from_static(br#"{"not":"an array"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn oversized_batch_is_bad_request() {
        let err = handler(2)
            .invoke(ctx(), Bytes::from_static(b"[1,2,3]"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::BadRequest(msg) if msg.contains("exceeds")));
    }
}
