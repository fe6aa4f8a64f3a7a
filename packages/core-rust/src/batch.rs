//! Batch job and result types exchanged with the bounded batch executor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One submitted work item, tagged with its position in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob<T = Value> {
    pub index: usize,
    pub payload: T,
}

/// Outcome of one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    #[must_use]
    pub fn succeeded(index: usize, output: Value) -> Self {
        Self {
            index,
            success: true,
            output: Some(output),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate verdict over a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Empty,
    AllSucceeded,
    Partial,
    AllFailed,
}

/// Per-item results in input order plus summary counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchResult>,
}

impl BatchReport {
    /// Builds a report from results in any order; output is sorted by index.
    #[must_use]
    pub fn from_results(mut results: Vec<BatchResult>) -> Self {
        results.sort_by_key(|r| r.index);
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        let status = match (succeeded, failed) {
            (0, 0) => BatchStatus::Empty,
            (_, 0) => BatchStatus::AllSucceeded,
            (0, _) => BatchStatus::AllFailed,
            _ => BatchStatus::Partial,
        };
        Self {
            status,
            succeeded,
            failed,
            results,
        }
    }
}
