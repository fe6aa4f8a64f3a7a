//! Request, error and service types shared by every pipeline stage.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use fitsync_core::{LifecycleError, PipelineResponse, RequestContext, StoreError};
use http::StatusCode;
use serde::Serialize;
use tower::util::BoxCloneService;

/// One request travelling through a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub ctx: RequestContext,
    pub body: Bytes,
}

impl PipelineRequest {
    #[must_use]
    pub fn new(ctx: RequestContext, body: impl Into<Bytes>) -> Self {
        Self {
            ctx,
            body: body.into(),
        }
    }
}

/// Boxed future returned by every pipeline service.
pub type PipelineFuture =
    Pin<Box<dyn Future<Output = Result<PipelineResponse, PipelineError>> + Send>>;

/// Type-erased, cloneable pipeline stage.
pub type BoxPipelineService = BoxCloneService<PipelineRequest, PipelineResponse, PipelineError>;

/// Failures reported by terminal handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("handler panicked")]
    Panicked,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Everything that can stop a request before a normal response.
///
/// Guard decisions (`Unauthorized`, `RateLimited`, `Overloaded`, fail-closed
/// `StoreUnavailable`) are short-circuits; `Handler` carries a terminal
/// handler failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("authorization header required")]
    MissingCredentials,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("rate limit exceeded")]
    RateLimited { limit: u64, retry_after: Duration },
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },
    #[error("request already processed: {0}")]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl PipelineError {
    /// HTTP status that reports this error to the caller.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) | Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Handler(HandlerError::BadRequest(_)) => StatusCode::BAD_REQUEST,
            Self::Lifecycle(_) | Self::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason code.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidToken(_) => "invalid_token",
            Self::RateLimited { .. } => "rate_limited",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Overloaded => "overloaded",
            Self::Timeout { .. } => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::Lifecycle(_) => "lifecycle_violation",
            Self::Handler(HandlerError::BadRequest(_)) => "bad_request",
            Self::Handler(_) => "handler_failure",
        }
    }

    /// `true` when the terminal handler itself failed.
    #[must_use]
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler(_))
    }

    /// Renders the structured error response.
    #[must_use]
    pub fn to_response(&self) -> PipelineResponse {
        let retry_after = match self {
            Self::RateLimited { retry_after, .. } => Some(retry_after.as_secs()),
            _ => None,
        };
        // Internal details stay in the logs.
        let error = match self {
            Self::Handler(HandlerError::Internal(_) | HandlerError::Panicked) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error,
            reason: self.reason(),
            retry_after,
        };
        let mut resp = PipelineResponse::json(self.status(), &body).unwrap_or_else(|_| {
            PipelineResponse::new(self.status(), "text/plain", self.reason())
        });
        if let Some(secs) = retry_after {
            resp.insert_header("retry-after", secs.to_string());
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_json(resp: &PipelineResponse) -> serde_json::Value {
        serde_json::from_slice(&resp.body).unwrap()
    }

    #[test]
    fn rate_limited_carries_retry_hint() {
        let err = PipelineError::RateLimited {
            limit: 5,
            retry_after: Duration::from_secs(900),
        };
        let resp = err.to_response();
        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(&resp);
        assert_eq!(body["reason"], "rate_limited");
        assert_eq!(body["retry_after"], 900);
        assert_eq!(resp.headers.get("retry-after").unwrap(), "900");
    }

    #[test]
    fn store_unavailable_is_503_with_reason() {
        let err = PipelineError::StoreUnavailable(StoreError::Unavailable("refused".into()));
        let resp = err.to_response();
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(&resp)["reason"], "store_unavailable");
    }

    #[test]
    fn internal_handler_errors_hide_details() {
        let err = PipelineError::Handler(HandlerError::Internal(anyhow::anyhow!(
            "db password is hunter2"
        )));
        assert!(err.is_handler_failure());
        let body = body_json(&err.to_response());
        assert_eq!(body["error"], "internal server error");
        assert_eq!(body["reason"], "handler_failure");
    }

    #[test]
    fn bad_request_maps_to_400() {
        let err = PipelineError::from(HandlerError::BadRequest("name is required".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.reason(), "bad_request");
    }
}
