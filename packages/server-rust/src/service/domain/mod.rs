//! Terminal handlers for the FitSync API routes.
//!
//! These are thin stand-ins for the product's business logic: enough to
//! exercise every guard combination end to end. Persistence beyond the shared
//! counter store is out of scope.

pub mod ai;
pub mod auth;
pub mod bulk;
pub mod workouts;

use bytes::Bytes;
use fitsync_core::PipelineResponse;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::service::operation::HandlerError;

pub use ai::ChatHandler;
pub use auth::RegisterHandler;
pub use bulk::{BulkProcessHandler, SimulatedWork};
pub use workouts::{AnalyticsHandler, GenerateWorkoutHandler};

/// Decodes a JSON request body, reporting problems as `400`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, HandlerError> {
    if body.is_empty() {
        return Err(HandlerError::BadRequest("request body is required".into()));
    }
    serde_json::from_slice(body).map_err(|e| HandlerError::BadRequest(e.to_string()))
}

/// Encodes a JSON response body.
fn respond<T: Serialize>(status: StatusCode, value: &T) -> Result<PipelineResponse, HandlerError> {
    PipelineResponse::json(status, value).map_err(|e| HandlerError::Internal(e.into()))
}

/// Id of the authenticated caller, or an internal error if the route forgot
/// its authentication gate.
fn require_user(ctx: &fitsync_core::RequestContext) -> Result<String, HandlerError> {
    ctx.principal_id()
        .map(str::to_string)
        .ok_or_else(|| HandlerError::Internal(anyhow::anyhow!("route is missing its auth gate")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Named {
        #[allow(dead_code)]
        name: String,
    }

    #[test]
    fn empty_and_malformed_bodies_are_bad_requests() {
        assert!(matches!(
            parse_body::<Named>(&Bytes::new()),
            Err(HandlerError::BadRequest(_))
        ));
        assert!(matches!(
            parse_body::<Named>(&Bytes::from_static(b"{\"nope\":1}")),
            Err(HandlerError::BadRequest(_))
        ));
        assert!(parse_body::<Named>(&Bytes::from_static(b"{\"name\":\"x\"}")).is_ok());
    }
}
