//! Fully buffered response produced by terminal handlers and guards.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Serialize;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Status, headers and the complete body of one response.
///
/// Bodies are always buffered `Bytes`: any guard that needs to observe the
/// payload (the response cache) sees exactly what the caller receives, and
/// cloning the body only bumps a reference count.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl PipelineResponse {
    /// Raw response with an explicit content type.
    #[must_use]
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Serializes `value` as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be encoded.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status, CONTENT_TYPE_JSON, body))
    }

    /// Convenience for `json(StatusCode::OK, value)`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be encoded.
    pub fn ok_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Self::json(StatusCode::OK, value)
    }

    /// Adds a header, ignoring values that are not valid header text.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        self.insert_header(name, value);
        self
    }

    /// In-place variant of [`with_header`](Self::with_header).
    pub fn insert_header(&mut self, name: &'static str, value: impl AsRef<str>) {
        if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
    }

    /// Only `200 OK` counts as cacheable success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}
