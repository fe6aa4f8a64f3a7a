//! Per-request context and the request lifecycle state machine.
//!
//! A [`RequestContext`] is created at the service boundary, handed to the
//! pipeline by value and threaded through every guard down to the terminal
//! handler. Guards may enrich it (the auth gate sets the principal) but it is
//! never shared between requests.
//!
//! The [`Lifecycle`] handle is the one piece that outlives the move: it is a
//! cheap `Arc` so the pipeline can observe the final phase after the context
//! itself has been consumed by the inner service.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::types::Principal;

// ---------------------------------------------------------------------------
// RequestPhase
// ---------------------------------------------------------------------------

/// Phase of a single request inside the pipeline.
///
/// State machine: `Pending -> InGuardChain -> InHandler -> Completed`, with
/// `Aborted` reachable from every non-terminal phase. No phase is ever
/// re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestPhase {
    /// Created, not yet handed to the pipeline.
    Pending = 0,
    /// Travelling through the guard chain.
    InGuardChain = 1,
    /// The terminal handler is running.
    InHandler = 2,
    /// The terminal handler produced a response.
    Completed = 3,
    /// A guard short-circuited or the handler failed.
    Aborted = 4,
}

impl RequestPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::InGuardChain,
            2 => Self::InHandler,
            3 => Self::Completed,
            _ => Self::Aborted,
        }
    }

    /// Returns `true` for `Completed` and `Aborted`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InGuardChain | Self::Aborted)
                | (Self::InGuardChain, Self::InHandler | Self::Aborted)
                | (Self::InHandler, Self::Completed | Self::Aborted)
        )
    }

    /// Lowercase name used in logs and JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InGuardChain => "in_guard_chain",
            Self::InHandler => "in_handler",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal request phase transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: RequestPhase,
    pub to: RequestPhase,
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// How a request left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The handler ran and answered with this status.
    Completed { status: u16 },
    /// The chain was cut short (guard decision or handler fault) with this status.
    Aborted { status: u16 },
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Shared handle to a request's phase and final status.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Arc<AtomicU8>,
    status: Arc<AtomicU16>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(RequestPhase::Pending as u8)),
            status: Arc::new(AtomicU16::new(0)),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RequestPhase {
        RequestPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when `next` is not reachable from the
    /// current phase (including any attempt to leave a terminal phase).
    pub fn advance(&self, next: RequestPhase) -> Result<(), LifecycleError> {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            let from = RequestPhase::from_u8(current);
            if !from.can_advance_to(next) {
                return Err(LifecycleError { from, to: next });
            }
            match self.phase.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Terminates the request, recording the status that left the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if the request already terminated or the
    /// target phase is not terminal-reachable from the current phase.
    pub fn finish(&self, termination: Termination) -> Result<(), LifecycleError> {
        let (phase, status) = match termination {
            Termination::Completed { status } => (RequestPhase::Completed, status),
            Termination::Aborted { status } => (RequestPhase::Aborted, status),
        };
        self.advance(phase)?;
        self.status.store(status, Ordering::Release);
        Ok(())
    }

    /// Final outcome, or `None` while the request is still in flight.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        let status = self.status.load(Ordering::Acquire);
        match self.phase() {
            RequestPhase::Completed => Some(Termination::Completed { status }),
            RequestPhase::Aborted => Some(Termination::Aborted { status }),
            _ => None,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Identity and routing information for one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id (taken from `x-request-id` when present).
    pub request_id: String,
    pub method: Method,
    /// Request path without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Identity used for rate limiting (client address).
    pub client_key: String,
    /// Bearer token from the `Authorization` header, prefix stripped.
    pub bearer_token: Option<String>,
    /// Set by the authentication gate.
    pub principal: Option<Principal>,
    /// Free-form attributes guards attach for downstream consumers.
    pub attributes: HashMap<String, String>,
    /// Deadline for the whole request, enforced by the timeout guard.
    pub timeout: Duration,
    lifecycle: Lifecycle,
}

impl RequestContext {
    /// Creates a context for `method path` issued by `client_key`.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, client_key: impl Into<String>) -> Self {
        Self {
            request_id: String::new(),
            method,
            path: path.into(),
            query: None,
            client_key: client_key.into(),
            bearer_token: None,
            principal: None,
            attributes: HashMap::new(),
            timeout: Duration::from_secs(30),
            lifecycle: Lifecycle::new(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = if query.is_empty() { None } else { Some(query) };
        self
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Handle to this request's lifecycle; stays valid after the context is consumed.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Current phase of this request.
    #[must_use]
    pub fn phase(&self) -> RequestPhase {
        self.lifecycle.phase()
    }

    /// `true` for idempotent reads (`GET`, `HEAD`).
    #[must_use]
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Attaches the authenticated principal and mirrors its id into the
    /// `user_id` attribute.
    pub fn set_principal(&mut self, principal: Principal) {
        self.attributes
            .insert("user_id".to_string(), principal.id.clone());
        self.principal = Some(principal);
    }

    /// Id of the authenticated principal, if any.
    #[must_use]
    pub fn principal_id(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.id.as_str())
    }
}
