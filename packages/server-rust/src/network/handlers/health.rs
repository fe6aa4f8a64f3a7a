//! Health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use tracing::debug;

use super::AppState;
use crate::network::HealthState;

/// Detailed health report.
///
/// Always `200`; the body says whether the server is ready, draining, or
/// running without its store. Guards degrade on store loss instead of failing,
/// so an unreachable store is reported but does not flip the state.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "store ping failed");
            false
        }
    };

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "store": if store_ok { "ok" } else { "unreachable" },
        "routes": state.routes.routes().len(),
        "cache": state.cache_stats.snapshot(),
    }))
}

/// Liveness check: the process answers, nothing else is checked.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: `200` only in `Ready`, `503` while starting or draining.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
