//! `GET /api/workouts/analytics` and `POST /api/workouts/generate`

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::{CounterStore, PipelineResponse, RequestContext};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{parse_body, require_user, respond};
use crate::service::handler::TerminalHandler;
use crate::service::middleware::metrics::{EndpointSummary, MetricsRecorder};
use crate::service::operation::HandlerError;

/// How long a generated plan stays retrievable.
pub const PLAN_TTL: Duration = Duration::from_secs(60 * 60);

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EndpointReport {
    method: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<EndpointSummary>,
}

#[derive(Debug, Serialize)]
struct AnalyticsResponse {
    user_id: String,
    endpoints: Vec<EndpointReport>,
}

/// Reports recorded latency statistics for the API endpoints.
pub struct AnalyticsHandler {
    recorder: MetricsRecorder,
    endpoints: Vec<(Method, String)>,
}

impl AnalyticsHandler {
    #[must_use]
    pub fn new(recorder: MetricsRecorder, endpoints: Vec<(Method, String)>) -> Self {
        Self {
            recorder,
            endpoints,
        }
    }
}

#[async_trait]
impl TerminalHandler for AnalyticsHandler {
    async fn invoke(
        &self,
        ctx: RequestContext,
        _body: Bytes,
    ) -> Result<PipelineResponse, HandlerError> {
        let user_id = require_user(&ctx)?;
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for (method, path) in &self.endpoints {
            let latency = match self.recorder.summary(method.as_str(), path).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(%method, path = %path, error = %e, "latency summary unavailable");
                    None
                }
            };
            endpoints.push(EndpointReport {
                method: method.to_string(),
                path: path.clone(),
                latency,
            });
        }
        respond(StatusCode::OK, &AnalyticsResponse { user_id, endpoints })
    }
}

// ---------------------------------------------------------------------------
// Workout generation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub goal: String,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub fitness_level: Option<String>,
}

fn default_duration() -> u32 {
    30
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseBlock {
    pub name: String,
    pub sets: u32,
    pub reps: u32,
    pub rest_seconds: u32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutPlan {
    pub id: String,
    pub goal: String,
    pub difficulty: String,
    pub duration_minutes: u32,
    pub exercises: Vec<ExerciseBlock>,
}

/// Builds a plan from the request and keeps it in the store for an hour.
pub struct GenerateWorkoutHandler {
    store: Arc<dyn CounterStore>,
}

impl GenerateWorkoutHandler {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }
}

fn build_plan(req: &GenerateRequest) -> Result<WorkoutPlan, HandlerError> {
    if req.goal.trim().is_empty() {
        return Err(HandlerError::BadRequest("goal is required".into()));
    }
    if !(10..=180).contains(&req.duration_minutes) {
        return Err(HandlerError::BadRequest(
            "durationMinutes must be between 10 and 180".into(),
        ));
    }

    let difficulty = req
        .fitness_level
        .clone()
        .unwrap_or_else(|| "beginner".to_string());
    let (sets, reps) = match difficulty.as_str() {
        "advanced" => (5, 5),
        "intermediate" => (4, 8),
        _ => (3, 12),
    };
    let catalog: &[&str] = match req.goal.to_lowercase().as_str() {
        "strength" => &["Squat", "Bench Press", "Deadlift", "Overhead Press"],
        "endurance" => &["Rowing", "Burpees", "Jump Rope", "Mountain Climbers"],
        _ => &["Push-ups", "Lunges", "Plank", "Glute Bridge"],
    };
    // Roughly one exercise block per ten minutes.
    let count = (req.duration_minutes / 10).clamp(1, 4) as usize;
    let exercises = catalog
        .iter()
        .take(count)
        .map(|name| ExerciseBlock {
            name: (*name).to_string(),
            sets,
            reps,
            rest_seconds: 60,
        })
        .collect();

    Ok(WorkoutPlan {
        id: uuid::Uuid::new_v4().to_string(),
        goal: req.goal.clone(),
        difficulty,
        duration_minutes: req.duration_minutes,
        exercises,
    })
}

#[async_trait]
impl TerminalHandler for GenerateWorkoutHandler {
    async fn invoke(
        &self,
        ctx: RequestContext,
        body: Bytes,
    ) -> Result<PipelineResponse, HandlerError> {
        let user_id = require_user(&ctx)?;
        let req: GenerateRequest = parse_body(&body)?;
        let plan = build_plan(&req)?;

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let key = format!("workout_plan:{user_id}:{ts}");
        let encoded = serde_json::to_vec(&plan).map_err(|e| HandlerError::Internal(e.into()))?;
        self.store
            .set_with_ttl(&key, Bytes::from(encoded), PLAN_TTL)
            .await
            .map_err(|e| HandlerError::Internal(e.into()))?;

        info!(user_id = %user_id, plan_id = %plan.id, "workout plan generated");
        respond(
            StatusCode::CREATED,
            &serde_json::json!({ "plan": plan, "key": key }),
        )
    }
}
