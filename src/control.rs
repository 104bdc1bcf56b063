//! HTTP control surface for the worker.
//!
//! | Method | Path | Effect |
//! |--------|------|--------|
//! | `POST` | `/api/pipeline/run` | run now; `409` when a run is in flight |
//! | `GET` | `/api/pipeline/status` | worker status with live progress |
//! | `PUT` | `/api/pipeline/schedule` | validate, persist and re-arm the schedule |

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::worker::{ScheduleError, TriggerOutcome, Worker, WorkerStatus};

#[derive(Clone)]
pub struct AppState {
    pub worker: Worker,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub cron: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/pipeline/run", post(trigger_run))
        .route("/api/pipeline/status", get(status))
        .route("/api/pipeline/schedule", put(update_schedule))
        .with_state(state)
}

async fn trigger_run(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.worker.trigger_manual_run(None).await {
        TriggerOutcome::Started(summary) => {
            info!(published = summary.published, "Manual run finished");
            (
                StatusCode::OK,
                Json(json!({ "started": true, "summary": summary })),
            )
        }
        TriggerOutcome::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "error": "a pipeline run is already in progress" })),
        ),
    }
}

async fn status(State(state): State<AppState>) -> Json<WorkerStatus> {
    Json(state.worker.status().await)
}

async fn update_schedule(
    State(state): State<AppState>,
    Json(body): Json<ScheduleBody>,
) -> (StatusCode, Json<Value>) {
    match state.worker.update_schedule(&body.cron).await {
        Ok(schedule) => (
            StatusCode::OK,
            Json(json!({ "success": true, "schedule": schedule })),
        ),
        Err(e) => {
            warn!(error = %e, cron = %body.cron, "Schedule update rejected");
            let code = match e {
                ScheduleError::InvalidCron { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                code,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    }
}
