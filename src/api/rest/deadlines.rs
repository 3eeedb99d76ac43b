use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::deadlines::ScanReport;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/deadlines/scan", post(run_scan))
}

#[derive(Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// Runs one deadline scan on demand. Operators use `dry_run` to preview the
/// scheduler's decisions.
async fn run_scan(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<ScanRequest>,
) -> Result<Json<ScanReport>, AppError> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden(
            "deadline scans are restricted to admins".to_string(),
        ));
    }

    Ok(Json(state.deadlines.run_scan(payload.dry_run).await))
}
