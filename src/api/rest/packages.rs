use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::collaborators::payment::spawn_delivery_charge;
use crate::engine::packages::StatusUpdate;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::location::Location;
use crate::models::package::{NewPackage, Package, PackageStatus};
use crate::state::AppState;

const PAYMENT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/packages", post(create_package).get(list_packages))
        .route("/packages/track/:code", get(track_package))
        .route("/packages/:id", get(get_package).delete(deactivate_package))
        .route("/packages/:id/status", patch(update_status))
        .route("/packages/:id/cancel", post(cancel_package))
        .route("/packages/:id/proof", post(submit_proof))
}

#[derive(Deserialize)]
pub struct CreatePackageRequest {
    pub pickup: Location,
    pub dropoff: Location,
    pub description: Option<String>,
    #[serde(default = "default_requires_proof")]
    pub requires_proof: bool,
}

fn default_requires_proof() -> bool {
    true
}

#[derive(Deserialize)]
pub struct ListPackagesQuery {
    pub status: Option<PackageStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: PackageStatus,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitProofRequest {
    pub reference: String,
}

async fn create_package(
    State(state): State<Arc<AppState>>,
    sender: Actor,
    Json(payload): Json<CreatePackageRequest>,
) -> Result<Json<Package>, AppError> {
    let package = state
        .packages
        .create_package(
            &sender,
            NewPackage {
                sender_id: sender.id,
                pickup: payload.pickup,
                dropoff: payload.dropoff,
                description: payload.description,
                requires_proof: payload.requires_proof,
            },
        )
        .await?;

    Ok(Json(package))
}

async fn list_packages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPackagesQuery>,
) -> Json<Vec<Package>> {
    Json(state.packages.list_packages(query.status))
}

async fn get_package(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Package>, AppError> {
    Ok(Json(state.packages.get_package(id)?))
}

async fn track_package(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Package>, AppError> {
    Ok(Json(state.packages.package_by_tracking_code(&code)?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Response, AppError> {
    match state.packages.update_status(id, payload.status, &actor).await? {
        StatusUpdate::Applied(package) => {
            if package.status == PackageStatus::Delivered {
                spawn_delivery_charge(
                    state.payments.clone(),
                    state.metrics.clone(),
                    package.id,
                    state.settings.payment_max_attempts,
                    PAYMENT_RETRY_BACKOFF,
                );
            }
            Ok(Json(package).into_response())
        }
        StatusUpdate::ProofRequired(package) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "outcome": "proof_required",
                "package": package,
            })),
        )
            .into_response()),
    }
}

async fn cancel_package(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<Package>, AppError> {
    let reason = payload.and_then(|Json(body)| body.reason);
    let package = state.packages.cancel_package(id, &actor, reason).await?;
    Ok(Json(package))
}

async fn submit_proof(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<SubmitProofRequest>,
) -> Result<Json<Package>, AppError> {
    let package = state
        .packages
        .submit_proof(id, &actor, payload.reference)
        .await?;
    Ok(Json(package))
}

async fn deactivate_package(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Package>, AppError> {
    Ok(Json(state.packages.deactivate_package(id, &actor).await?))
}
