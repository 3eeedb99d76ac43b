use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::bids::{NewBid, Selection};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::bid::CourierBid;
use crate::models::package::Package;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/packages/:id/bids", get(list_bids).post(create_bid))
        .route("/bids/:id", get(get_bid))
        .route("/bids/:id/withdraw", post(withdraw_bid))
        .route("/bids/:id/select", post(select_bid))
        .route("/bids/:id/confirm-pickup", post(confirm_pickup))
}

#[derive(Deserialize)]
pub struct CreateBidRequest {
    pub proposed_price: f64,
    pub estimated_delivery_hours: Option<f64>,
    pub estimated_pickup_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub route_id: Option<Uuid>,
}

async fn list_bids(
    State(state): State<Arc<AppState>>,
    Path(package_id): Path<Uuid>,
) -> Result<Json<Vec<CourierBid>>, AppError> {
    Ok(Json(state.packages.bids_for_package(package_id)?))
}

async fn create_bid(
    State(state): State<Arc<AppState>>,
    Path(package_id): Path<Uuid>,
    courier: Actor,
    Json(payload): Json<CreateBidRequest>,
) -> Result<Json<CourierBid>, AppError> {
    let bid = state
        .bids
        .create_bid(
            package_id,
            &courier,
            NewBid {
                proposed_price: payload.proposed_price,
                estimated_delivery_hours: payload.estimated_delivery_hours,
                estimated_pickup_time: payload.estimated_pickup_time,
                message: payload.message,
                route_id: payload.route_id,
            },
        )
        .await?;

    Ok(Json(bid))
}

async fn get_bid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CourierBid>, AppError> {
    Ok(Json(state.bids.get_bid(id)?))
}

async fn withdraw_bid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<CourierBid>, AppError> {
    Ok(Json(state.bids.withdraw_bid(id, &actor).await?))
}

async fn select_bid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Selection>, AppError> {
    Ok(Json(state.bids.select_bid(id, &actor).await?))
}

async fn confirm_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Package>, AppError> {
    Ok(Json(state.bids.confirm_pickup(id, &actor).await?))
}
