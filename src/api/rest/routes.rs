use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::matcher::RouteMatch;
use crate::engine::routes::NewRoute;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::location::GeoPoint;
use crate::models::package::PackageStatus;
use crate::models::route::CourierRoute;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/routes", post(create_route))
        .route("/routes/:id", get(get_route))
        .route("/routes/:id/matches", get(find_matches))
}

#[derive(Deserialize)]
pub struct CreateRouteRequest {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub max_deviation_km: f64,
    pub trip_date: Option<NaiveDate>,
    pub departure_time: Option<NaiveTime>,
}

#[derive(Deserialize)]
pub struct MatchesQuery {
    pub status: Option<PackageStatus>,
}

async fn create_route(
    State(state): State<Arc<AppState>>,
    courier: Actor,
    Json(payload): Json<CreateRouteRequest>,
) -> Result<Json<CourierRoute>, AppError> {
    let route = state
        .routes
        .create_route(
            &courier,
            NewRoute {
                start: payload.start,
                end: payload.end,
                max_deviation_km: payload.max_deviation_km,
                trip_date: payload.trip_date,
                departure_time: payload.departure_time,
            },
        )
        .await?;

    Ok(Json(route))
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CourierRoute>, AppError> {
    Ok(Json(state.routes.get_route(id)?))
}

async fn find_matches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<MatchesQuery>,
) -> Result<Json<Vec<RouteMatch>>, AppError> {
    let status = query.status.unwrap_or(PackageStatus::OpenForBids);
    Ok(Json(state.routes.find_packages_along_route(id, &[status])?))
}
