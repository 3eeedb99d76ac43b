use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::audit::AuditEntry;
use crate::engine::effects::{Effect, EffectDispatcher};
use crate::engine::matcher::{match_packages, RouteMatch};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::location::GeoPoint;
use crate::models::package::PackageStatus;
use crate::models::route::{CourierRoute, MAX_DEVIATION_LIMIT_KM};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct NewRoute {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub max_deviation_km: f64,
    pub trip_date: Option<NaiveDate>,
    pub departure_time: Option<NaiveTime>,
}

pub struct RouteService {
    store: Arc<Store>,
    effects: EffectDispatcher,
}

impl RouteService {
    pub fn new(store: Arc<Store>, effects: EffectDispatcher) -> Self {
        Self { store, effects }
    }

    /// Declares a new route for `courier`, replacing their active one.
    pub async fn create_route(&self, courier: &Actor, input: NewRoute) -> Result<CourierRoute, AppError> {
        if !input.start.is_valid() || !input.end.is_valid() {
            return Err(AppError::BadRequest("route coordinates are out of range".to_string()));
        }
        if !input.max_deviation_km.is_finite()
            || input.max_deviation_km <= 0.0
            || input.max_deviation_km > MAX_DEVIATION_LIMIT_KM
        {
            return Err(AppError::BadRequest(format!(
                "max_deviation_km must be within (0, {MAX_DEVIATION_LIMIT_KM}]"
            )));
        }

        let now = Utc::now();
        let route = CourierRoute {
            id: Uuid::new_v4(),
            courier_id: courier.id,
            start: input.start,
            end: input.end,
            max_deviation_km: input.max_deviation_km,
            trip_date: input.trip_date,
            departure_time: input.departure_time,
            is_active: true,
            created_at: now,
            deactivated_at: None,
        };

        let replaced = self.store.activate_route(route.clone(), now);
        info!(
            route_id = %route.id,
            courier_id = %courier.id,
            replaced = ?replaced,
            "courier route created"
        );
        self.effects
            .dispatch(vec![Effect::Audit(AuditEntry::new(
                "route.created",
                Some(courier.id),
                route.id,
                json!({ "replaced": replaced }),
            ))]);

        Ok(route)
    }

    pub fn get_route(&self, route_id: Uuid) -> Result<CourierRoute, AppError> {
        self.store
            .route(route_id)
            .ok_or_else(|| AppError::NotFound(format!("route {route_id} not found")))
    }

    /// Active packages in one of `statuses` that lie along the route. The
    /// courier's own packages and packages they hold a pending bid on are left
    /// out; a re-opened auction is offered again.
    pub fn find_packages_along_route(
        &self,
        route_id: Uuid,
        statuses: &[PackageStatus],
    ) -> Result<Vec<RouteMatch>, AppError> {
        let route = self.get_route(route_id)?;
        let candidates = self
            .store
            .ledgers_where(|p| p.is_active && statuses.contains(&p.status) && p.sender_id != route.courier_id)
            .into_iter()
            .filter(|ledger| ledger.pending_bid_by(route.courier_id).is_none())
            .map(|ledger| ledger.package);

        Ok(match_packages(&route, candidates))
    }
}
