use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::GeoPoint;

pub const MAX_DEVIATION_LIMIT_KM: f64 = 200.0;

/// A courier's declared trip, used to discover packages along the way.
/// Only one route per courier is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierRoute {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub max_deviation_km: f64,
    pub trip_date: Option<NaiveDate>,
    pub departure_time: Option<NaiveTime>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}
