use serde::Serialize;

use crate::geo::{detour_km, point_to_segment_km};
use crate::models::package::Package;
use crate::models::route::CourierRoute;

/// Constant travel speed used to turn a detour into time.
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

#[derive(Debug, Clone, Serialize)]
pub struct RouteMatch {
    pub package: Package,
    pub pickup_deviation_km: f64,
    pub dropoff_deviation_km: f64,
    pub detour_km: f64,
    pub estimated_detour_minutes: f64,
}

/// Keeps the packages whose pickup and dropoff both lie within the route's
/// maximum deviation of the straight start-end segment, shortest detour
/// first. Ties are ordered by package id.
pub fn match_packages(route: &CourierRoute, packages: impl IntoIterator<Item = Package>) -> Vec<RouteMatch> {
    let mut matches: Vec<RouteMatch> = packages
        .into_iter()
        .filter_map(|package| {
            let pickup = package.pickup.point();
            let dropoff = package.dropoff.point();

            let pickup_deviation_km = point_to_segment_km(&pickup, &route.start, &route.end);
            let dropoff_deviation_km = point_to_segment_km(&dropoff, &route.start, &route.end);
            if pickup_deviation_km.max(dropoff_deviation_km) > route.max_deviation_km {
                return None;
            }

            let detour_km = detour_km(&route.start, &route.end, &pickup, &dropoff);
            Some(RouteMatch {
                package,
                pickup_deviation_km,
                dropoff_deviation_km,
                detour_km,
                estimated_detour_minutes: detour_km / AVERAGE_SPEED_KMH * 60.0,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.detour_km
            .total_cmp(&b.detour_km)
            .then_with(|| a.package.id.cmp(&b.package.id))
    });
    matches
}
