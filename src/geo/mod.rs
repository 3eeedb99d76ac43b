use crate::models::location::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.min(1.0).sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Distance from `point` to the closest point of the straight segment
/// `start`..`end`.
///
/// The projection is done on a local equirectangular plane centred on the
/// segment, then measured back with [`haversine_km`]. Longitudes are taken
/// relative to `start` and wrapped, so a segment crossing the antimeridian
/// runs the short way. Accurate enough for city and regional routes; it is
/// not a road network distance.
pub fn point_to_segment_km(point: &GeoPoint, start: &GeoPoint, end: &GeoPoint) -> f64 {
    let lng_scale = ((start.lat + end.lat) / 2.0).to_radians().cos();

    let span_lng = wrap_longitude(end.lng - start.lng);
    let (dx, dy) = (span_lng * lng_scale, end.lat - start.lat);
    let (px, py) = (
        wrap_longitude(point.lng - start.lng) * lng_scale,
        point.lat - start.lat,
    );

    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        ((px * dx + py * dy) / length_sq).clamp(0.0, 1.0)
    };

    let projected = GeoPoint {
        lat: start.lat + t * dy,
        lng: wrap_longitude(start.lng + t * span_lng),
    };

    haversine_km(point, &projected)
}

/// Brings a longitude or longitude difference into [-180, 180).
fn wrap_longitude(degrees: f64) -> f64 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

/// Extra distance travelled by going start -> pickup -> dropoff -> end
/// instead of start -> end directly.
pub fn detour_km(start: &GeoPoint, end: &GeoPoint, pickup: &GeoPoint, dropoff: &GeoPoint) -> f64 {
    let via = haversine_km(start, pickup) + haversine_km(pickup, dropoff) + haversine_km(dropoff, end);
    (via - haversine_km(start, end)).max(0.0)
}
