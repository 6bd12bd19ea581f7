//! # Geographic Utilities
//!
//! The single source of geodesic truth for the engine.
//!
//! Every distance the engine reasons about (query area limits, route sampling,
//! envelope margins, responder proximity) goes through [`haversine_distance`],
//! so no two components can disagree about how far apart two points are.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`polyline_length`] | Total length of a polyline in meters |
//! | [`sample_polyline`] | Evenly spaced samples along a polyline |
//! | [`bounds_area_km2`] | Approximate surface area of a bounding box |
//! | [`expand_bounds`] | Grow a bounding box by a margin in meters |
//! | [`meters_per_degree_latitude`] | Meters in one degree of latitude |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//! | [`format_distance`] | Human-readable distance label |
//!
//! ## Coordinate System
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Distance, Haversine};

use crate::{BoundingBox, GeoPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters (spherical Earth, mean radius 6,371 km).
///
/// # Example
///
/// ```rust
/// use safety_engine::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 5000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    Haversine::distance(p1.to_geo(), p2.to_geo())
}

/// Total length of a polyline in meters. Empty or single-point input is 0.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Resample a polyline to exactly `count` points evenly spaced by distance.
///
/// The first and last samples are the polyline's endpoints. A single-point
/// or zero-length polyline yields `count` copies of its first point.
pub fn sample_polyline(points: &[GeoPoint], count: usize) -> Vec<GeoPoint> {
    let Some(first) = points.first().copied() else {
        return Vec::new();
    };
    if count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![first];
    }

    let total = polyline_length(points);
    if total == 0.0 {
        return vec![first; count];
    }

    let step = total / (count - 1) as f64;
    let mut samples = Vec::with_capacity(count);
    samples.push(first);

    let mut accumulated = 0.0;
    let mut next_threshold = step;

    for w in points.windows(2) {
        let (prev, curr) = (&w[0], &w[1]);
        let seg = haversine_distance(prev, curr);

        while seg > 0.0 && accumulated + seg >= next_threshold && samples.len() < count - 1 {
            let ratio = (next_threshold - accumulated) / seg;
            samples.push(GeoPoint::new(
                prev.latitude + ratio * (curr.latitude - prev.latitude),
                prev.longitude + ratio * (curr.longitude - prev.longitude),
            ));
            next_threshold += step;
        }

        accumulated += seg;
    }

    // Floating drift can leave us one interior sample short
    let last = points[points.len() - 1];
    while samples.len() < count {
        samples.push(last);
    }
    if let Some(tail) = samples.last_mut() {
        *tail = last;
    }

    samples
}

/// Length of one degree of latitude, measured with [`haversine_distance`].
pub fn meters_per_degree_latitude() -> f64 {
    haversine_distance(&GeoPoint::new(0.0, 0.0), &GeoPoint::new(1.0, 0.0))
}

/// Convert meters to approximate degrees at a given latitude.
///
/// - 1 degree of latitude is [`meters_per_degree_latitude`] (≈ 111,195 m)
/// - Longitude degrees shrink with cos(latitude); the factor is floored so
///   polar latitudes still produce a finite value
///
/// The result is the larger (longitude) figure, suitable for square margins.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = meters_per_degree_latitude() * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Approximate surface area of a bounding box in km².
///
/// Width is measured along the box's middle latitude, height along a meridian.
pub fn bounds_area_km2(bounds: &BoundingBox) -> f64 {
    let mid_lat = (bounds.min_lat + bounds.max_lat) / 2.0;
    let width = haversine_distance(
        &GeoPoint::new(mid_lat, bounds.min_lng),
        &GeoPoint::new(mid_lat, bounds.max_lng),
    );
    let height = haversine_distance(
        &GeoPoint::new(bounds.min_lat, bounds.min_lng),
        &GeoPoint::new(bounds.max_lat, bounds.min_lng),
    );
    // A box wider than 180° of longitude wraps the short way round
    let width = if bounds.lng_span() > 180.0 {
        2.0 * std::f64::consts::PI * 6_371_000.0 * mid_lat.to_radians().cos() - width
    } else {
        width
    };
    (width * height) / 1_000_000.0
}

/// Grow a box by `margin_meters` on every side, clamped to the WGS84 range.
pub fn expand_bounds(bounds: &BoundingBox, margin_meters: f64) -> BoundingBox {
    let lat_margin = margin_meters / meters_per_degree_latitude();
    let reference_lat = bounds.min_lat.abs().max(bounds.max_lat.abs());
    let lng_margin = meters_to_degrees(margin_meters, reference_lat);

    BoundingBox {
        min_lat: (bounds.min_lat - lat_margin).max(-90.0),
        max_lat: (bounds.max_lat + lat_margin).min(90.0),
        min_lng: (bounds.min_lng - lng_margin).max(-180.0),
        max_lng: (bounds.max_lng + lng_margin).min(180.0),
    }
}

/// Format a distance the way the mobile client displays it.
///
/// ```rust
/// use safety_engine::geo_utils::format_distance;
///
/// assert_eq!(format_distance(849.6), "850 m");
/// assert_eq!(format_distance(1234.0), "1.23 km");
/// ```
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round())
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
