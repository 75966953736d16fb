//! Great-circle geometry for scan coordinates
//!
//! All distances are meters on a spherical earth. Coordinates are WGS84 degrees;
//! passing out-of-range values is a caller error and is not checked here
//! (use [`Coordinate::is_valid`] at input boundaries).

use serde::{Deserialize, Serialize};

/// Mean earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both components are finite and inside |lat| <= 90, |lon| <= 180
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Haversine distance between two coordinates in meters
///
/// Symmetric, never negative, and zero for identical coordinates.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Weighted arithmetic centroid of coordinates
///
/// Returns `None` when the input is empty or the total weight is not positive.
/// Averaging degrees directly is accurate at venue scale; antimeridian wrap is not handled.
pub fn weighted_centroid<I>(points: I) -> Option<Coordinate>
where
    I: IntoIterator<Item = (Coordinate, f64)>,
{
    let mut total = 0.0;
    let mut lat = 0.0;
    let mut lon = 0.0;
    for (point, weight) in points {
        if weight <= 0.0 {
            continue;
        }
        total += weight;
        lat += point.latitude * weight;
        lon += point.longitude * weight;
    }

    if total > 0.0 {
        Some(Coordinate::new(lat / total, lon / total))
    } else {
        None
    }
}

/// Unweighted centroid of a point set
pub fn centroid(points: &[Coordinate]) -> Option<Coordinate> {
    weighted_centroid(points.iter().map(|p| (*p, 1.0)))
}

/// Root-mean-square distance of points from a centroid (meters)
///
/// This is the standard distance deviation of the point set; 0 for empty input.
pub fn rms_spread(points: &[Coordinate], center: Coordinate) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|p| distance_meters(*p, center).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}
