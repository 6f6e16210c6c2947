// Geodesy module - distances, bearings and projections on a spherical Earth
//
// Provides:
// - great-circle (haversine) distance and slant range including altitude
// - initial bearing and forward projection (destination point)
// - a local east/north tangent frame used as the solver parameterisation
//
// All angles are in degrees, all lengths in meters.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::constants::EARTH_RADIUS_M;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Radians to degrees conversion factor
const RTOD: f64 = 180.0 / PI;

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint { latitude, longitude }
    }
}

/// Wrap a longitude into [-180, 180)
#[inline]
pub fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Returns great-circle distance in meters between two points
///
/// Haversine formula on a sphere of radius 6,371 km. Ignores altitude;
/// use [`slant_range`] when heights matter.
///
/// # Example
/// ```
/// use rf_geolocation::geodesy::{distance, GeoPoint};
/// let d = distance(GeoPoint::new(51.5074, -0.1278), GeoPoint::new(48.8566, 2.3522));
/// assert!((d - 343_500.0).abs() < 5_000.0);
/// ```
pub fn distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat0 = a.latitude * DTOR;
    let lat1 = b.latitude * DTOR;
    let dlat = lat1 - lat0;
    let dlon = (b.longitude - a.longitude) * DTOR;

    let s_dlat = (dlat / 2.0).sin();
    let s_dlon = (dlon / 2.0).sin();
    let h = s_dlat * s_dlat + lat0.cos() * lat1.cos() * s_dlon * s_dlon;

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).max(0.0).sqrt())
}

/// Straight-line distance combining the surface distance and the height difference
///
/// # Arguments
/// * `a`, `alt_a` - First point and its altitude in meters
/// * `b`, `alt_b` - Second point and its altitude in meters
#[inline]
pub fn slant_range(a: GeoPoint, alt_a: f64, b: GeoPoint, alt_b: f64) -> f64 {
    let surface = distance(a, b);
    let dh = alt_b - alt_a;
    (surface * surface + dh * dh).sqrt()
}

/// Initial bearing from `a` to `b` in degrees, range [0, 360)
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat0 = a.latitude * DTOR;
    let lat1 = b.latitude * DTOR;
    let dlon = (b.longitude - a.longitude) * DTOR;

    let y = dlon.sin() * lat1.cos();
    let x = lat0.cos() * lat1.sin() - lat0.sin() * lat1.cos() * dlon.cos();

    let deg = (y.atan2(x) * RTOD).rem_euclid(360.0);
    // rem_euclid can round a tiny negative angle up to exactly 360
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

/// Forward geodesic projection
///
/// # Arguments
/// * `origin` - Starting point
/// * `bearing_deg` - Initial bearing in degrees (0 = north, 90 = east)
/// * `distance_m` - Distance to travel along the great circle in meters
///
/// # Returns
/// Destination point, longitude wrapped into [-180, 180)
pub fn destination(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let lat0 = origin.latitude * DTOR;
    let lon0 = origin.longitude * DTOR;
    let theta = bearing_deg * DTOR;
    let delta = distance_m / EARTH_RADIUS_M;

    let lat1 = (lat0.sin() * delta.cos() + lat0.cos() * delta.sin() * theta.cos())
        .clamp(-1.0, 1.0)
        .asin();
    let lon1 = lon0
        + (theta.sin() * delta.sin() * lat0.cos()).atan2(delta.cos() - lat0.sin() * lat1.sin());

    GeoPoint {
        latitude: lat1 * RTOD,
        longitude: wrap_longitude(lon1 * RTOD),
    }
}

/// Equirectangular east/north tangent frame around an origin
///
/// Accurate to well under a metre over the tens of kilometres a receiver
/// network spans. Solvers only use it to parameterise candidate positions;
/// residuals are always evaluated with [`slant_range`].
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    origin: GeoPoint,
    cos_lat: f64,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> Self {
        LocalFrame {
            origin,
            cos_lat: (origin.latitude * DTOR).cos().max(1e-9),
        }
    }

    /// Project a point into (east, north) meters
    pub fn to_local(&self, p: GeoPoint) -> (f64, f64) {
        let dlon = wrap_longitude(p.longitude - self.origin.longitude);
        let east = EARTH_RADIUS_M * dlon * DTOR * self.cos_lat;
        let north = EARTH_RADIUS_M * (p.latitude - self.origin.latitude) * DTOR;
        (east, north)
    }

    /// Inverse of [`LocalFrame::to_local`]
    pub fn to_geo(&self, east: f64, north: f64) -> GeoPoint {
        let latitude = self.origin.latitude + north / EARTH_RADIUS_M * RTOD;
        let longitude = self.origin.longitude + east / (EARTH_RADIUS_M * self.cos_lat) * RTOD;
        GeoPoint {
            latitude: latitude.clamp(-90.0, 90.0),
            longitude: wrap_longitude(longitude),
        }
    }
}

/// Weighted mean position, computed in the tangent frame of the first point
/// so that sets straddling the antimeridian average correctly
///
/// Returns `None` for an empty set or a non-positive total weight.
pub fn weighted_centroid(points: &[(GeoPoint, f64)]) -> Option<GeoPoint> {
    let (first, _) = points.first()?;
    let frame = LocalFrame::new(*first);

    let total: f64 = points.iter().map(|(_, w)| w).sum();
    if !(total > 0.0) {
        return None;
    }

    let (mut east, mut north) = (0.0, 0.0);
    for (p, w) in points {
        let (e, n) = frame.to_local(*p);
        east += e * w;
        north += n * w;
    }
    Some(frame.to_geo(east / total, north / total))
}

/// Unweighted mean position
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    let weighted: Vec<(GeoPoint, f64)> = points.iter().map(|p| (*p, 1.0)).collect();
    weighted_centroid(&weighted)
}

/// Unit vector from the Earth's centre through a point
fn unit_vector(p: GeoPoint) -> Vector3<f64> {
    let lat = p.latitude * DTOR;
    let lon = p.longitude * DTOR;
    Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}

/// Ratio of the smallest to the largest principal spread of a point set
///
/// Points are projected gnomonically onto the plane tangent at their
/// centroid. That projection maps great circles to straight lines, so
/// receivers along any great circle score 0 whatever its bearing. The ratio is
/// taken between the eigenvalues of the 2x2 scatter matrix of the projected
/// points: 0 for collinear or co-located points, 1 for an isotropic layout.
/// Points 90 degrees or more from the centroid have no projection and are
/// ignored.
pub fn spread_ratio(points: &[GeoPoint]) -> f64 {
    let Some(center) = centroid(points) else {
        return 0.0;
    };
    let lat = center.latitude * DTOR;
    let lon = center.longitude * DTOR;
    let up = unit_vector(center);
    let east = Vector3::new(-lon.sin(), lon.cos(), 0.0);
    let north = Vector3::new(-lat.sin() * lon.cos(), -lat.sin() * lon.sin(), lat.cos());

    let projected: Vec<(f64, f64)> = points
        .iter()
        .filter_map(|p| {
            let u = unit_vector(*p);
            let d = u.dot(&up);
            (d > 0.0).then(|| (u.dot(&east) / d, u.dot(&north) / d))
        })
        .collect();
    if projected.is_empty() {
        return 0.0;
    }

    let count = projected.len() as f64;
    let mean_x = projected.iter().map(|(x, _)| x).sum::<f64>() / count;
    let mean_y = projected.iter().map(|(_, y)| y).sum::<f64>() / count;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in &projected {
        let (dx, dy) = (x - mean_x, y - mean_y);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    let half_trace = (sxx + syy) / 2.0;
    let disc = (((sxx - syy) / 2.0).powi(2) + sxy * sxy).sqrt();
    let max = half_trace + disc;
    let min = half_trace - disc;
    if max <= 0.0 {
        0.0
    } else {
        (min / max).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-6;

    #[test]
    fn test_distance_london_paris() {
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let dist = distance(london, paris);

        // Should be approximately 344 km
        assert!((dist - 344_000.0).abs() < 5_000.0, "Distance: {} meters", dist);
    }

    #[test]
    fn test_distance_symmetric_and_zero() {
        let a = GeoPoint::new(37.7749, -122.4194);
        let b = GeoPoint::new(37.8199, -122.4783);

        assert!(distance(a, a).abs() < EPSILON);
        assert!((distance(a, b) - distance(b, a)).abs() < EPSILON);
    }

    #[test]
    fn test_slant_range_adds_height() {
        let a = GeoPoint::new(10.0, 10.0);
        let b = destination(a, 45.0, 3_000.0);
        let slant = slant_range(a, 0.0, b, 4_000.0);
        assert!((slant - 5_000.0).abs() < 0.01, "Slant: {}", slant);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = GeoPoint::new(0.0, 0.0);
        assert!((bearing(origin, GeoPoint::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((bearing(origin, GeoPoint::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((bearing(origin, GeoPoint::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((bearing(origin, GeoPoint::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_range() {
        let origin = GeoPoint::new(37.0, -122.0);
        for i in 0..72 {
            let theta = i as f64 * 5.0;
            let b = bearing(origin, destination(origin, theta, 50_000.0));
            assert!((0.0..360.0).contains(&b), "Bearing out of range: {}", b);
        }
    }

    #[test]
    fn test_destination_roundtrip() {
        let origins = [
            GeoPoint::new(37.7749, -122.4194),
            GeoPoint::new(-33.9, 18.4),
            GeoPoint::new(0.0, 179.9),
            GeoPoint::new(70.0, -10.0),
            GeoPoint::new(-80.0, 45.0),
        ];
        let distances = [1.0, 150.0, 10_000.0, 250_000.0, 999_000.0];

        for origin in origins {
            for i in 0..24 {
                let theta = i as f64 * 15.0;
                for &d in &distances {
                    let dest = destination(origin, theta, d);
                    let back = distance(origin, dest);
                    assert!(
                        (back - d).abs() <= d * 1e-3,
                        "Round trip from {:?} at {} deg: {} vs {}",
                        origin, theta, back, d
                    );
                }
            }
        }
    }

    #[test]
    fn test_destination_wraps_antimeridian() {
        let dest = destination(GeoPoint::new(0.0, 179.9), 90.0, 50_000.0);
        assert!(dest.longitude < -179.0, "Longitude not wrapped: {}", dest.longitude);
    }

    #[test]
    fn test_local_frame_roundtrip() {
        let frame = LocalFrame::new(GeoPoint::new(37.7749, -122.4194));
        let p = GeoPoint::new(37.8199, -122.4783);
        let (e, n) = frame.to_local(p);
        let back = frame.to_geo(e, n);

        assert!((back.latitude - p.latitude).abs() < 1e-9);
        assert!((back.longitude - p.longitude).abs() < 1e-9);
        // West and north of the origin
        assert!(e < 0.0 && n > 0.0);
    }

    #[test]
    fn test_centroid_across_antimeridian() {
        let c = centroid(&[GeoPoint::new(0.0, 179.0), GeoPoint::new(0.0, -179.0)]).unwrap();
        assert!(c.latitude.abs() < EPSILON);
        assert!((c.longitude.abs() - 180.0).abs() < 1e-6, "Centroid: {:?}", c);
    }

    #[test]
    fn test_weighted_centroid() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        let c = weighted_centroid(&[(a, 3.0), (b, 1.0)]).unwrap();
        assert!((c.longitude - 0.25).abs() < 1e-9);

        assert!(weighted_centroid(&[]).is_none());
        assert!(weighted_centroid(&[(a, 0.0)]).is_none());
    }

    #[test]
    fn test_spread_ratio() {
        let center = GeoPoint::new(37.7749, -122.4194);
        let ring: Vec<GeoPoint> = (0..6).map(|i| destination(center, i as f64 * 60.0, 10_000.0)).collect();
        assert!(spread_ratio(&ring) > 0.9);

        let line: Vec<GeoPoint> = (0..4).map(|i| GeoPoint::new(37.70 + 0.05 * i as f64, -122.4194)).collect();
        assert!(spread_ratio(&line) < 1e-12);

        let same = vec![center; 3];
        assert_eq!(spread_ratio(&same), 0.0);
        assert_eq!(spread_ratio(&[]), 0.0);
    }

    #[test]
    fn test_spread_ratio_diagonal_great_circle() {
        // Straight in a gnomonic projection but curved in latitude/longitude
        let center = GeoPoint::new(37.7749, -122.4194);
        for (bearing_deg, span) in [(45.0, 30_000.0), (60.0, 50_000.0), (30.0, 100_000.0), (45.0, 9_000.0)] {
            let line = [
                destination(center, bearing_deg, span),
                destination(center, bearing_deg, span / 3.0),
                destination(center, bearing_deg + 180.0, span / 3.0),
                destination(center, bearing_deg + 180.0, span),
            ];
            let ratio = spread_ratio(&line);
            assert!(ratio < 1e-9, "Bearing {} span {}: {}", bearing_deg, span, ratio);
        }
    }
}
