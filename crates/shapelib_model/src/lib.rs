use std::fmt;
use std::ops::Neg;

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for every geodesic distance in the workspace.
pub const EARTH_RADIUS_METERS: f64 = 6_371_010.0;

const UNIT_LENGTH_TOLERANCE: f64 = 1e-14;
const DEGENERATE_CROSS_TOLERANCE: f64 = 1e-15;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("operation needs at least {required} points, polyline has {actual}")]
    TooFewPoints { required: usize, actual: usize },
    #[error("cannot normalize a zero-length vector")]
    ZeroVector,
    #[error("cannot normalize a vector with non-finite length")]
    NonFiniteVector,
    #[error("point index {index} out of range for polyline with {len} points")]
    IndexOutOfRange { index: isize, len: usize },
    #[error("duplicate shape found: {0}")]
    DuplicateShape(String),
}

/// A point on the unit sphere, or any direction from its center.
///
/// Locations are unit vectors. Intermediate results of vector arithmetic may
/// have any length; call [`SpherePoint::normalize`] before treating one as a
/// location again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpherePoint {
    x: f64,
    y: f64,
    z: f64,
}

impl SpherePoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Projects a latitude/longitude pair in degrees onto the unit sphere.
    pub fn from_lat_lng(lat: f64, lng: f64) -> Self {
        let phi = lat.to_radians();
        let theta = lng.to_radians();
        let cos_phi = phi.cos();
        Self {
            x: theta.cos() * cos_phi,
            y: theta.sin() * cos_phi,
            z: phi.sin(),
        }
    }

    /// Inverse of [`SpherePoint::from_lat_lng`] for unit vectors.
    pub fn to_lat_lng(&self) -> (f64, f64) {
        let lat = self.z.atan2((self.x * self.x + self.y * self.y).sqrt());
        let lng = self.y.atan2(self.x);
        (lat.to_degrees(), lng.to_degrees())
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn coords(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn plus(&self, other: &Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }

    pub fn minus(&self, other: &Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }

    pub fn times(&self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            z: self.z * factor,
        }
    }

    /// Euclidean length of the vector, not a distance along the sphere.
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn is_unit_length(&self) -> bool {
        (self.norm() - 1.0).abs() < UNIT_LENGTH_TOLERANCE
    }

    pub fn normalize(&self) -> Result<Self, ShapeError> {
        let norm = self.norm();
        if !norm.is_finite() {
            return Err(ShapeError::NonFiniteVector);
        }
        if norm == 0.0 {
            return Err(ShapeError::ZeroVector);
        }
        Ok(self.times(1.0 / norm))
    }

    /// Index (0 = x, 1 = y, 2 = z) and value of the component with the
    /// largest magnitude.
    pub fn largest_component(&self) -> (usize, f64) {
        if self.x.abs() > self.y.abs() {
            if self.x.abs() > self.z.abs() {
                (0, self.x)
            } else {
                (2, self.z)
            }
        } else if self.y.abs() > self.z.abs() {
            (1, self.y)
        } else {
            (2, self.z)
        }
    }

    /// An arbitrary but deterministic unit vector perpendicular to this one.
    pub fn ortho(&self) -> Result<Self, ShapeError> {
        let (index, _) = self.largest_component();
        let mut temp = [0.012, 0.053, 0.00457];
        temp[(index + 2) % 3] = 1.0;
        self.cross(&Self::new(temp[0], temp[1], temp[2])).normalize()
    }

    /// `self × other`, computed as `((self + other) × (other − self)) / 2`,
    /// which keeps precision for nearly identical points.
    ///
    /// Parallel or antipodal inputs fall back to the unit vector
    /// [`SpherePoint::ortho`], so the result is never the zero vector. The
    /// length is otherwise the sine of the angle between unit inputs.
    pub fn robust_cross(&self, other: &Self) -> Result<Self, ShapeError> {
        let doubled = self.plus(other).cross(&other.minus(self));
        if doubled.x.abs() > DEGENERATE_CROSS_TOLERANCE
            || doubled.y.abs() > DEGENERATE_CROSS_TOLERANCE
            || doubled.z.abs() > DEGENERATE_CROSS_TOLERANCE
        {
            Ok(doubled.times(0.5))
        } else {
            self.ortho()
        }
    }

    /// Angle in radians between the two vectors as seen from the origin.
    pub fn angle(&self, other: &Self) -> f64 {
        self.cross(other).norm().atan2(self.dot(other))
    }

    /// Great-circle distance between two unit vectors.
    pub fn distance_meters(&self, other: &Self) -> f64 {
        self.angle(other) * EARTH_RADIUS_METERS
    }
}

impl Neg for SpherePoint {
    type Output = SpherePoint;

    fn neg(self) -> Self::Output {
        self.times(-1.0)
    }
}

impl fmt::Display for SpherePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.15}, {:.15}, {:.15})", self.x, self.y, self.z)
    }
}

impl From<LatLng> for SpherePoint {
    fn from(value: LatLng) -> Self {
        SpherePoint::from_lat_lng(value.lat, value.lon)
    }
}

impl From<&ShapeVertex> for SpherePoint {
    fn from(value: &ShapeVertex) -> Self {
        SpherePoint::from_lat_lng(value.lat, value.lon)
    }
}

/// A stop or waypoint location in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LatLng {
    #[serde(alias = "stop_lat")]
    pub lat: f64,
    #[serde(alias = "stop_lon", alias = "lng")]
    pub lon: f64,
}

impl LatLng {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<SpherePoint> for LatLng {
    fn from(value: SpherePoint) -> Self {
        let (lat, lon) = value.to_lat_lng();
        Self { lat, lon }
    }
}

/// One vertex of a raw polyline as handed over by a loader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ShapeVertex {
    #[serde(alias = "shape_pt_lat")]
    pub lat: f64,
    #[serde(alias = "shape_pt_lon")]
    pub lon: f64,
    #[serde(default, alias = "shape_dist_traveled")]
    pub dist_traveled: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-8, "{a} != {b}");
    }

    fn assert_point_approx_eq(a: SpherePoint, b: SpherePoint) {
        assert!(
            (a.x() - b.x()).abs() < 1e-8
                && (a.y() - b.y()).abs() < 1e-8
                && (a.z() - b.z()).abs() < 1e-8,
            "{a} != {b}"
        );
    }

    #[test]
    fn vector_algebra() {
        let p = SpherePoint::new(1.0, 1.0, 1.0);
        assert_approx_eq(p.dot(&p), 3.0);
        assert_approx_eq(p.norm(), 3.0_f64.sqrt());
        assert_point_approx_eq(p.times(1.5), SpherePoint::new(1.5, 1.5, 1.5));

        let norm = 1.7320508075688772;
        assert_point_approx_eq(
            p.normalize().unwrap(),
            SpherePoint::new(1.0 / norm, 1.0 / norm, 1.0 / norm),
        );
    }

    #[test]
    fn normalize_keeps_unit_vectors() {
        for point in [
            SpherePoint::new(1.0, 0.0, 0.0),
            SpherePoint::from_lat_lng(45.5, -122.6),
            SpherePoint::from_lat_lng(-33.9, 151.2),
        ] {
            assert_point_approx_eq(point.normalize().unwrap(), point);
        }
    }

    #[test]
    fn normalize_rejects_zero_vector() {
        assert_eq!(
            SpherePoint::new(0.0, 0.0, 0.0).normalize(),
            Err(ShapeError::ZeroVector)
        );
    }

    #[test]
    fn cross_product() {
        let a = SpherePoint::new(1.0, 0.0, 0.0);
        let b = SpherePoint::new(0.0, 1.0, 0.0);
        assert_point_approx_eq(a.cross(&b), SpherePoint::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn cross_product_is_anticommutative_and_perpendicular() {
        let a = SpherePoint::from_lat_lng(40.5, -74.2);
        let b = SpherePoint::from_lat_lng(12.0, 80.0);
        assert_point_approx_eq(a.cross(&b), -b.cross(&a));
        assert_approx_eq(a.dot(&a.cross(&b)), 0.0);
        assert_approx_eq(b.dot(&a.cross(&b)), 0.0);
    }

    #[test]
    fn robust_cross_handles_identical_points() {
        let a = SpherePoint::new(1.0, 0.0, 0.0);
        assert_point_approx_eq(a.cross(&a), SpherePoint::new(0.0, 0.0, 0.0));

        let normal = a.robust_cross(&a).unwrap();
        assert_point_approx_eq(
            normal,
            SpherePoint::new(0.0, -0.998598452020993, 0.052925717957113),
        );
        assert_approx_eq(normal.dot(&a), 0.0);
        assert!(normal.norm() > 0.5);
    }

    #[test]
    fn robust_cross_handles_antipodal_points() {
        let a = SpherePoint::from_lat_lng(10.0, 20.0);
        let normal = a.robust_cross(&-a).unwrap();
        assert!(normal.is_unit_length() || (normal.norm() - 1.0).abs() < 1e-12);
        assert_approx_eq(normal.dot(&a), 0.0);
    }

    #[test]
    fn robust_cross_follows_cross_direction() {
        let a = SpherePoint::new(1.0, 0.0, 0.0);
        let b = SpherePoint::new(0.0, 1.0, 0.0);
        assert_point_approx_eq(a.robust_cross(&b).unwrap(), SpherePoint::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn robust_cross_keeps_cross_length() {
        let a = SpherePoint::from_lat_lng(0.0, 0.0);
        let b = SpherePoint::from_lat_lng(0.0, 10.0);
        let robust = a.robust_cross(&b).unwrap();
        assert_point_approx_eq(robust, a.cross(&b));
        assert_approx_eq(robust.norm(), 10.0_f64.to_radians().sin());
    }

    #[test]
    fn normalize_rejects_non_finite_vectors() {
        assert_eq!(
            SpherePoint::new(f64::NAN, 0.0, 0.0).normalize(),
            Err(ShapeError::NonFiniteVector)
        );
        assert_eq!(
            SpherePoint::new(f64::INFINITY, 1.0, 0.0).normalize(),
            Err(ShapeError::NonFiniteVector)
        );
    }

    #[test]
    fn lat_lng_projection() {
        let point = SpherePoint::from_lat_lng(30.0, 40.0);
        assert_point_approx_eq(
            point,
            SpherePoint::new(0.663413948169, 0.556670399226, 0.5),
        );
        let (lat, lng) = point.to_lat_lng();
        assert_approx_eq(lat, 30.0);
        assert_approx_eq(lng, 40.0);
    }

    #[test]
    fn lat_lng_round_trip() {
        let mut lat = -90.0;
        while lat <= 90.0 {
            let mut lng = -179.5;
            while lng <= 180.0 {
                let (back_lat, back_lng) = SpherePoint::from_lat_lng(lat, lng).to_lat_lng();
                assert!((back_lat - lat).abs() < 1e-9, "lat {lat} -> {back_lat}");
                if lat.abs() < 90.0 {
                    assert!((back_lng - lng).abs() < 1e-9, "lng {lng} -> {back_lng}");
                }
                lng += 29.5;
            }
            lat += 15.0;
        }
    }

    #[test]
    fn ortho_is_perpendicular() {
        let point = SpherePoint::new(1.0, 1.0, 1.0);
        let ortho = point.ortho().unwrap();
        assert_approx_eq(ortho.dot(&point), 0.0);
        assert!(SpherePoint::new(0.0, 0.0, 0.0).ortho().is_err());
    }

    #[test]
    fn angle_is_symmetric() {
        let a = SpherePoint::new(1.0, 1.0, 0.0).normalize().unwrap();
        let b = SpherePoint::new(0.0, 1.0, 0.0);
        assert_approx_eq(a.angle(&b).to_degrees(), 45.0);
        assert_approx_eq(a.angle(&b), b.angle(&a));
    }

    #[test]
    fn distance_between_known_points() {
        let a = SpherePoint::from_lat_lng(40.536895, -74.203033);
        let b = SpherePoint::from_lat_lng(40.575239, -74.112825);
        assert!((a.distance_meters(&b) - 8732.623770873237).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude() {
        let a = SpherePoint::from_lat_lng(10.0, 20.0);
        let b = SpherePoint::from_lat_lng(11.0, 20.0);
        let c = SpherePoint::from_lat_lng(10.0, 21.0);
        let north = a.distance_meters(&b);
        assert!((north - 111_320.0).abs() < 1_113.2, "got {north}");
        // The legs of the right angle at `a` are shorter than the hypotenuse.
        assert!(b.distance_meters(&c) > north);
        assert!(b.distance_meters(&c) > a.distance_meters(&c));
    }

    #[test]
    fn lat_lng_conversions() {
        let point = SpherePoint::from(LatLng::new(45.585212, -122.586136));
        let back = LatLng::from(point);
        assert_approx_eq(back.lat, 45.585212);
        assert_approx_eq(back.lon, -122.586136);

        let vertex = ShapeVertex {
            lat: 45.585212,
            lon: -122.586136,
            dist_traveled: Some(12.5),
        };
        assert_point_approx_eq(SpherePoint::from(&vertex), point);
    }

    #[test]
    fn error_messages() {
        let error = ShapeError::TooFewPoints {
            required: 2,
            actual: 1,
        };
        assert_eq!(
            error.to_string(),
            "operation needs at least 2 points, polyline has 1"
        );
    }
}
