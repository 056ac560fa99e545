use compact_str::CompactString;
use shapelib_model::{ShapeError, ShapeVertex, SpherePoint};

/// Separator placed between source names when polylines are merged.
pub const NAME_SEPARATOR: &str = ";";

/// An ordered, optionally named sequence of points on the unit sphere.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Poly {
    points: Vec<SpherePoint>,
    name: Option<CompactString>,
}

impl Poly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<CompactString>) -> Self {
        Self {
            points: Vec::new(),
            name: Some(name.into()),
        }
    }

    pub fn from_points(points: Vec<SpherePoint>, name: Option<&str>) -> Self {
        Self {
            points,
            name: name.map(CompactString::from),
        }
    }

    /// Builds a polyline from `(lat, lng)` pairs in degrees.
    pub fn from_lat_lngs<I>(name: Option<&str>, coords: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let points = coords
            .into_iter()
            .map(|(lat, lng)| SpherePoint::from_lat_lng(lat, lng))
            .collect();
        Self::from_points(points, name)
    }

    /// Builds a polyline from loader vertices. Cumulative distances are
    /// ignored; the geometry alone defines the shape.
    pub fn from_vertices(name: Option<&str>, vertices: &[ShapeVertex]) -> Self {
        Self::from_points(vertices.iter().map(SpherePoint::from).collect(), name)
    }

    pub fn to_lat_lngs(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(SpherePoint::to_lat_lng).collect()
    }

    pub fn add_point(&mut self, point: SpherePoint) {
        self.points.push(point);
    }

    /// Returns the point at `index`; negative indices count from the end.
    pub fn point(&self, index: isize) -> Result<SpherePoint, ShapeError> {
        let len = self.points.len();
        let resolved = if index < 0 {
            len as isize + index
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(ShapeError::IndexOutOfRange { index, len });
        }
        Ok(self.points[resolved as usize])
    }

    pub fn first(&self) -> Option<SpherePoint> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<SpherePoint> {
        self.points.last().copied()
    }

    pub fn points(&self) -> &[SpherePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<SpherePoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<CompactString>) {
        self.name = Some(name.into());
    }

    pub fn with_name(mut self, name: impl Into<CompactString>) -> Self {
        self.set_name(name);
        self
    }

    pub fn length_meters(&self) -> Result<f64, ShapeError> {
        if self.points.len() < 2 {
            return Err(ShapeError::TooFewPoints {
                required: 2,
                actual: self.points.len(),
            });
        }
        Ok(self
            .points
            .windows(2)
            .map(|pair| pair[0].distance_meters(&pair[1]))
            .sum())
    }

    pub fn reversed(&self) -> Self {
        Self {
            points: self.points.iter().rev().copied().collect(),
            name: self.name.clone(),
        }
    }

    /// Vertex of this polyline nearest to `target`, with its index.
    pub fn closest_point(&self, target: &SpherePoint) -> Result<(SpherePoint, usize), ShapeError> {
        self.closest_vertex_from(target, 0)
            .ok_or(ShapeError::TooFewPoints {
                required: 1,
                actual: 0,
            })
    }

    fn closest_vertex_from(&self, target: &SpherePoint, start: usize) -> Option<(SpherePoint, usize)> {
        let mut best: Option<(SpherePoint, usize, f64)> = None;
        for (index, point) in self.points.iter().enumerate().skip(start) {
            let angle = target.angle(point);
            if best.map_or(true, |(_, _, best_angle)| angle < best_angle) {
                best = Some((*point, index, angle));
            }
        }
        best.map(|(point, index, _)| (point, index))
    }

    /// Splits the polyline at the point of its path nearest to `target`.
    ///
    /// With the nearest point `c` on segment `i`, returns the points up to
    /// and including vertex `i`, and `c` followed by the points after vertex
    /// `i`.
    pub fn cut_at_closest_point(&self, target: &SpherePoint) -> Result<(Poly, Poly), ShapeError> {
        let mut closest = self.first().ok_or(ShapeError::TooFewPoints {
            required: 1,
            actual: 0,
        })?;
        let mut closest_index = 0;
        let mut closest_angle = target.angle(&closest);

        for (index, pair) in self.points.windows(2).enumerate() {
            let candidate = closest_point_on_segment(target, &pair[0], &pair[1])?;
            let angle = target.angle(&candidate);
            if angle < closest_angle {
                closest = candidate;
                closest_index = index;
                closest_angle = angle;
            }
        }

        let before = self.points[..=closest_index].to_vec();
        let mut after = Vec::with_capacity(self.points.len() - closest_index);
        after.push(closest);
        after.extend_from_slice(&self.points[closest_index + 1..]);

        Ok((
            Poly {
                points: before,
                name: self.name.clone(),
            },
            Poly {
                points: after,
                name: self.name.clone(),
            },
        ))
    }

    /// Scores how well `other` follows this polyline.
    ///
    /// Each point of `self` is matched to the nearest vertex of `other` that
    /// does not lie before the previous match. The score is the largest
    /// distance in meters between a point and its match; lower is better.
    pub fn greedy_poly_match_dist(&self, other: &Poly) -> Result<f64, ShapeError> {
        if other.is_empty() {
            return Err(ShapeError::TooFewPoints {
                required: 1,
                actual: 0,
            });
        }
        let mut cursor = 0;
        let mut max_distance = 0.0_f64;
        for point in &self.points {
            let Some((matched, index)) = other.closest_vertex_from(point, cursor) else {
                break;
            };
            cursor = index;
            max_distance = max_distance.max(point.distance_meters(&matched));
        }
        Ok(max_distance)
    }

    /// Concatenates polylines in order.
    ///
    /// Names are joined with `;`, unnamed polylines contributing an empty
    /// segment. When `merge_point_threshold` is set and the first point of a
    /// polyline lies within that many meters of the point before it, the
    /// duplicate is dropped.
    pub fn merge<'a, I>(polys: I, merge_point_threshold: Option<f64>) -> Poly
    where
        I: IntoIterator<Item = &'a Poly>,
    {
        let mut points: Vec<SpherePoint> = Vec::new();
        let mut names: Vec<&str> = Vec::new();
        for poly in polys {
            names.push(poly.name().unwrap_or(""));
            let mut incoming = poly.points.as_slice();
            if let (Some(threshold), Some(previous), Some(next)) =
                (merge_point_threshold, points.last(), incoming.first())
            {
                if previous.distance_meters(next) <= threshold {
                    incoming = &incoming[1..];
                }
            }
            points.extend_from_slice(incoming);
        }
        Poly {
            points,
            name: Some(CompactString::from(names.join(NAME_SEPARATOR))),
        }
    }
}

/// `true` when `a`, `b`, `c` turn counter-clockwise around the origin.
fn simple_ccw(a: &SpherePoint, b: &SpherePoint, c: &SpherePoint) -> bool {
    c.cross(a).dot(b) > 0.0
}

/// Point of the great-circle arc from `a` to `b` nearest to `x`.
pub fn closest_point_on_segment(
    x: &SpherePoint,
    a: &SpherePoint,
    b: &SpherePoint,
) -> Result<SpherePoint, ShapeError> {
    let normal = a.robust_cross(b)?;
    let projected = x.minus(&normal.times(x.dot(&normal) / normal.dot(&normal)));
    if simple_ccw(&normal, a, &projected) && simple_ccw(&projected, b, &normal) {
        return projected.normalize();
    }
    if x.minus(a).norm() <= x.minus(b).norm() {
        Ok(*a)
    } else {
        Ok(*b)
    }
}
