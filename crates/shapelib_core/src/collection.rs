use compact_str::{format_compact, CompactString};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use shapelib_model::{ShapeError, SpherePoint, EARTH_RADIUS_METERS};
use tracing::{debug, warn};

use crate::poly::Poly;

/// Insertion index of a polyline inside a [`PolyCollection`].
pub type PolyId = usize;

const CELLS_PER_DEGREE: f64 = 100.0;
const LNG_CELLS: i64 = 360 * 100;
/// Cell windows are padded by this many degrees to absorb projection rounding.
const WINDOW_PADDING_DEGREES: f64 = 1e-9;
/// Beyond this latitude a query scans every polyline.
const POLAR_LATITUDE: f64 = 89.0;
/// Largest per-endpoint cell window served from the bucket index.
const MAX_WINDOW_CELLS: usize = 64;
/// Same-named polylines closer than this are treated as one shape.
const DUPLICATE_DISTANCE_METERS: f64 = 10.0;

type Cell = (i64, i64);

/// What to do when a polyline arrives under a name already in the
/// collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Skip near-identical geometry, rename anything else.
    #[default]
    Smart,
    /// Fail with [`ShapeError::DuplicateShape`].
    Reject,
}

/// Polylines indexed by the quantized positions of their endpoints.
///
/// Every polyline is filed under `(cell(first), cell(last))` and
/// `(cell(last), cell(first))`, so endpoint lookups work in either direction.
#[derive(Debug, Clone, Default)]
pub struct PolyCollection {
    polys: Vec<Poly>,
    names: FxHashMap<CompactString, PolyId>,
    buckets: FxHashMap<(Cell, Cell), Vec<PolyId>>,
}

impl PolyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a polyline with [`DuplicatePolicy::Smart`].
    pub fn add_poly(&mut self, poly: Poly) -> Result<PolyId, ShapeError> {
        self.add_poly_with(poly, DuplicatePolicy::Smart)
    }

    /// Adds a polyline and returns its id.
    ///
    /// When `Smart` skips a duplicate, the id of the polyline already stored
    /// under that name is returned and the collection is unchanged.
    pub fn add_poly_with(
        &mut self,
        mut poly: Poly,
        policy: DuplicatePolicy,
    ) -> Result<PolyId, ShapeError> {
        let (Some(first), Some(last)) = (poly.first(), poly.last()) else {
            return Err(ShapeError::TooFewPoints {
                required: 2,
                actual: poly.len(),
            });
        };
        if poly.len() < 2 {
            return Err(ShapeError::TooFewPoints {
                required: 2,
                actual: poly.len(),
            });
        }

        if let Some(name) = poly.name().map(CompactString::from) {
            if let Some(&existing) = self.names.get(&name) {
                match policy {
                    DuplicatePolicy::Reject => {
                        return Err(ShapeError::DuplicateShape(name.to_string()));
                    }
                    DuplicatePolicy::Smart => {
                        let distance = poly.greedy_poly_match_dist(&self.polys[existing])?;
                        if distance < DUPLICATE_DISTANCE_METERS {
                            warn!(shape = %name, distance, "Skipping duplicate shape");
                            return Ok(existing);
                        }
                        let unique = self.unique_name(&name);
                        warn!(
                            shape = %name,
                            renamed = %unique,
                            distance,
                            "Duplicate shape name with different geometry"
                        );
                        poly.set_name(unique);
                    }
                }
            }
        }

        let id = self.polys.len();
        if let Some(name) = poly.name() {
            self.names.insert(CompactString::from(name), id);
        }
        let forward = (cell_of(&first), cell_of(&last));
        let backward = (forward.1, forward.0);
        self.buckets.entry(forward).or_default().push(id);
        if backward != forward {
            self.buckets.entry(backward).or_default().push(id);
        }
        self.polys.push(poly);
        Ok(id)
    }

    fn unique_name(&self, name: &str) -> CompactString {
        let mut count = 1usize;
        loop {
            let candidate = format_compact!("{name}-{count}");
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
            count += 1;
        }
    }

    /// Polylines whose endpoints lie within `max_distance` meters of `start`
    /// and `end`, in either orientation, in insertion order.
    pub fn find_matching_polys(
        &self,
        start: &SpherePoint,
        end: &SpherePoint,
        max_distance: f64,
    ) -> Vec<&Poly> {
        self.find_matching_poly_ids(start, end, max_distance)
            .into_iter()
            .map(|id| &self.polys[id])
            .collect()
    }

    pub fn find_matching_poly_ids(
        &self,
        start: &SpherePoint,
        end: &SpherePoint,
        max_distance: f64,
    ) -> Vec<PolyId> {
        if !(max_distance >= 0.0) || self.polys.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<PolyId> =
            match (cell_window(start, max_distance), cell_window(end, max_distance)) {
                (Some(start_cells), Some(end_cells)) => {
                    let mut ids = Vec::new();
                    for start_cell in &start_cells {
                        for end_cell in &end_cells {
                            if let Some(bucket) = self.buckets.get(&(*start_cell, *end_cell)) {
                                ids.extend_from_slice(bucket);
                            }
                        }
                    }
                    ids.sort_unstable();
                    ids.dedup();
                    ids
                }
                _ => {
                    debug!(max_distance, "Endpoint lookup falls back to a full scan");
                    (0..self.polys.len()).collect()
                }
            };

        candidates
            .into_iter()
            .filter(|&id| endpoints_match(&self.polys[id], start, end, max_distance))
            .collect()
    }

    pub fn get(&self, id: PolyId) -> Option<&Poly> {
        self.polys.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Poly> {
        self.names.get(name).map(|&id| &self.polys[id])
    }

    pub fn iter(&self) -> impl Iterator<Item = (PolyId, &Poly)> {
        self.polys.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.polys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polys.is_empty()
    }
}

fn endpoints_match(poly: &Poly, start: &SpherePoint, end: &SpherePoint, max_distance: f64) -> bool {
    let (Some(first), Some(last)) = (poly.first(), poly.last()) else {
        return false;
    };
    (start.distance_meters(&first) <= max_distance && end.distance_meters(&last) <= max_distance)
        || (start.distance_meters(&last) <= max_distance
            && end.distance_meters(&first) <= max_distance)
}

fn lat_cell(lat: f64) -> i64 {
    (lat * CELLS_PER_DEGREE).floor() as i64
}

fn lng_cell(lng: f64) -> i64 {
    (((lng + 180.0) * CELLS_PER_DEGREE).floor() as i64).rem_euclid(LNG_CELLS)
}

fn cell_of(point: &SpherePoint) -> Cell {
    let (lat, lng) = point.to_lat_lng();
    (lat_cell(lat), lng_cell(lng))
}

/// Every cell holding a point within `max_distance` meters of `point`, or
/// `None` when the window is too wide to be worth enumerating.
fn cell_window(point: &SpherePoint, max_distance: f64) -> Option<Vec<Cell>> {
    let (lat, lng) = point.to_lat_lng();
    let angular = max_distance / EARTH_RADIUS_METERS;
    let lat_radius = angular.to_degrees() + WINDOW_PADDING_DEGREES;
    if lat.abs() + lat_radius >= POLAR_LATITUDE {
        return None;
    }

    let spread = angular.sin() / lat.to_radians().cos();
    if !(spread < 1.0) || angular >= std::f64::consts::FRAC_PI_2 {
        return None;
    }
    let lng_radius = spread.asin().to_degrees() + WINDOW_PADDING_DEGREES;
    if lng_radius >= 180.0 {
        return None;
    }

    let lat_range = lat_cell(lat - lat_radius)..=lat_cell(lat + lat_radius);
    let lng_low = ((lng - lng_radius + 180.0) * CELLS_PER_DEGREE).floor() as i64;
    let lng_high = ((lng + lng_radius + 180.0) * CELLS_PER_DEGREE).floor() as i64;

    let lat_count = lat_range.clone().count();
    let lng_count = (lng_high - lng_low + 1).max(0) as usize;
    if lat_count * lng_count > MAX_WINDOW_CELLS {
        return None;
    }

    let mut cells = Vec::with_capacity(lat_count * lng_count);
    for lat_index in lat_range {
        for lng_index in lng_low..=lng_high {
            cells.push((lat_index, lng_index.rem_euclid(LNG_CELLS)));
        }
    }
    Some(cells)
}
