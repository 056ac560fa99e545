use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rstar::primitives::GeomWithData;
use rstar::RTree;
use rustc_hash::FxHashMap;
use shapelib_model::{ShapeError, SpherePoint, EARTH_RADIUS_METERS};
use tracing::debug;

use crate::collection::{DuplicatePolicy, PolyCollection, PolyId};
use crate::diagnostics::{NoOpObserver, PathSearchObserver, TracingObserver};
use crate::poly::Poly;
use crate::settings::MatchSettings;

/// Index of a distinct endpoint in a [`PolyGraph`].
pub type VertexId = usize;

/// Predecessor map produced by a shortest-path search.
pub type CameFrom = FxHashMap<VertexId, PathStep>;

type VertexEntry = GeomWithData<[f64; 3], VertexId>;

/// How a vertex was reached: through polyline `poly`, coming from `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    pub poly: PolyId,
    pub from: VertexId,
}

/// Exact coordinate bits; `-0.0` and `0.0` share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct VertexKey([u64; 3]);

impl VertexKey {
    fn of(point: &SpherePoint) -> Self {
        let bits = |value: f64| if value == 0.0 { 0u64 } else { value.to_bits() };
        Self([bits(point.x()), bits(point.y()), bits(point.z())])
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    start: VertexId,
    end: VertexId,
    length: f64,
}

#[derive(Debug)]
struct Frontier {
    cost: f64,
    vertex: VertexId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // Reversed so the max-heap pops the cheapest vertex first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

/// An undirected graph whose edges are polylines and whose vertices are the
/// exact endpoint values of those polylines.
pub struct PolyGraph {
    collection: PolyCollection,
    vertices: Vec<SpherePoint>,
    vertex_ids: FxHashMap<VertexKey, VertexId>,
    adjacency: Vec<Vec<PolyId>>,
    /// Indexed by `PolyId`; every stored polyline is exactly one edge.
    edges: Vec<Edge>,
    tree: RTree<VertexEntry>,
}

impl Default for PolyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PolyGraph {
    pub fn new() -> Self {
        Self {
            collection: PolyCollection::new(),
            vertices: Vec::new(),
            vertex_ids: FxHashMap::default(),
            adjacency: Vec::new(),
            edges: Vec::new(),
            tree: RTree::new(),
        }
    }

    /// Builds a graph from `polys`, resolving duplicate names with the
    /// policy in `settings`.
    pub fn from_polys<I>(polys: I, settings: &MatchSettings) -> Result<Self, ShapeError>
    where
        I: IntoIterator<Item = Poly>,
    {
        let mut graph = Self::new();
        for poly in polys {
            graph.add_poly_configured(poly, settings)?;
        }
        Ok(graph)
    }

    pub fn add_poly_configured(
        &mut self,
        poly: Poly,
        settings: &MatchSettings,
    ) -> Result<PolyId, ShapeError> {
        self.add_poly_with(poly, settings.duplicate_policy)
    }

    pub fn add_poly(&mut self, poly: Poly) -> Result<PolyId, ShapeError> {
        self.add_poly_with(poly, DuplicatePolicy::Smart)
    }

    pub fn add_poly_with(
        &mut self,
        poly: Poly,
        policy: DuplicatePolicy,
    ) -> Result<PolyId, ShapeError> {
        let before = self.collection.len();
        let id = self.collection.add_poly_with(poly, policy)?;
        if self.collection.len() == before {
            return Ok(id);
        }

        let Some(stored) = self.collection.get(id) else {
            return Ok(id);
        };
        let (Some(first), Some(last)) = (stored.first(), stored.last()) else {
            return Ok(id);
        };
        let length = stored.length_meters()?;

        let start = self.intern_vertex(first);
        let end = self.intern_vertex(last);
        self.adjacency[start].push(id);
        if end != start {
            self.adjacency[end].push(id);
        }
        self.edges.push(Edge { start, end, length });
        Ok(id)
    }

    fn intern_vertex(&mut self, point: SpherePoint) -> VertexId {
        let key = VertexKey::of(&point);
        if let Some(&id) = self.vertex_ids.get(&key) {
            return id;
        }
        let id = self.vertices.len();
        self.vertices.push(point);
        self.vertex_ids.insert(key, id);
        self.adjacency.push(Vec::new());
        self.tree.insert(GeomWithData::new(point.coords(), id));
        id
    }

    pub fn collection(&self) -> &PolyCollection {
        &self.collection
    }

    pub fn find_matching_polys(
        &self,
        start: &SpherePoint,
        end: &SpherePoint,
        max_distance: f64,
    ) -> Vec<&Poly> {
        self.collection.find_matching_polys(start, end, max_distance)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertex(&self, id: VertexId) -> Option<&SpherePoint> {
        self.vertices.get(id)
    }

    pub fn vertex_id(&self, point: &SpherePoint) -> Option<VertexId> {
        self.vertex_ids.get(&VertexKey::of(point)).copied()
    }

    pub fn contains_vertex(&self, point: &SpherePoint) -> bool {
        self.vertex_id(point).is_some()
    }

    /// Polylines with an endpoint exactly at `point`.
    pub fn edges_at(&self, point: &SpherePoint) -> Vec<&Poly> {
        self.vertex_id(point)
            .map(|vertex| {
                self.adjacency[vertex]
                    .iter()
                    .filter_map(|&id| self.collection.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn nearest_vertex(&self, point: &SpherePoint) -> Option<SpherePoint> {
        self.tree
            .nearest_neighbor(&point.coords())
            .map(|entry| self.vertices[entry.data])
    }

    /// Vertices within `max_distance` meters of `point`, nearest first.
    pub fn vertices_within(&self, point: &SpherePoint, max_distance: f64) -> Vec<SpherePoint> {
        self.vertex_ids_within(point, max_distance)
            .into_iter()
            .map(|id| self.vertices[id])
            .collect()
    }

    fn vertex_ids_within(&self, point: &SpherePoint, max_distance: f64) -> Vec<VertexId> {
        if !(max_distance >= 0.0) {
            return Vec::new();
        }
        // Chord length for the angular radius, padded for rounding.
        let angle = (max_distance / EARTH_RADIUS_METERS).min(std::f64::consts::PI);
        let chord = 2.0 * (angle / 2.0).sin();
        let max_squared_radius = chord * chord + 1e-12;

        let mut found: Vec<(f64, VertexId)> = self
            .tree
            .locate_within_distance(point.coords(), max_squared_radius)
            .map(|entry| (point.distance_meters(&self.vertices[entry.data]), entry.data))
            .filter(|(distance, _)| *distance <= max_distance)
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.into_iter().map(|(_, id)| id).collect()
    }

    /// Cheapest chain of polylines from vertex `start` to vertex `end`,
    /// oriented and merged into one polyline.
    ///
    /// Returns an empty polyline when `start == end`, and `None` when either
    /// point is not a vertex or `end` cannot be reached.
    pub fn shortest_path(&self, start: &SpherePoint, end: &SpherePoint) -> Option<Poly> {
        let start = self.vertex_id(start)?;
        let end = self.vertex_id(end)?;
        self.shortest_path_between(start, end)
    }

    fn shortest_path_between(&self, start: VertexId, end: VertexId) -> Option<Poly> {
        if start == end {
            return Some(Poly::new());
        }

        let mut distances: FxHashMap<VertexId, f64> = FxHashMap::default();
        let mut came_from = CameFrom::default();
        let mut frontier = BinaryHeap::new();
        distances.insert(start, 0.0);
        frontier.push(Frontier {
            cost: 0.0,
            vertex: start,
        });

        while let Some(Frontier { cost, vertex }) = frontier.pop() {
            if vertex == end {
                return Some(self.reconstruct_path(&came_from, end));
            }
            if distances.get(&vertex).is_some_and(|&best| cost > best) {
                continue;
            }
            for &poly in &self.adjacency[vertex] {
                let edge = self.edges[poly];
                let next = if edge.start == vertex { edge.end } else { edge.start };
                let candidate = cost + edge.length;
                let improved = distances
                    .get(&next)
                    .map_or(true, |&known| candidate < known);
                if improved {
                    distances.insert(next, candidate);
                    came_from.insert(next, PathStep { poly, from: vertex });
                    frontier.push(Frontier {
                        cost: candidate,
                        vertex: next,
                    });
                }
            }
        }

        debug!(start, end, "No path between vertices");
        None
    }

    /// Walks `came_from` back from `target` and merges the traversed
    /// polylines, each oriented in the direction of travel.
    pub fn reconstruct_path(&self, came_from: &CameFrom, target: VertexId) -> Poly {
        let mut steps = Vec::new();
        let mut current = target;
        while let Some(step) = came_from.get(&current) {
            steps.push(*step);
            current = step.from;
        }
        steps.reverse();

        let oriented: Vec<Poly> = steps
            .iter()
            .filter_map(|step| {
                let poly = self.collection.get(step.poly)?;
                let edge = self.edges.get(step.poly)?;
                Some(if edge.start == step.from {
                    poly.clone()
                } else {
                    poly.reversed()
                })
            })
            .collect();
        Poly::merge(&oriented, Some(0.0))
    }

    /// Joins `points` through the graph, snapping each to its nearest vertex
    /// within `max_distance` meters.
    ///
    /// `verbosity` controls the diagnostics emitted through `tracing`.
    pub fn find_shortest_multi_point_path(
        &self,
        points: &[SpherePoint],
        max_distance: f64,
        verbosity: u8,
    ) -> Result<Option<Poly>, ShapeError> {
        if verbosity == 0 {
            self.find_shortest_multi_point_path_observed(points, max_distance, &NoOpObserver)
        } else {
            let observer = TracingObserver::new(verbosity);
            self.find_shortest_multi_point_path_observed(points, max_distance, &observer)
        }
    }

    pub fn find_shortest_multi_point_path_observed(
        &self,
        points: &[SpherePoint],
        max_distance: f64,
        observer: &dyn PathSearchObserver,
    ) -> Result<Option<Poly>, ShapeError> {
        if points.len() < 2 {
            return Err(ShapeError::TooFewPoints {
                required: 2,
                actual: points.len(),
            });
        }

        let mut snapped = Vec::with_capacity(points.len());
        for (index, point) in points.iter().enumerate() {
            let candidates = self.vertex_ids_within(point, max_distance);
            let Some(&vertex) = candidates.first() else {
                observer.on_waypoint(index, point, 0, None);
                observer.on_failure(&format!(
                    "waypoint {index} has no vertex within {max_distance} m"
                ));
                return Ok(None);
            };
            observer.on_waypoint(index, point, candidates.len(), Some(&self.vertices[vertex]));
            snapped.push(vertex);
        }

        let mut segments = Vec::with_capacity(snapped.len() - 1);
        for (index, pair) in snapped.windows(2).enumerate() {
            let Some(segment) = self.shortest_path_between(pair[0], pair[1]) else {
                observer.on_failure(&format!(
                    "no path between waypoints {index} and {}",
                    index + 1
                ));
                return Ok(None);
            };
            let length = segment.length_meters().unwrap_or(0.0);
            observer.on_segment(index, &self.vertices[pair[0]], &self.vertices[pair[1]], length);
            segments.push(segment);
        }

        let path = Poly::merge(&segments, Some(0.0));
        if path.len() < 2 {
            observer.on_failure("every waypoint snapped to the same vertex");
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Multi-point search that keeps the `keep_best_n` cheapest partial paths
    /// over every vertex within `max_distance` of each waypoint.
    ///
    /// A partial path costs its length plus the snapping distance of each
    /// waypoint.
    pub fn find_best_multi_point_path(
        &self,
        points: &[SpherePoint],
        max_distance: f64,
        keep_best_n: usize,
    ) -> Result<Option<Poly>, ShapeError> {
        if points.len() < 2 {
            return Err(ShapeError::TooFewPoints {
                required: 2,
                actual: points.len(),
            });
        }
        let keep_best_n = keep_best_n.max(1);

        let mut candidate_sets = Vec::with_capacity(points.len());
        for point in points {
            let candidates: Vec<(VertexId, f64)> = self
                .vertex_ids_within(point, max_distance)
                .into_iter()
                .map(|id| (id, point.distance_meters(&self.vertices[id])))
                .collect();
            if candidates.is_empty() {
                debug!(max_distance, "Waypoint has no vertex in range");
                return Ok(None);
            }
            candidate_sets.push(candidates);
        }

        struct Partial {
            cost: f64,
            last: VertexId,
            segments: Vec<usize>,
        }

        let mut paths: Vec<Poly> = Vec::new();
        let mut beam: Vec<Partial> = candidate_sets[0]
            .iter()
            .map(|&(vertex, snap)| Partial {
                cost: snap,
                last: vertex,
                segments: Vec::new(),
            })
            .collect();
        beam.sort_by(|a, b| a.cost.total_cmp(&b.cost));
        beam.truncate(keep_best_n);

        for candidates in &candidate_sets[1..] {
            let mut cache: FxHashMap<(VertexId, VertexId), Option<(usize, f64)>> =
                FxHashMap::default();
            let mut next = Vec::new();
            for partial in &beam {
                for &(vertex, snap) in candidates {
                    let cached = *cache.entry((partial.last, vertex)).or_insert_with(|| {
                        self.shortest_path_between(partial.last, vertex).map(|path| {
                            let length = path.length_meters().unwrap_or(0.0);
                            paths.push(path);
                            (paths.len() - 1, length)
                        })
                    });
                    if let Some((segment, length)) = cached {
                        let mut segments = partial.segments.clone();
                        segments.push(segment);
                        next.push(Partial {
                            cost: partial.cost + length + snap,
                            last: vertex,
                            segments,
                        });
                    }
                }
            }
            next.sort_by(|a, b| a.cost.total_cmp(&b.cost));
            next.truncate(keep_best_n);
            if next.is_empty() {
                debug!("No candidate path reaches the next waypoint");
                return Ok(None);
            }
            beam = next;
        }

        let Some(best) = beam.first() else {
            return Ok(None);
        };
        let path = Poly::merge(best.segments.iter().map(|&index| &paths[index]), Some(0.0));
        if path.len() < 2 {
            return Ok(None);
        }
        Ok(Some(path))
    }
}
