use std::cmp::Ordering;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use shapelib_model::{LatLng, ShapeError, SpherePoint};
use tracing::{debug, warn};

use crate::graph::PolyGraph;
use crate::poly::Poly;
use crate::settings::{MatchSettings, PathSearch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// A stored polyline whose endpoints sit at the first and last stop.
    Endpoints,
    /// A chain of polylines assembled through the graph.
    GraphPath,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMatch {
    /// Oriented from the first stop to the last.
    pub poly: Poly,
    /// Greedy match distance in meters.
    pub score: f64,
    pub source: MatchSource,
}

/// Picks the candidate that `pattern` follows most closely.
///
/// Returns `None` when there are no candidates or the best score exceeds
/// `max_distance`.
pub fn get_matching_shape<'a>(
    pattern: &Poly,
    matches: &[&'a Poly],
    max_distance: f64,
) -> Option<(f64, &'a Poly)> {
    let (score, best) = matches
        .iter()
        .filter_map(|&candidate| {
            pattern
                .greedy_poly_match_dist(candidate)
                .ok()
                .map(|score| (score, candidate))
        })
        .min_by(|a, b| cmp_f64(a.0, b.0))?;

    if score > max_distance {
        warn!(
            shape = best.name().unwrap_or_default(),
            score, max_distance, "No matching shape within max-distance"
        );
        return None;
    }
    Some((score, best))
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}

/// Finds the polyline a stop pattern runs along: a stored polyline spanning
/// its first and last stop when one exists, otherwise a path through the
/// graph.
pub struct ShapeMatcher<'g> {
    graph: &'g PolyGraph,
    settings: MatchSettings,
}

impl<'g> ShapeMatcher<'g> {
    pub fn new(graph: &'g PolyGraph, settings: MatchSettings) -> Self {
        Self { graph, settings }
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn match_pattern(&self, pattern: &[SpherePoint]) -> Result<Option<ShapeMatch>, ShapeError> {
        let (Some(&first), Some(&last)) = (pattern.first(), pattern.last()) else {
            return Err(ShapeError::TooFewPoints {
                required: 2,
                actual: pattern.len(),
            });
        };
        if pattern.len() < 2 {
            return Err(ShapeError::TooFewPoints {
                required: 2,
                actual: pattern.len(),
            });
        }

        let max_distance = self.settings.max_distance_meters;
        let pattern_poly = Poly::from_points(pattern.to_vec(), None);

        let candidates = self.graph.find_matching_polys(&first, &last, max_distance);
        if !candidates.is_empty() {
            debug!(
                candidates = candidates.len(),
                "Scoring polylines matched by endpoints"
            );
            let oriented: Vec<Poly> = candidates
                .into_iter()
                .map(|poly| orient(poly, &first, &last))
                .collect();
            let refs: Vec<&Poly> = oriented.iter().collect();
            return Ok(
                get_matching_shape(&pattern_poly, &refs, max_distance).map(|(score, poly)| {
                    ShapeMatch {
                        poly: poly.clone(),
                        score,
                        source: MatchSource::Endpoints,
                    }
                }),
            );
        }

        let path = match self.settings.path_search {
            PathSearch::Nearest => self.graph.find_shortest_multi_point_path(
                pattern,
                max_distance,
                self.settings.verbosity,
            )?,
            PathSearch::Beam { keep_best_n } => {
                self.graph
                    .find_best_multi_point_path(pattern, max_distance, keep_best_n)?
            }
        };
        let Some(path) = path else {
            warn!(
                stops = pattern.len(),
                max_distance, "No path through the shape graph"
            );
            return Ok(None);
        };

        let score = get_matching_shape(&pattern_poly, &[&path], max_distance).map(|(score, _)| score);
        Ok(score.map(|score| ShapeMatch {
            poly: path,
            score,
            source: MatchSource::GraphPath,
        }))
    }

    pub fn match_pattern_lat_lngs(
        &self,
        stops: &[LatLng],
    ) -> Result<Option<ShapeMatch>, ShapeError> {
        let pattern: Vec<SpherePoint> = stops.iter().copied().map(SpherePoint::from).collect();
        self.match_pattern(&pattern)
    }

    /// Matches independent patterns; each result lines up with its pattern.
    pub fn match_patterns(
        &self,
        patterns: &[Vec<SpherePoint>],
    ) -> Vec<Result<Option<ShapeMatch>, ShapeError>> {
        #[cfg(feature = "parallel")]
        {
            patterns
                .par_iter()
                .map(|pattern| self.match_pattern(pattern))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            patterns
                .iter()
                .map(|pattern| self.match_pattern(pattern))
                .collect()
        }
    }
}

/// Copy of `poly` running from the end nearest `first` to the end nearest
/// `last`.
fn orient(poly: &Poly, first: &SpherePoint, last: &SpherePoint) -> Poly {
    let (Some(start), Some(end)) = (poly.first(), poly.last()) else {
        return poly.clone();
    };
    let forward = first.distance_meters(&start) + last.distance_meters(&end);
    let backward = first.distance_meters(&end) + last.distance_meters(&start);
    if backward < forward {
        poly.reversed()
    } else {
        poly.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f64 = 0.0025;

    fn corridor_point(k: usize) -> SpherePoint {
        SpherePoint::from_lat_lng(40.0, -74.0 + k as f64 * STEP)
    }

    fn corridor(name: &str, from: usize, to: usize) -> Poly {
        Poly::from_points((from..=to).map(corridor_point).collect(), Some(name))
    }

    fn stops(ks: &[usize]) -> Vec<SpherePoint> {
        ks.iter()
            .map(|&k| SpherePoint::from_lat_lng(40.0001, -74.0 + k as f64 * STEP))
            .collect()
    }

    fn segmented_graph() -> PolyGraph {
        let mut graph = PolyGraph::new();
        graph.add_poly(corridor("a", 0, 4)).unwrap();
        graph.add_poly(corridor("b", 4, 8)).unwrap();
        graph.add_poly(corridor("c", 8, 12)).unwrap();
        graph
    }

    #[test]
    fn get_matching_shape_prefers_lowest_score() {
        let pattern = Poly::from_points(stops(&[0, 4]), None);
        let near = corridor("near", 0, 4);
        let shifted = Poly::from_lat_lngs(
            Some("shifted"),
            (0..=4).map(|k| (40.0005, -74.0 + k as f64 * STEP)),
        );

        let (score, best) = get_matching_shape(&pattern, &[&shifted, &near], 150.0).unwrap();
        assert_eq!(best.name(), Some("near"));
        assert!((score - 11.1).abs() < 0.5, "got {score}");

        assert!(get_matching_shape(&pattern, &[&near], 5.0).is_none());
        assert!(get_matching_shape(&pattern, &[], 150.0).is_none());
    }

    #[test]
    fn matches_whole_shape_by_endpoints() {
        let mut graph = segmented_graph();
        graph.add_poly(corridor("whole", 0, 12)).unwrap();
        let matcher = ShapeMatcher::new(&graph, MatchSettings::default());

        let result = matcher.match_pattern(&stops(&[0, 4, 8, 12])).unwrap().unwrap();
        assert_eq!(result.source, MatchSource::Endpoints);
        assert_eq!(result.poly.name(), Some("whole"));
        assert!(result.score < 12.0);
    }

    #[test]
    fn orients_reverse_endpoint_matches() {
        let mut graph = PolyGraph::new();
        graph.add_poly(corridor("whole", 0, 12)).unwrap();
        let matcher = ShapeMatcher::new(&graph, MatchSettings::default());

        let result = matcher.match_pattern(&stops(&[12, 6, 0])).unwrap().unwrap();
        assert_eq!(result.source, MatchSource::Endpoints);
        assert_eq!(result.poly.first(), Some(corridor_point(12)));
        assert!(result.score < 12.0);
    }

    #[test]
    fn falls_back_to_graph_path() {
        let graph = segmented_graph();
        let matcher = ShapeMatcher::new(&graph, MatchSettings::default());

        let result = matcher.match_pattern(&stops(&[0, 4, 8, 12])).unwrap().unwrap();
        assert_eq!(result.source, MatchSource::GraphPath);
        assert_eq!(result.poly.len(), 13);
        assert_eq!(result.poly.name(), Some("a;b;c"));
        assert_eq!(result.poly.first(), Some(corridor_point(0)));
        assert_eq!(result.poly.last(), Some(corridor_point(12)));
    }

    #[test]
    fn beam_path_search() {
        let graph = segmented_graph();
        let settings = MatchSettings {
            path_search: PathSearch::Beam { keep_best_n: 3 },
            ..MatchSettings::default()
        };
        let matcher = ShapeMatcher::new(&graph, settings);

        let result = matcher.match_pattern(&stops(&[12, 8, 0])).unwrap().unwrap();
        assert_eq!(result.source, MatchSource::GraphPath);
        assert_eq!(result.poly.first(), Some(corridor_point(12)));
        assert_eq!(result.poly.len(), 13);
    }

    #[test]
    fn unmatched_pattern_is_none() {
        let graph = segmented_graph();
        let matcher = ShapeMatcher::new(&graph, MatchSettings::default());
        let far = vec![
            SpherePoint::from_lat_lng(41.0, -74.0),
            SpherePoint::from_lat_lng(41.0, -73.97),
        ];
        assert_eq!(matcher.match_pattern(&far).unwrap(), None);
    }

    #[test]
    fn short_patterns_are_rejected() {
        let graph = segmented_graph();
        let matcher = ShapeMatcher::new(&graph, MatchSettings::default());
        assert!(matcher.match_pattern(&stops(&[0])).is_err());
        assert!(matcher.match_pattern(&[]).is_err());
    }

    #[test]
    fn lat_lng_patterns_and_batches() {
        let graph = segmented_graph();
        let matcher = ShapeMatcher::new(&graph, MatchSettings::default());

        let result = matcher
            .match_pattern_lat_lngs(&[LatLng::new(40.0001, -74.0), LatLng::new(40.0001, -73.99)])
            .unwrap()
            .unwrap();
        assert_eq!(result.poly.name(), Some("a"));

        let results = matcher.match_patterns(&[stops(&[0, 4]), stops(&[4, 12]), stops(&[0])]);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().unwrap().as_ref().map(|m| m.source),
            Some(MatchSource::Endpoints)
        );
        assert_eq!(
            results[1].as_ref().unwrap().as_ref().map(|m| m.source),
            Some(MatchSource::GraphPath)
        );
        assert!(results[2].is_err());
    }
}
