#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shapelib_core::{Poly, PolyGraph};
use shapelib_model::SpherePoint;

#[derive(Debug, Arbitrary)]
struct FuzzData {
    // Grid coordinates keep shared endpoints exact.
    edges: Vec<Vec<(u8, u8)>>,
    waypoints: Vec<(u8, u8)>,
    max_distance: u16,
    keep_best_n: u8,
}

fn grid_point((row, column): (u8, u8)) -> SpherePoint {
    SpherePoint::from_lat_lng(f64::from(row % 16) * 0.001, f64::from(column % 16) * 0.001)
}

fuzz_target!(|data: FuzzData| {
    let mut graph = PolyGraph::new();
    for edge in data.edges.iter().take(64) {
        let poly = Poly::from_points(edge.iter().take(16).copied().map(grid_point).collect(), None);
        let _ = graph.add_poly(poly);
    }

    let waypoints: Vec<SpherePoint> = data.waypoints.iter().take(8).copied().map(grid_point).collect();
    let max_distance = f64::from(data.max_distance);

    if let Ok(Some(path)) = graph.find_shortest_multi_point_path(&waypoints, max_distance, 0) {
        assert!(path.len() >= 2);
    }
    let _ = graph.find_best_multi_point_path(&waypoints, max_distance, usize::from(data.keep_best_n));
});
