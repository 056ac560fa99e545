use criterion::{criterion_group, criterion_main, Criterion};
use shapelib_core::{MatchSettings, Poly, PolyGraph, ShapeMatcher, SpherePoint};

// Zigzag segments laid end to end along a meridian, chained through shared
// endpoints, plus one whole-route shape per `whole_every` segments.
fn generate_network(segments: usize, points_per_segment: usize, whole_every: usize) -> PolyGraph {
    let mut graph = PolyGraph::new();
    let point = |i: usize| {
        let lat = (i as f64) * 0.001;
        let lng = if i % 2 == 0 { 0.0 } else { 0.001 };
        SpherePoint::from_lat_lng(lat, lng)
    };

    for segment in 0..segments {
        let start = segment * points_per_segment;
        let points = (start..=start + points_per_segment).map(point).collect();
        graph
            .add_poly(Poly::from_points(points, Some(format!("S{segment}").as_str())))
            .ok();

        if whole_every > 0 && segment % whole_every == whole_every - 1 {
            let first = (segment + 1 - whole_every) * points_per_segment;
            let points = (first..=start + points_per_segment).map(point).collect();
            graph
                .add_poly(Poly::from_points(points, Some(format!("W{segment}").as_str())))
                .ok();
        }
    }
    graph
}

fn stops_along(from: usize, to: usize, every: usize) -> Vec<SpherePoint> {
    (from..=to)
        .step_by(every)
        .map(|i| {
            let lng = if i % 2 == 0 { 0.0001 } else { 0.0009 };
            SpherePoint::from_lat_lng(i as f64 * 0.001, lng)
        })
        .collect()
}

fn benchmark_graph_build(c: &mut Criterion) {
    c.bench_function("graph_build_200_segments_50_pts", |b| {
        b.iter(|| generate_network(200, 50, 10))
    });
}

fn benchmark_matching(c: &mut Criterion) {
    let graph = generate_network(200, 50, 10);
    let matcher = ShapeMatcher::new(&graph, MatchSettings::default());

    let whole = stops_along(0, 500, 10);
    c.bench_function("match_pattern_endpoints", |b| {
        b.iter(|| matcher.match_pattern(&whole))
    });

    let spanning = stops_along(0, 2_000, 50);
    c.bench_function("match_pattern_graph_path", |b| {
        b.iter(|| matcher.match_pattern(&spanning))
    });

    let start = SpherePoint::from_lat_lng(0.0, 0.0);
    let end = SpherePoint::from_lat_lng(10_000.0 * 0.001, 0.0);
    c.bench_function("shortest_path_200_segments", |b| {
        b.iter(|| graph.shortest_path(&start, &end))
    });
}

criterion_group!(benches, benchmark_graph_build, benchmark_matching);
criterion_main!(benches);
