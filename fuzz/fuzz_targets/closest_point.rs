#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shapelib_core::{closest_point_on_segment, Poly};
use shapelib_model::SpherePoint;

#[derive(Debug, Arbitrary)]
struct FuzzData {
    points: Vec<(f64, f64)>,
    target: (f64, f64),
}

fn usable((lat, lng): (f64, f64)) -> bool {
    lat.is_finite() && lng.is_finite() && lat.abs() <= 90.0 && lng.abs() <= 180.0
}

fuzz_target!(|data: FuzzData| {
    if !usable(data.target) {
        return;
    }
    let target = SpherePoint::from_lat_lng(data.target.0, data.target.1);
    let poly = Poly::from_lat_lngs(None, data.points.into_iter().filter(|p| usable(*p)));

    for pair in poly.points().windows(2) {
        if let Ok(closest) = closest_point_on_segment(&target, &pair[0], &pair[1]) {
            assert!((closest.norm() - 1.0).abs() < 1e-9);
        }
    }

    if let Ok((before, after)) = poly.cut_at_closest_point(&target) {
        assert!(!before.is_empty());
        assert!(!after.is_empty());
        assert_eq!(before.len() + after.len(), poly.len() + 1);
    }

    let _ = poly.greedy_poly_match_dist(&poly.reversed());
});
