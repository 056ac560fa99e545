use shapelib_model::SpherePoint;
use tracing::{debug, info};

/// Receives events while a multi-point path is assembled.
pub trait PathSearchObserver: Send + Sync {
    /// Called once per waypoint with the number of graph vertices within
    /// range and the vertex it snapped to, if any.
    fn on_waypoint(
        &self,
        index: usize,
        waypoint: &SpherePoint,
        candidates: usize,
        snapped: Option<&SpherePoint>,
    );

    /// Called for every joined segment between consecutive waypoints.
    fn on_segment(&self, index: usize, start: &SpherePoint, end: &SpherePoint, length: f64);

    /// Called when the search gives up.
    fn on_failure(&self, reason: &str);
}

/// A no-op observer
pub struct NoOpObserver;

impl PathSearchObserver for NoOpObserver {
    fn on_waypoint(&self, _: usize, _: &SpherePoint, _: usize, _: Option<&SpherePoint>) {}
    fn on_segment(&self, _: usize, _: &SpherePoint, _: &SpherePoint, _: f64) {}
    fn on_failure(&self, _reason: &str) {}
}

/// Emits `tracing` events; `verbosity` 0 is silent, 1 reports failures and
/// segments, 2 adds every waypoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver {
    pub verbosity: u8,
}

impl TracingObserver {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }
}

impl PathSearchObserver for TracingObserver {
    fn on_waypoint(
        &self,
        index: usize,
        waypoint: &SpherePoint,
        candidates: usize,
        snapped: Option<&SpherePoint>,
    ) {
        if self.verbosity < 2 {
            return;
        }
        let (lat, lng) = waypoint.to_lat_lng();
        match snapped {
            Some(vertex) => {
                let distance = waypoint.distance_meters(vertex);
                debug!(index, lat, lng, candidates, distance, "Waypoint snapped to vertex");
            }
            None => debug!(index, lat, lng, "No vertex in range of waypoint"),
        }
    }

    fn on_segment(&self, index: usize, start: &SpherePoint, end: &SpherePoint, length: f64) {
        if self.verbosity < 1 {
            return;
        }
        debug!(
            index,
            start = %start,
            end = %end,
            length,
            "Joined path segment"
        );
    }

    fn on_failure(&self, reason: &str) {
        if self.verbosity >= 1 {
            info!(reason, "Multi-point path search failed");
        }
    }
}
