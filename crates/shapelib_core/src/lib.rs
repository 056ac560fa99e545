//! Polyline matching and polyline-graph path search for transit shapes.
//!
//! Stop patterns are matched against stored shapes by their endpoints first;
//! when no single shape spans a pattern, a path is assembled through the
//! graph of shape segments.

pub mod collection;
pub mod diagnostics;
pub mod graph;
pub mod matcher;
pub mod poly;
pub mod settings;

pub use collection::{DuplicatePolicy, PolyCollection, PolyId};
pub use diagnostics::{NoOpObserver, PathSearchObserver, TracingObserver};
pub use graph::{CameFrom, PathStep, PolyGraph, VertexId};
pub use matcher::{get_matching_shape, MatchSource, ShapeMatch, ShapeMatcher};
pub use poly::{closest_point_on_segment, Poly};
pub use settings::{MatchSettings, PathSearch, SettingsError};
pub use shapelib_model::{LatLng, ShapeError, ShapeVertex, SpherePoint, EARTH_RADIUS_METERS};
