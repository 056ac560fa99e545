use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::DuplicatePolicy;

pub const DEFAULT_MAX_DISTANCE_METERS: f64 = 150.0;
pub const DEFAULT_KEEP_BEST_N: usize = 10;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("max_distance_meters must be a non-negative finite number, got {0}")]
    InvalidMaxDistance(f64),
    #[error("keep_best_n must be at least 1")]
    EmptyBeam,
}

/// How a pattern is joined through the graph when no single polyline fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum PathSearch {
    /// Snap every stop to its nearest vertex.
    Nearest,
    /// Keep the best `keep_best_n` partial paths over all vertices in range.
    Beam {
        #[serde(default = "default_keep_best_n")]
        keep_best_n: usize,
    },
}

impl Default for PathSearch {
    fn default() -> Self {
        PathSearch::Nearest
    }
}

fn default_keep_best_n() -> usize {
    DEFAULT_KEEP_BEST_N
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    pub max_distance_meters: f64,
    pub path_search: PathSearch,
    pub verbosity: u8,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_distance_meters: DEFAULT_MAX_DISTANCE_METERS,
            path_search: PathSearch::default(),
            verbosity: 0,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl MatchSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: MatchSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.max_distance_meters.is_finite() || self.max_distance_meters < 0.0 {
            return Err(SettingsError::InvalidMaxDistance(self.max_distance_meters));
        }
        if let PathSearch::Beam { keep_best_n: 0 } = self.path_search {
            return Err(SettingsError::EmptyBeam);
        }
        Ok(())
    }
}
