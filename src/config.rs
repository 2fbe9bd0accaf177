use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactConfig {
    /// Douglas-Peucker tolerance in degrees.
    pub simplify_tolerance: f64,
    pub max_stop_time_gap_minutes: u32,
    /// Known bad shape points as `[latitude, longitude]`.
    pub invalid_shape_points: Vec<[f64; 2]>,
    pub route_types: RouteTypeVocabulary,
}

impl Default for CompactConfig {
    fn default() -> Self {
        CompactConfig {
            simplify_tolerance: 0.00002,
            max_stop_time_gap_minutes: 8 * 60,
            invalid_shape_points: vec![[58.432233, 20.142573]],
            route_types: RouteTypeVocabulary::default(),
        }
    }
}

impl CompactConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        let config: CompactConfig =
            serde_json::from_str(&text).with_context(|| format!("parsing config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.simplify_tolerance.is_finite() && self.simplify_tolerance >= 0.0,
            "simplify_tolerance must be a non-negative number, got {}",
            self.simplify_tolerance
        );
        ensure!(
            !self.route_types.modes.is_empty(),
            "route_types must name at least one mode"
        );
        Ok(())
    }
}

/// Maps numeric GTFS route types (including extended ones) to mode names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTypeVocabulary {
    modes: BTreeMap<String, Vec<i32>>,
}

impl Default for RouteTypeVocabulary {
    fn default() -> Self {
        // 109 is the suburban railway code used by HSL.
        let modes = [
            ("airplane", vec![1100]),
            ("bus", vec![3, 700, 704]),
            ("ferry", vec![4, 1000, 1200]),
            ("metro", vec![1, 401, 402]),
            ("other", vec![5, 6, 7, 200, 1300, 1400, 1500]),
            ("train", vec![2, 100, 109]),
            ("tram", vec![0, 900]),
        ];
        RouteTypeVocabulary {
            modes: modes
                .into_iter()
                .map(|(name, codes)| (name.to_string(), codes))
                .collect(),
        }
    }
}

impl RouteTypeVocabulary {
    /// Mode names in output order.
    pub fn mode_names(&self) -> Vec<String> {
        self.modes.keys().cloned().collect()
    }

    pub fn mode_of(&self, route_type: i32) -> Option<&str> {
        self.modes
            .iter()
            .find(|(_, codes)| codes.contains(&route_type))
            .map(|(name, _)| name.as_str())
    }
}
