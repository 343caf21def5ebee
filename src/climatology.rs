//! Read-only long-period means keyed by location, variable, level and
//! calendar time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::model::Level;

/// A location on the climatology grid (whole multiples of its resolution).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GridPoint {
    /// Rounds a coordinate pair onto a grid with `resolution` degree spacing.
    pub fn snap(longitude: f64, latitude: f64, resolution: f64) -> Self {
        Self {
            longitude: round_to_resolution(longitude, resolution),
            latitude: round_to_resolution(latitude, resolution),
        }
    }
}

/// Rounds `value` to the nearest multiple of `resolution`.
pub fn round_to_resolution(value: f64, resolution: f64) -> f64 {
    if resolution <= 0.0 {
        return value;
    }
    (value / resolution).round() * resolution
}

/// Source of climatological means.
///
/// `calendar_time` is already mapped onto the lookup's reference year
/// (see [`crate::time::climatology_time`]).
pub trait ClimatologyLookup: Send + Sync {
    /// Year all calendar timestamps of this lookup refer to.
    fn reference_year(&self) -> i32;

    /// Grid spacing in degrees.
    fn resolution(&self) -> f64;

    fn lookup(
        &self,
        point: GridPoint,
        variable: &str,
        level: Level,
        calendar_time: DateTime<Utc>,
    ) -> Option<f64>;
}

/// In-memory climatology table, loaded from JSON.
///
/// ```json
/// {
///   "reference_year": 1996,
///   "resolution": 1.0,
///   "means": { "16": { "48": { "tmpprs": { "85000": { "836870400000": 271.3 } } } } }
/// }
/// ```
/// Longitude, then latitude (whole grid steps), then variable, level and
/// calendar timestamp in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ClimatologyTable {
    reference_year: i32,
    #[serde(default = "default_resolution")]
    resolution: f64,
    means: BTreeMap<i32, BTreeMap<i32, BTreeMap<String, BTreeMap<u32, BTreeMap<i64, f64>>>>>,
}

fn default_resolution() -> f64 {
    1.0
}

impl ClimatologyTable {
    pub fn new(reference_year: i32, resolution: f64) -> Self {
        Self {
            reference_year,
            resolution,
            means: BTreeMap::new(),
        }
    }

    /// Loads a table from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read climatology table '{path}'"))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("invalid climatology table")
    }

    /// Adds one mean. Coordinates are snapped to the table's resolution.
    pub fn insert(
        &mut self,
        point: GridPoint,
        variable: &str,
        level: Level,
        calendar_time: DateTime<Utc>,
        mean: f64,
    ) {
        let (lon, lat) = self.grid_index(point);
        self.means
            .entry(lon)
            .or_default()
            .entry(lat)
            .or_default()
            .entry(variable.to_string())
            .or_default()
            .entry(level.0)
            .or_default()
            .insert(calendar_time.timestamp_millis(), mean);
    }

    fn grid_index(&self, point: GridPoint) -> (i32, i32) {
        let step = if self.resolution > 0.0 { self.resolution } else { 1.0 };
        (
            (point.longitude / step).round() as i32,
            (point.latitude / step).round() as i32,
        )
    }
}

impl ClimatologyLookup for ClimatologyTable {
    fn reference_year(&self) -> i32 {
        self.reference_year
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }

    fn lookup(
        &self,
        point: GridPoint,
        variable: &str,
        level: Level,
        calendar_time: DateTime<Utc>,
    ) -> Option<f64> {
        let (lon, lat) = self.grid_index(point);
        self.means
            .get(&lon)?
            .get(&lat)?
            .get(variable)?
            .get(&level.0)?
            .get(&calendar_time.timestamp_millis())
            .copied()
    }
}
