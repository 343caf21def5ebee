//! Records shared by ingest, the aggregate store and the query layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vertical layer identifier, usually a pressure surface in Pa (85000 = 850 hPa).
///
/// Variables without a vertical dimension use [`Level::SURFACE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(pub u32);

impl Level {
    pub const SURFACE: Level = Level(0);

    pub fn is_surface(&self) -> bool {
        *self == Self::SURFACE
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_surface() {
            write!(f, "surface")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One series in the store: a variable on one level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub variable: String,
    pub level: Level,
}

impl SeriesKey {
    pub fn new(variable: impl Into<String>, level: Level) -> Self {
        Self {
            variable: variable.into(),
            level,
        }
    }
}

/// A single forecast value emitted by ingest.
///
/// `value` is `None` when the upstream value was missing, unparseable or a
/// "no data" sentinel; the store drops such observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub variable: String,
    pub level: Level,
    pub run_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Upstream "no data" marker. Excluded before any min/max folding.
pub const NO_DATA_SENTINEL: f64 = -999.0;

/// Parses an upstream value.
///
/// Empty strings, `null`, non-numeric text, non-finite numbers and the
/// [`NO_DATA_SENTINEL`] all map to `None`.
pub fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return None;
    }
    raw.parse::<f64>().ok().and_then(accept_value)
}

/// Filters a numeric upstream value through the same rules as [`parse_value`].
pub fn accept_value(value: f64) -> Option<f64> {
    if !value.is_finite() || value == NO_DATA_SENTINEL {
        None
    } else {
        Some(value)
    }
}

/// Whether a record was folded from observations or synthesized afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    #[default]
    Merged,
    Derived,
}

/// The aggregate of every run's forecast for one (variable, level, valid time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub variable: String,
    pub level: Level,
    pub valid_time: DateTime<Utc>,
    /// Value from the newest run seen so far.
    pub current_value: f64,
    pub latest_run_time: DateTime<Utc>,
    pub min_observed: f64,
    pub max_observed: f64,
    /// Number of merges applied, not the number of distinct runs.
    pub run_count: u32,
    pub climatological_mean: Option<f64>,
    #[serde(default)]
    pub origin: RecordOrigin,
}

impl AggregateRecord {
    /// Creates a record from its first observed value.
    pub fn first(
        key: &SeriesKey,
        valid_time: DateTime<Utc>,
        run_time: DateTime<Utc>,
        value: f64,
        climatological_mean: Option<f64>,
    ) -> Self {
        Self {
            variable: key.variable.clone(),
            level: key.level,
            valid_time,
            current_value: value,
            latest_run_time: run_time,
            min_observed: value,
            max_observed: value,
            run_count: 1,
            climatological_mean,
            origin: RecordOrigin::Merged,
        }
    }

    /// Creates a synthesized record whose bounds collapse onto its value.
    pub fn derived(
        key: &SeriesKey,
        valid_time: DateTime<Utc>,
        run_time: DateTime<Utc>,
        value: f64,
        climatological_mean: Option<f64>,
    ) -> Self {
        Self {
            origin: RecordOrigin::Derived,
            ..Self::first(key, valid_time, run_time, value, climatological_mean)
        }
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.variable.clone(), self.level)
    }

    /// Folds another run's value into the record.
    ///
    /// The displayed value follows the newest run; bounds and count are
    /// cumulative. On equal run times the earlier value is kept.
    pub fn fold(&mut self, run_time: DateTime<Utc>, value: f64) {
        if run_time > self.latest_run_time {
            self.current_value = value;
            self.latest_run_time = run_time;
        }
        self.min_observed = self.min_observed.min(value);
        self.max_observed = self.max_observed.max(value);
        self.run_count += 1;
    }
}

/// Run-consistency summary of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionBounds {
    pub newest_run_seen: Option<DateTime<Utc>>,
    pub oldest_run_seen: Option<DateTime<Utc>>,
    pub window_start: DateTime<Utc>,
}

impl SessionBounds {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            newest_run_seen: None,
            oldest_run_seen: None,
            window_start,
        }
    }

    /// Folds a record's run into the bounds if it lies inside the window.
    pub fn observe(&mut self, valid_time: DateTime<Utc>, run_time: DateTime<Utc>) {
        if valid_time < self.window_start {
            return;
        }
        self.newest_run_seen = Some(self.newest_run_seen.map_or(run_time, |t| t.max(run_time)));
        self.oldest_run_seen = Some(self.oldest_run_seen.map_or(run_time, |t| t.min(run_time)));
    }

    /// True when every record inside the window carries the same run.
    ///
    /// A session without any record in the window is not consistent either;
    /// there is nothing worth caching.
    pub fn is_single_run(&self) -> bool {
        matches!(
            (self.newest_run_seen, self.oldest_run_seen),
            (Some(newest), Some(oldest)) if newest == oldest
        )
    }
}
