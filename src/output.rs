//! Output formatting and persistence for chart series.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::model::Level;
use crate::store::Series;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// One chart timestamp of a series, flattened for CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    pub variable: String,
    pub level: u32,
    pub time: i64,
    pub value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

impl SeriesRow {
    fn empty(variable: &str, level: Level, time: i64) -> Self {
        Self {
            variable: variable.to_string(),
            level: level.0,
            time,
            value: None,
            min: None,
            max: None,
            mean: None,
        }
    }
}

/// Joins the value, range and mean series on their timestamps.
pub fn series_rows(variable: &str, level: Level, series: &Series) -> Vec<SeriesRow> {
    fn row<'a>(
        rows: &'a mut BTreeMap<i64, SeriesRow>,
        variable: &str,
        level: Level,
        time: i64,
    ) -> &'a mut SeriesRow {
        rows.entry(time)
            .or_insert_with(|| SeriesRow::empty(variable, level, time))
    }

    let mut rows = BTreeMap::new();
    for point in &series.values {
        row(&mut rows, variable, level, point.0).value = Some(point.1);
    }
    for point in &series.ranges {
        let r = row(&mut rows, variable, level, point.0);
        r.min = Some(point.1);
        r.max = Some(point.2);
    }
    for point in &series.means {
        row(&mut rows, variable, level, point.0).mean = Some(point.1);
    }
    rows.into_values().collect()
}

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty(value: &impl std::fmt::Debug) {
    debug!("{:#?}", value);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends one series as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_series(path: &str, variable: &str, level: Level, series: &Series) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, variable, "Appending CSV rows");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for row in series_rows(variable, level, series) {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}
