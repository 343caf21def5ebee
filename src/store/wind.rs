//! Wind speed, direction, sector and color from u/v components.

use serde::{Deserialize, Serialize};

use super::aggregate::AggregateStore;
use super::query::Window;
use crate::model::Level;

/// Component units are m/s; speeds are reported in km/h.
const MS_TO_KMH: f64 = 3.6;

const SECTORS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// Which variables carry the wind components, and the speed color scale.
#[derive(Debug, Clone, Deserialize)]
pub struct WindTable {
    /// Eastward component.
    pub u_variable: String,
    /// Northward component.
    pub v_variable: String,
    /// Ascending `(threshold km/h, color)` steps.
    pub colors: Vec<(f64, String)>,
}

impl Default for WindTable {
    fn default() -> Self {
        Self {
            u_variable: "ugrdprs".into(),
            v_variable: "vgrdprs".into(),
            colors: [
                (0.0, "#CCCCCC"),
                (10.0, "#6E79FA"),
                (20.0, "#1AFF00"),
                (30.0, "#FFE900"),
                (40.0, "#FF0000"),
                (50.0, "#CC0074"),
            ]
            .into_iter()
            .map(|(threshold, color)| (threshold, color.to_string()))
            .collect(),
        }
    }
}

impl WindTable {
    /// Color of the highest step whose threshold is not above `speed`.
    ///
    /// Speeds below the first threshold still get the first color.
    pub fn color_bucket(&self, speed: f64) -> &str {
        let mut chosen = match self.colors.first() {
            Some((_, color)) => color.as_str(),
            None => return "",
        };
        for (threshold, color) in &self.colors[1..] {
            if *threshold > speed {
                break;
            }
            chosen = color.as_str();
        }
        chosen
    }
}

/// One resolved wind sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindPoint {
    /// Chart timestamp (see [`Window::chart_time`]).
    pub time: i64,
    /// Meteorological "from" direction in degrees, `[0, 360)`.
    pub direction: f64,
    /// km/h, rounded.
    pub speed: i64,
    pub sector: &'static str,
    pub color: String,
}

/// Speed in km/h of the vector `(u, v)` given in m/s.
pub fn wind_speed(u: f64, v: f64) -> f64 {
    MS_TO_KMH * (u * u + v * v).sqrt()
}

/// Direction the wind blows from: `270 - atan2(v, u)` in degrees, normalised.
pub fn wind_direction(u: f64, v: f64) -> f64 {
    normalize_degrees(270.0 - v.atan2(u).to_degrees())
}

fn normalize_degrees(degrees: f64) -> f64 {
    let d = degrees.rem_euclid(360.0);
    if d >= 360.0 { 0.0 } else { d }
}

/// Eight-point compass sector; each sector spans 45° centred on its heading.
pub fn compass_sector(direction: f64) -> &'static str {
    let index = ((normalize_degrees(direction) + 22.5) / 45.0).floor() as usize;
    SECTORS[index % SECTORS.len()]
}

impl AggregateStore {
    /// Wind samples for every valid time where both components exist on
    /// `level` inside the window.
    pub fn get_wind_series(&self, level: Level, window: &Window, table: &WindTable) -> Vec<WindPoint> {
        let (Some(u_series), Some(v_series)) = (
            self.series(&table.u_variable, level),
            self.series(&table.v_variable, level),
        ) else {
            return Vec::new();
        };

        u_series
            .iter()
            .filter(|(_, u)| window.contains(u))
            .filter_map(|(time, u)| {
                let v = v_series.get(time).filter(|v| window.contains(v))?;
                let speed = wind_speed(u.current_value, v.current_value);
                let direction = wind_direction(u.current_value, v.current_value);
                Some(WindPoint {
                    time: window.chart_time(*time),
                    direction,
                    speed: speed.round() as i64,
                    sector: compass_sector(direction),
                    color: table.color_bucket(speed).to_string(),
                })
            })
            .collect()
    }
}
