//! Session configuration.
//!
//! Stored as a JSON object on disk; every field is optional and falls back
//! to the GFS point-forecast profile:
//! ```json
//! {
//!   "latitude": 48.0,
//!   "longitude": 16.3,
//!   "requests": [
//!     { "param": "tmpprs", "level": 25, "load_history": true },
//!     { "param": "rhprs", "level": "all" }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;

use crate::climatology::round_to_resolution;
use crate::fetch::{LevelSelector, PayloadRequest, RequestSpec};
use crate::model::Level;
use crate::store::{DerivationRules, WindTable};

const POINT_API: &str = "https://api.planetos.com/v1/datasets/noaa_gfs_pgrb2_global_forecast_recompute_0.25degree/point";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Upstream grid spacing in degrees; request coordinates are rounded to it.
    pub grid_resolution: f64,
    pub run_interval_hours: i64,
    /// Hours between a run's reference time and its availability.
    pub publication_delay_hours: i64,
    /// Longest lead time shown for text-report and run-table series.
    pub horizon_hours: i64,
    /// Snapshots written by another version are ignored.
    pub version: String,
    pub url_template: String,
    /// Template for the newest-run probe; without one the run is computed
    /// from the clock.
    pub reference_time_template: Option<String>,
    /// Query parameter carrying the API key, if the upstream needs one.
    pub api_key_param: Option<String>,
    pub requests: Vec<RequestSpec>,
    pub derivation: DerivationRules,
    pub wind: WindTable,
    pub wind_level: Level,
    pub climatology_path: Option<String>,
    /// Maximum concurrent payload fetches.
    pub concurrency: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        use LevelSelector::{First, Index, Last};
        Self {
            latitude: 48.0,
            longitude: 16.3,
            grid_resolution: 0.25,
            run_interval_hours: 6,
            publication_delay_hours: 0,
            horizon_hours: 240,
            version: "20170526_1".into(),
            url_template: format!(
                "{POINT_API}?var={{param}}&z={{z}}&lat={{lat}}&lon={{lon}}&count={{count}}\
                 &reftime_start={{firstRun}}&reftime_end={{lastRun}}"
            ),
            reference_time_template: Some(format!(
                "{POINT_API}?var=reftime&z=first&lat={{lat}}&lon={{lon}}&count=1\
                 &context=reftime_time1_isobaric3_lat_lon"
            )),
            api_key_param: Some("apikey".into()),
            requests: vec![
                // 850 hPa, 500 hPa and 2 m temperature
                RequestSpec::new("tmpprs", Index(25)).with_history(),
                RequestSpec::new("tmpprs", Index(18)),
                RequestSpec::new("tmp_m", First).with_history(),
                // geopotential height at 500 and 1000 hPa
                RequestSpec::new("hgtprs", Index(18)),
                RequestSpec::new("hgtprs", Index(30)),
                RequestSpec::new("rhprs", LevelSelector::All),
                RequestSpec::new("apcpsfc_3_Hour_Accumulation", First),
                // 1000 hPa wind components
                RequestSpec::new("vgrdprs", Last),
                RequestSpec::new("ugrdprs", Last),
            ],
            derivation: DerivationRules::default(),
            wind: WindTable::default(),
            wind_level: Level(100000),
            climatology_path: None,
            concurrency: 5,
        }
    }
}

impl SessionConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{path}'"))?;
        serde_json::from_str(&content).with_context(|| format!("invalid config '{path}'"))
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn run_interval(&self) -> Duration {
        Duration::hours(self.run_interval_hours)
    }

    pub fn publication_delay(&self) -> Duration {
        Duration::hours(self.publication_delay_hours)
    }

    pub fn horizon(&self) -> Duration {
        Duration::hours(self.horizon_hours)
    }

    /// Location rounded to the upstream grid, as `(latitude, longitude)`.
    pub fn grid_location(&self) -> (f64, f64) {
        (
            round_to_resolution(self.latitude, self.grid_resolution),
            round_to_resolution(self.longitude, self.grid_resolution),
        )
    }

    /// Identifies cached sessions for the same grid location.
    pub fn location_key(&self) -> String {
        let (lat, lon) = self.grid_location();
        format!("{lat:.2}_{lon:.2}")
    }

    /// Every payload request for a session ending at `last_run`.
    pub fn payload_requests(&self, last_run: chrono::DateTime<chrono::Utc>) -> Vec<PayloadRequest> {
        self.requests
            .iter()
            .flat_map(|spec| PayloadRequest::expand(spec, last_run, &self.url_template))
            .collect()
    }
}
