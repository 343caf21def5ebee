//! What to ask the upstream for, and how the request URL is rendered.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

use crate::ingest::PayloadFormat;

/// Vertical selection understood by the point API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelSelector {
    First,
    Last,
    All,
    /// Index into the provider's level axis (not a pressure).
    #[serde(untagged)]
    Index(u32),
}

impl fmt::Display for LevelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelSelector::First => write!(f, "first"),
            LevelSelector::Last => write!(f, "last"),
            LevelSelector::All => write!(f, "all"),
            LevelSelector::Index(i) => write!(f, "{i}"),
        }
    }
}

/// One configured upstream query.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    pub param: String,
    #[serde(default = "default_level")]
    pub level: LevelSelector,
    /// Also fetch the previous day's runs for min/max spreads.
    #[serde(default)]
    pub load_history: bool,
    #[serde(default = "default_format")]
    pub format: PayloadFormat,
    /// Overrides the session's URL template.
    #[serde(default)]
    pub url_template: Option<String>,
    /// Fetch one payload per listed run hour instead of one per request.
    #[serde(default)]
    pub run_hours: Vec<u32>,
}

fn default_level() -> LevelSelector {
    LevelSelector::First
}

fn default_format() -> PayloadFormat {
    PayloadFormat::Structured
}

impl RequestSpec {
    pub fn new(param: &str, level: LevelSelector) -> Self {
        Self {
            param: param.to_string(),
            level,
            load_history: false,
            format: PayloadFormat::Structured,
            url_template: None,
            run_hours: Vec::new(),
        }
    }

    pub fn with_history(mut self) -> Self {
        self.load_history = true;
        self
    }
}

/// A fully resolved request for one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadRequest {
    /// Unique within a session.
    pub id: String,
    pub variable: String,
    pub level: LevelSelector,
    pub first_run: DateTime<Utc>,
    pub last_run: DateTime<Utc>,
    pub count: u32,
    pub format: PayloadFormat,
    pub run_hour: Option<u32>,
    pub url_template: String,
}

/// Upper bound on entries per point request.
const MAX_ENTRIES: u32 = 1_000_000;

impl PayloadRequest {
    /// Expands a configured spec into payload requests ending at `last_run`.
    ///
    /// History requests start one day earlier plus one minute; the upstream
    /// filters with `>=`, so this yields the last four 6-hourly runs.
    pub fn expand(spec: &RequestSpec, last_run: DateTime<Utc>, default_template: &str) -> Vec<Self> {
        let first_run = if spec.load_history {
            last_run - Duration::days(1) + Duration::minutes(1)
        } else {
            last_run
        };
        let base = Self {
            id: format!("{}@{}", spec.param, spec.level),
            variable: spec.param.clone(),
            level: spec.level.clone(),
            first_run,
            last_run,
            count: MAX_ENTRIES,
            format: spec.format,
            run_hour: None,
            url_template: spec
                .url_template
                .clone()
                .unwrap_or_else(|| default_template.to_string()),
        };

        if spec.run_hours.is_empty() {
            return vec![base];
        }
        spec.run_hours
            .iter()
            .map(|hour| Self {
                id: format!("{}#{hour:02}", base.id),
                run_hour: Some(*hour),
                ..base.clone()
            })
            .collect()
    }

    /// The newest-run probe: one entry, reference times only.
    pub fn reference_time_probe(template: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: "reftime".into(),
            variable: "reftime".into(),
            level: LevelSelector::First,
            first_run: now,
            last_run: now,
            count: 1,
            format: PayloadFormat::Structured,
            run_hour: None,
            url_template: template.to_string(),
        }
    }

    /// Renders the URL template for a location already rounded to the grid.
    pub fn url(&self, latitude: f64, longitude: f64) -> String {
        let hour = self.run_hour.unwrap_or(0);
        self.url_template
            .replace("{param}", &self.variable)
            .replace("{z}", &self.level.to_string())
            .replace("{lat}", &latitude.to_string())
            .replace("{lon}", &longitude.to_string())
            .replace("{count}", &self.count.to_string())
            .replace("{firstRun}", &iso(self.first_run))
            .replace("{lastRun}", &iso(self.last_run))
            .replace("{runHour2}", &format!("{hour:02}"))
            .replace("{runHour}", &hour.to_string())
    }
}

fn iso(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TEMPLATE: &str =
        "https://x/point?var={param}&z={z}&lat={lat}&lon={lon}&count={count}&reftime_start={firstRun}&reftime_end={lastRun}";

    fn last_run() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 5, 26, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_url_rendering() {
        let spec = RequestSpec::new("tmpprs", LevelSelector::Index(25));
        let requests = PayloadRequest::expand(&spec, last_run(), TEMPLATE);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "tmpprs@25");
        assert_eq!(
            requests[0].url(48.0, 16.25),
            "https://x/point?var=tmpprs&z=25&lat=48&lon=16.25&count=1000000\
             &reftime_start=2017-05-26T12:00:00Z&reftime_end=2017-05-26T12:00:00Z"
        );
    }

    #[test]
    fn test_history_starts_one_day_back_plus_a_minute() {
        let spec = RequestSpec::new("tmp_m", LevelSelector::First).with_history();
        let request = &PayloadRequest::expand(&spec, last_run(), TEMPLATE)[0];
        assert_eq!(
            request.first_run,
            Utc.with_ymd_and_hms(2017, 5, 25, 12, 1, 0).unwrap()
        );
    }

    #[test]
    fn test_run_hours_expand_into_one_request_each() {
        let mut spec = RequestSpec::new("TMP_500", LevelSelector::First);
        spec.format = PayloadFormat::Tabular;
        spec.run_hours = vec![0, 6, 12, 18];
        spec.url_template = Some("https://t/table.php?run={runHour}&db={runHour2}".into());

        let requests = PayloadRequest::expand(&spec, last_run(), TEMPLATE);
        let ids: Vec<_> = requests.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["TMP_500@first#00", "TMP_500@first#06", "TMP_500@first#12", "TMP_500@first#18"]);
        assert_eq!(requests[1].url(48.0, 16.5), "https://t/table.php?run=6&db=06");
    }

    #[test]
    fn test_level_selector_from_json() {
        let specs: Vec<RequestSpec> = serde_json::from_str(
            r#"[{"param": "rhprs", "level": "all"}, {"param": "tmpprs", "level": 18}, {"param": "tmp_m"}]"#,
        )
        .unwrap();
        assert_eq!(specs[0].level, LevelSelector::All);
        assert_eq!(specs[1].level, LevelSelector::Index(18));
        assert_eq!(specs[2].level, LevelSelector::First);
        assert_eq!(specs[2].format, PayloadFormat::Structured);
    }
}
