//! Read-only chart series over the aggregate store.

use chrono::{DateTime, Duration, FixedOffset, Local, Offset, Utc};
use serde::Serialize;

use super::aggregate::AggregateStore;
use crate::model::{AggregateRecord, Level};

/// Fewer runs than this are not enough to report a spread.
pub const MIN_RUNS_FOR_RANGE: u32 = 3;

/// `[time, value]` in chart form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValuePoint(pub i64, pub f64);

/// `[time, min, max]` in chart form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangePoint(pub i64, pub f64, pub f64);

/// Chart-ready series of one variable on one level.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    pub values: Vec<ValuePoint>,
    pub ranges: Vec<RangePoint>,
    pub means: Vec<ValuePoint>,
}

/// The consumer's wall clock, used to shift emitted timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartClock {
    Fixed(FixedOffset),
    /// The host's local zone, resolved per timestamp so DST changes inside a
    /// series are honoured.
    Local,
}

impl ChartClock {
    /// Seconds east of UTC at `time`.
    pub fn offset_at(&self, time: DateTime<Utc>) -> i32 {
        match self {
            ChartClock::Fixed(offset) => offset.local_minus_utc(),
            ChartClock::Local => time.with_timezone(&Local).offset().local_minus_utc(),
        }
    }
}

/// Which records a query returns and how their timestamps are presented.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: DateTime<Utc>,
    /// Maximum lead time (valid time minus run time) shown, if limited.
    pub horizon: Option<Duration>,
    /// Only shifts emitted timestamps.
    pub clock: ChartClock,
}

impl Window {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            horizon: None,
            clock: ChartClock::Fixed(Utc.fix()),
        }
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = Some(horizon);
        self
    }

    pub fn with_clock(mut self, clock: ChartClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn contains(&self, record: &AggregateRecord) -> bool {
        if record.valid_time < self.start {
            return false;
        }
        match self.horizon {
            Some(horizon) => record.valid_time - record.latest_run_time <= horizon,
            None => true,
        }
    }

    /// Milliseconds on the consumer's local wall-clock axis.
    pub fn chart_time(&self, time: DateTime<Utc>) -> i64 {
        time.timestamp_millis() + i64::from(self.clock.offset_at(time)) * 1000
    }
}

/// Identity transform for [`AggregateStore::get_series`].
pub fn identity(value: f64) -> f64 {
    value
}

pub fn kelvin_to_celsius(value: f64) -> f64 {
    value - 273.15
}

impl AggregateStore {
    /// Builds value, range and climatological-mean series for one variable.
    pub fn get_series<F>(&self, variable: &str, level: Level, window: &Window, transform: F) -> Series
    where
        F: Fn(f64) -> f64,
    {
        let mut series = Series::default();
        let Some(records) = self.series(variable, level) else {
            return series;
        };

        for record in records.values().filter(|r| window.contains(r)) {
            let time = window.chart_time(record.valid_time);
            series
                .values
                .push(ValuePoint(time, transform(record.current_value)));
            if let Some(mean) = record.climatological_mean {
                series.means.push(ValuePoint(time, transform(mean)));
            }
            if record.run_count >= MIN_RUNS_FOR_RANGE {
                series.ranges.push(RangePoint(
                    time,
                    transform(record.min_observed),
                    transform(record.max_observed),
                ));
            }
        }
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Observation;
    use chrono::TimeZone;

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 5, 26, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn obs(run: i64, valid: i64, value: f64) -> Observation {
        Observation {
            variable: "TMP_500".into(),
            level: Level::SURFACE,
            run_time: t(run),
            valid_time: t(valid),
            value: Some(value),
        }
    }

    #[test]
    fn test_values_filtered_by_window_start() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, -6, 1.0));
        store.merge(obs(0, 0, 2.0));
        store.merge(obs(0, 6, 3.0));

        let window = Window::new(t(0));
        let series = store.get_series("TMP_500", Level::SURFACE, &window, identity);
        let times: Vec<_> = series.values.iter().map(|p| p.0).collect();
        assert_eq!(times, vec![t(0).timestamp_millis(), t(6).timestamp_millis()]);
    }

    #[test]
    fn test_ranges_need_three_runs() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, 12, 1.0));
        store.merge(obs(6, 12, 4.0));
        store.merge(obs(0, 18, 1.0));
        let window = Window::new(t(0));

        let series = store.get_series("TMP_500", Level::SURFACE, &window, identity);
        assert!(series.ranges.is_empty());
        assert_eq!(series.values.len(), 2);

        store.merge(obs(-6, 12, -2.0));
        let series = store.get_series("TMP_500", Level::SURFACE, &window, identity);
        assert_eq!(
            series.ranges,
            vec![RangePoint(t(12).timestamp_millis(), -2.0, 4.0)]
        );
    }

    #[test]
    fn test_horizon_cutoff_is_inclusive() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, 240, 1.0));
        store.merge(obs(0, 241, 2.0));

        let window = Window::new(t(0)).with_horizon(Duration::hours(240));
        let series = store.get_series("TMP_500", Level::SURFACE, &window, identity);
        assert_eq!(series.values, vec![ValuePoint(t(240).timestamp_millis(), 1.0)]);

        let unlimited = store.get_series("TMP_500", Level::SURFACE, &Window::new(t(0)), identity);
        assert_eq!(unlimited.values.len(), 2);
    }

    #[test]
    fn test_transform_and_local_shift() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, 6, 273.15));
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let window = Window::new(t(0)).with_clock(ChartClock::Fixed(offset));

        let series = store.get_series("TMP_500", Level::SURFACE, &window, kelvin_to_celsius);
        assert_eq!(series.values.len(), 1);
        assert_eq!(series.values[0].0, t(8).timestamp_millis());
        assert!(series.values[0].1.abs() < 1e-9);
        assert!(series.means.is_empty());
    }

    #[test]
    fn test_local_clock_resolves_offset_per_timestamp() {
        let window = Window::new(t(0)).with_clock(ChartClock::Local);
        let winter = Utc.with_ymd_and_hms(2017, 1, 15, 12, 0, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2017, 7, 15, 12, 0, 0).unwrap();

        for time in [winter, summer] {
            let local = time.with_timezone(&Local).offset().local_minus_utc();
            assert_eq!(
                window.chart_time(time),
                time.timestamp_millis() + i64::from(local) * 1000
            );
        }
    }

    #[test]
    fn test_unknown_series_is_empty() {
        let store = AggregateStore::default();
        let series = store.get_series("nope", Level(1), &Window::new(t(0)), identity);
        assert_eq!(series, Series::default());
    }

    #[test]
    fn test_series_serializes_as_chart_arrays() {
        let series = Series {
            values: vec![ValuePoint(1000, 2.5)],
            ranges: vec![RangePoint(1000, 1.0, 3.0)],
            means: vec![],
        };
        let json = serde_json::to_string(&series).unwrap();
        assert_eq!(json, r#"{"values":[[1000,2.5]],"ranges":[[1000,1.0,3.0]],"means":[]}"#);
    }
}
