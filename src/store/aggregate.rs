use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::climatology::{ClimatologyLookup, GridPoint};
use crate::model::{AggregateRecord, Level, Observation, RecordOrigin, SeriesKey, SessionBounds};
use crate::time::climatology_time;

/// Per-series records ordered by valid time.
pub type SeriesRecords = BTreeMap<DateTime<Utc>, AggregateRecord>;

/// Where the store sits and where its climatological means come from.
#[derive(Clone, Default)]
pub struct StoreContext {
    pub longitude: f64,
    pub latitude: f64,
    pub climatology: Option<Arc<dyn ClimatologyLookup>>,
}

impl StoreContext {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            climatology: None,
        }
    }

    pub fn with_climatology(mut self, lookup: Arc<dyn ClimatologyLookup>) -> Self {
        self.climatology = Some(lookup);
        self
    }

    fn mean_for(&self, key: &SeriesKey, valid_time: DateTime<Utc>) -> Option<f64> {
        let lookup = self.climatology.as_ref()?;
        let calendar_time = climatology_time(valid_time, lookup.reference_year())?;
        let point = GridPoint::snap(self.longitude, self.latitude, lookup.resolution());
        let mean = lookup.lookup(point, &key.variable, key.level, calendar_time);
        if mean.is_none() {
            trace!(variable = %key.variable, level = %key.level, %valid_time, "No climatological mean");
        }
        mean
    }
}

/// Result of folding one observation into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The observation carried no usable value and was dropped.
    Skipped,
    /// First observation for its key; a record was created.
    Created,
    /// Folded into an existing record.
    Folded,
}

/// Counters for a batch of merges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub created: usize,
    pub folded: usize,
    pub skipped: usize,
}

impl MergeSummary {
    pub fn merged(&self) -> usize {
        self.created + self.folded
    }

    fn count(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Skipped => self.skipped += 1,
            MergeOutcome::Created => self.created += 1,
            MergeOutcome::Folded => self.folded += 1,
        }
    }
}

/// One session's table of aggregate records.
///
/// Records are created on first observation and never removed. Merged and
/// derived records live in separate tables so the derivation pass can be
/// repeated without duplicating its output.
#[derive(Default)]
pub struct AggregateStore {
    context: StoreContext,
    merged: BTreeMap<SeriesKey, SeriesRecords>,
    derived: BTreeMap<SeriesKey, SeriesRecords>,
}

impl AggregateStore {
    pub fn new(context: StoreContext) -> Self {
        Self {
            context,
            merged: BTreeMap::new(),
            derived: BTreeMap::new(),
        }
    }

    /// Rebuilds a store from previously serialized records.
    pub fn from_records(context: StoreContext, records: Vec<AggregateRecord>) -> Self {
        let mut store = Self::new(context);
        for record in records {
            let table = match record.origin {
                RecordOrigin::Merged => &mut store.merged,
                RecordOrigin::Derived => &mut store.derived,
            };
            table
                .entry(record.key())
                .or_default()
                .insert(record.valid_time, record);
        }
        store
    }

    /// Folds one observation into its record.
    pub fn merge(&mut self, observation: Observation) -> MergeOutcome {
        let Some(value) = observation.value else {
            return MergeOutcome::Skipped;
        };

        let key = SeriesKey::new(observation.variable, observation.level);
        if let Some(record) = self
            .merged
            .get_mut(&key)
            .and_then(|series| series.get_mut(&observation.valid_time))
        {
            record.fold(observation.run_time, value);
            return MergeOutcome::Folded;
        }

        let mean = self.context.mean_for(&key, observation.valid_time);
        let record = AggregateRecord::first(
            &key,
            observation.valid_time,
            observation.run_time,
            value,
            mean,
        );
        self.merged
            .entry(key)
            .or_default()
            .insert(observation.valid_time, record);
        MergeOutcome::Created
    }

    /// Merges a batch of observations from one payload.
    pub fn merge_all<I>(&mut self, observations: I) -> MergeSummary
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut summary = MergeSummary::default();
        for observation in observations {
            summary.count(self.merge(observation));
        }
        debug!(
            created = summary.created,
            folded = summary.folded,
            skipped = summary.skipped,
            "Observations merged"
        );
        summary
    }

    /// Records of one series, merged or derived, ordered by valid time.
    pub fn series(&self, variable: &str, level: Level) -> Option<&SeriesRecords> {
        let key = SeriesKey::new(variable, level);
        self.merged.get(&key).or_else(|| self.derived.get(&key))
    }

    pub fn get(&self, variable: &str, level: Level, valid_time: DateTime<Utc>) -> Option<&AggregateRecord> {
        self.series(variable, level)?.get(&valid_time)
    }

    /// All merged records (no derived ones), in key then time order.
    pub fn merged_records(&self) -> impl Iterator<Item = &AggregateRecord> {
        self.merged.values().flat_map(|series| series.values())
    }

    pub fn derived_records(&self) -> impl Iterator<Item = &AggregateRecord> {
        self.derived.values().flat_map(|series| series.values())
    }

    pub fn records(&self) -> impl Iterator<Item = &AggregateRecord> {
        self.merged_records().chain(self.derived_records())
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty() && self.derived.is_empty()
    }

    pub fn context(&self) -> &StoreContext {
        &self.context
    }

    pub(crate) fn replace_derived(&mut self, derived: BTreeMap<SeriesKey, SeriesRecords>) {
        self.derived = derived;
    }

    /// Run-consistency of the merged records inside the window.
    pub fn bounds(&self, window_start: DateTime<Utc>) -> SessionBounds {
        let mut bounds = SessionBounds::new(window_start);
        for record in self.merged_records() {
            bounds.observe(record.valid_time, record.latest_run_time);
        }
        bounds
    }

    /// Arithmetic mean of the transformed current values of one series.
    pub fn mean_of<F>(&self, variable: &str, level: Level, transform: F) -> Option<f64>
    where
        F: Fn(f64) -> f64,
    {
        let series = self.series(variable, level)?;
        if series.is_empty() {
            return None;
        }
        let sum: f64 = series.values().map(|r| transform(r.current_value)).sum();
        Some(sum / series.len() as f64)
    }

    /// Clones every record for serialization.
    pub fn to_records(&self) -> Vec<AggregateRecord> {
        self.records().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climatology::ClimatologyTable;
    use chrono::{Duration, TimeZone};

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 5, 26, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn obs(run: i64, valid: i64, value: Option<f64>) -> Observation {
        Observation {
            variable: "tmpprs".into(),
            level: Level(85000),
            run_time: t(run),
            valid_time: t(valid),
            value,
        }
    }

    fn record(store: &AggregateStore) -> &AggregateRecord {
        store.get("tmpprs", Level(85000), t(24)).unwrap()
    }

    #[test]
    fn test_last_run_wins_regardless_of_arrival_order() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, 24, Some(1.0)));
        store.merge(obs(12, 24, Some(3.0)));
        store.merge(obs(6, 24, Some(2.0)));

        let r = record(&store);
        assert_eq!(r.current_value, 3.0);
        assert_eq!(r.latest_run_time, t(12));
    }

    #[test]
    fn test_run_count_equals_merge_count() {
        let mut store = AggregateStore::default();
        for (i, run) in [0, 0, 6, 12, -6].into_iter().enumerate() {
            store.merge(obs(run, 24, Some(i as f64)));
        }
        assert_eq!(record(&store).run_count, 5);
    }

    #[test]
    fn test_bounds_invariant_holds() {
        let mut store = AggregateStore::default();
        let values = [5.0, -3.0, 12.0, 0.5, 7.0];
        for (i, v) in values.into_iter().enumerate() {
            store.merge(obs([6, 18, 0, 12, 3][i], 24, Some(v)));
            for r in store.records() {
                assert!(r.min_observed <= r.current_value);
                assert!(r.current_value <= r.max_observed);
            }
        }
        let r = record(&store);
        assert_eq!(r.min_observed, -3.0);
        assert_eq!(r.max_observed, 12.0);
        assert_eq!(r.current_value, -3.0);
    }

    #[test]
    fn test_absent_value_is_skipped() {
        let mut store = AggregateStore::default();
        assert_eq!(store.merge(obs(0, 24, None)), MergeOutcome::Skipped);
        assert!(store.is_empty());
        assert_eq!(store.merge(obs(0, 24, Some(1.0))), MergeOutcome::Created);
        assert_eq!(store.merge(obs(6, 24, None)), MergeOutcome::Skipped);
        assert_eq!(record(&store).run_count, 1);
    }

    #[test]
    fn test_climatology_is_looked_up_once_on_creation() {
        let mut table = ClimatologyTable::new(1996, 1.0);
        let calendar = Utc.with_ymd_and_hms(1996, 5, 27, 0, 0, 0).unwrap();
        table.insert(GridPoint::snap(16.3, 48.2, 1.0), "tmpprs", Level(85000), calendar, 280.0);

        let context = StoreContext::new(16.3, 48.2).with_climatology(Arc::new(table));
        let mut store = AggregateStore::new(context);
        store.merge(obs(0, 24, Some(1.0)));
        store.merge(obs(6, 30, Some(1.0)));

        assert_eq!(record(&store).climatological_mean, Some(280.0));
        let miss = store.get("tmpprs", Level(85000), t(30)).unwrap();
        assert_eq!(miss.climatological_mean, None);
    }

    #[test]
    fn test_bounds_use_final_runs() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, 24, Some(1.0)));
        store.merge(obs(6, 24, Some(2.0)));
        store.merge(obs(6, 30, Some(2.0)));
        assert!(store.bounds(t(0)).is_single_run());

        store.merge(obs(0, 36, Some(2.0)));
        let bounds = store.bounds(t(0));
        assert!(!bounds.is_single_run());
        assert_eq!(bounds.oldest_run_seen, Some(t(0)));
        assert_eq!(bounds.newest_run_seen, Some(t(6)));
    }

    #[test]
    fn test_mean_of_series() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, 24, Some(274.15)));
        store.merge(obs(0, 30, Some(276.15)));
        let mean = store.mean_of("tmpprs", Level(85000), |v| v - 273.15).unwrap();
        assert!((mean - 2.0).abs() < 1e-9);
        assert_eq!(store.mean_of("rhprs", Level(85000), |v| v), None);
    }

    #[test]
    fn test_from_records_round_trip_keeps_origin() {
        let mut store = AggregateStore::default();
        store.merge(obs(0, 24, Some(1.0)));
        let key = SeriesKey::new("retop", Level(50000));
        let mut derived = BTreeMap::new();
        derived
            .entry(key.clone())
            .or_insert_with(SeriesRecords::new)
            .insert(t(24), AggregateRecord::derived(&key, t(24), t(0), 5.0, None));
        store.replace_derived(derived);

        let restored = AggregateStore::from_records(StoreContext::default(), store.to_records());
        assert_eq!(restored.merged_records().count(), 1);
        assert_eq!(restored.derived_records().count(), 1);
    }
}
