//! Composite variables synthesized after all runs are merged.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

use super::aggregate::{AggregateStore, SeriesRecords};
use crate::model::{AggregateRecord, Level, SeriesKey};

pub const THICKNESS_VARIABLE: &str = "thickness-500-1000";
pub const MAX_RH_BAND_VARIABLE: &str = "max-relative-humidity-band";

/// Geopotential height difference between two pressure levels.
#[derive(Debug, Clone, Deserialize)]
pub struct ThicknessRule {
    pub variable: String,
    pub upper: Level,
    pub lower: Level,
    pub output: String,
}

/// Maximum of one variable over every level at or above `min_level`.
///
/// Levels are pressures, so "at or above" means the numerically larger,
/// lower-altitude surfaces.
#[derive(Debug, Clone, Deserialize)]
pub struct BandMaxRule {
    pub variable: String,
    pub min_level: Level,
    pub output: String,
    pub output_level: Level,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DerivationRules {
    pub thickness: Option<ThicknessRule>,
    pub band_max: Option<BandMaxRule>,
}

impl Default for DerivationRules {
    fn default() -> Self {
        Self {
            thickness: Some(ThicknessRule {
                variable: "hgtprs".into(),
                upper: Level(50000),
                lower: Level(100000),
                output: THICKNESS_VARIABLE.into(),
            }),
            band_max: Some(BandMaxRule {
                variable: "rhprs".into(),
                min_level: Level(50000),
                output: MAX_RH_BAND_VARIABLE.into(),
                output_level: Level(70000),
            }),
        }
    }
}

/// Records of one valid time, collected while sweeping.
#[derive(Default)]
struct Group<'a> {
    upper: Option<&'a AggregateRecord>,
    lower: Option<&'a AggregateRecord>,
    band_max: Option<&'a AggregateRecord>,
}

impl<'a> Group<'a> {
    fn collect(&mut self, record: &'a AggregateRecord, rules: &DerivationRules) {
        if let Some(rule) = &rules.thickness {
            if record.variable == rule.variable {
                if record.level == rule.upper {
                    self.upper = Some(record);
                } else if record.level == rule.lower {
                    self.lower = Some(record);
                }
            }
        }
        if let Some(rule) = &rules.band_max {
            if record.variable == rule.variable && record.level >= rule.min_level {
                let larger = self
                    .band_max
                    .is_none_or(|current| record.current_value > current.current_value);
                if larger {
                    self.band_max = Some(record);
                }
            }
        }
    }

    fn emit(
        &self,
        valid_time: DateTime<Utc>,
        rules: &DerivationRules,
        out: &mut BTreeMap<SeriesKey, SeriesRecords>,
    ) {
        if let (Some(rule), Some(upper), Some(lower)) = (&rules.thickness, self.upper, self.lower) {
            let key = SeriesKey::new(rule.output.clone(), rule.upper);
            let mean = match (upper.climatological_mean, lower.climatological_mean) {
                (Some(u), Some(l)) => Some(u - l),
                _ => None,
            };
            let record = AggregateRecord::derived(
                &key,
                valid_time,
                upper.latest_run_time,
                upper.current_value - lower.current_value,
                mean,
            );
            out.entry(key).or_default().insert(valid_time, record);
        }
        if let (Some(rule), Some(max)) = (&rules.band_max, self.band_max) {
            let key = SeriesKey::new(rule.output.clone(), rule.output_level);
            let record =
                AggregateRecord::derived(&key, valid_time, max.latest_run_time, max.current_value, None);
            out.entry(key).or_default().insert(valid_time, record);
        }
    }
}

/// Sweeps the merged records grouped by valid time and rebuilds the derived
/// table. Returns the number of derived records.
///
/// Derived records are recomputed from scratch on every call, so running
/// the pass twice yields the same table.
pub fn run_derivation(store: &mut AggregateStore, rules: &DerivationRules) -> usize {
    let mut records: Vec<&AggregateRecord> = store.merged_records().collect();
    records.sort_by_key(|r| r.valid_time);

    let mut derived: BTreeMap<SeriesKey, SeriesRecords> = BTreeMap::new();
    let mut group = Group::default();

    for (i, &record) in records.iter().enumerate() {
        group.collect(record, rules);

        let boundary = records
            .get(i + 1)
            .is_none_or(|next| next.valid_time != record.valid_time);
        if boundary {
            group.emit(record.valid_time, rules, &mut derived);
            group = Group::default();
        }
    }

    let count = derived.values().map(|series| series.len()).sum();
    store.replace_derived(derived);
    info!(derived = count, "Derivation pass complete");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Observation;
    use chrono::{Duration, TimeZone};

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 5, 26, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn obs(variable: &str, level: u32, valid: i64, value: f64) -> Observation {
        Observation {
            variable: variable.into(),
            level: Level(level),
            run_time: t(0),
            valid_time: t(valid),
            value: Some(value),
        }
    }

    #[test]
    fn test_thickness_is_upper_minus_lower() {
        let mut store = AggregateStore::default();
        store.merge(obs("hgtprs", 50000, 6, 5520.0));
        store.merge(obs("hgtprs", 100000, 6, 1380.0));
        store.merge(obs("tmpprs", 85000, 6, 270.0));

        assert_eq!(run_derivation(&mut store, &DerivationRules::default()), 1);
        let r = store.get(THICKNESS_VARIABLE, Level(50000), t(6)).unwrap();
        assert_eq!(r.current_value, 4140.0);
        assert_eq!(r.min_observed, 4140.0);
        assert_eq!(r.max_observed, 4140.0);
        assert_eq!(r.run_count, 1);
        assert_eq!(r.climatological_mean, None);
    }

    #[test]
    fn test_thickness_needs_both_levels_in_the_same_group() {
        let mut store = AggregateStore::default();
        store.merge(obs("hgtprs", 50000, 6, 5520.0));
        store.merge(obs("hgtprs", 100000, 12, 1380.0));

        assert_eq!(run_derivation(&mut store, &DerivationRules::default()), 0);
        assert!(store.derived_records().next().is_none());
    }

    #[test]
    fn test_band_max_only_counts_levels_in_band() {
        let mut store = AggregateStore::default();
        store.merge(obs("rhprs", 100000, 6, 60.0));
        store.merge(obs("rhprs", 70000, 6, 85.0));
        store.merge(obs("rhprs", 50000, 6, 70.0));
        store.merge(obs("rhprs", 30000, 6, 99.0));
        store.merge(obs("rhprs", 30000, 12, 99.0));

        run_derivation(&mut store, &DerivationRules::default());
        let r = store.get(MAX_RH_BAND_VARIABLE, Level(70000), t(6)).unwrap();
        assert_eq!(r.current_value, 85.0);
        assert!(store.get(MAX_RH_BAND_VARIABLE, Level(70000), t(12)).is_none());
    }

    #[test]
    fn test_derivation_twice_does_not_duplicate() {
        let mut store = AggregateStore::default();
        for valid in [6, 12, 18] {
            store.merge(obs("hgtprs", 50000, valid, 5500.0));
            store.merge(obs("hgtprs", 100000, valid, 100.0));
            store.merge(obs("rhprs", 85000, valid, 90.0));
        }

        let first = run_derivation(&mut store, &DerivationRules::default());
        let snapshot: Vec<_> = store.derived_records().cloned().collect();
        let second = run_derivation(&mut store, &DerivationRules::default());

        assert_eq!(first, 6);
        assert_eq!(first, second);
        assert_eq!(snapshot, store.derived_records().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn test_thickness_mean_when_both_means_present() {
        let mut store = AggregateStore::default();
        store.merge(obs("hgtprs", 50000, 6, 5520.0));
        store.merge(obs("hgtprs", 100000, 6, 1380.0));
        let mut records = store.to_records();
        records[0].climatological_mean = Some(5500.0);
        records[1].climatological_mean = Some(100.0);
        let mut store = AggregateStore::from_records(Default::default(), records);

        run_derivation(&mut store, &DerivationRules::default());
        let r = store.get(THICKNESS_VARIABLE, Level(50000), t(6)).unwrap();
        assert_eq!(r.climatological_mean, Some(5400.0));
    }
}
