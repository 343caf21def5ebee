//! Per-run JSON tables: an array of row lists where one fixed slot holds the
//! deterministic run and the next slot the 30-year means.
//!
//! Each row is an object of `param -> value` plus the valid time in unix
//! seconds under [`VALID_TIME_KEY`].

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::{Payload, PayloadParser, json_number};
use crate::error::IngestError;
use crate::model::{Level, Observation, accept_value};

pub const VALID_TIME_KEY: &str = "UNIX_TIMESTAMP(vt)";
pub const MAIN_RUN_SLOT: usize = 22;
pub const CLIMATE_SLOT: usize = 23;
pub const CLIMATE_SUFFIX: &str = "_30YR";

/// Parser for per-run JSON tables.
///
/// The first row's valid time is taken as the run time. Means from the
/// climate slot are stored as their own variables, suffixed `_30YR`.
pub struct RunTableParser;

fn valid_time(row: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    let seconds = json_number(row.get(VALID_TIME_KEY)?)?;
    Utc.timestamp_opt(seconds as i64, 0).single()
}

fn rows<'a>(
    slots: &'a [Value],
    index: usize,
) -> Result<Vec<&'a serde_json::Map<String, Value>>, IngestError> {
    slots
        .get(index)
        .and_then(Value::as_array)
        .ok_or_else(|| IngestError::new(format!("run table slot {index} missing")))
        .map(|rows| rows.iter().filter_map(Value::as_object).collect())
}

fn push_rows(
    rows: &[&serde_json::Map<String, Value>],
    run_time: DateTime<Utc>,
    suffix: &str,
    out: &mut Vec<Observation>,
) {
    for row in rows {
        let Some(valid_time) = valid_time(row) else {
            continue;
        };
        for (param, raw) in row.iter().filter(|(k, _)| k.as_str() != VALID_TIME_KEY) {
            out.push(Observation {
                variable: format!("{param}{suffix}"),
                level: Level::SURFACE,
                run_time,
                valid_time,
                value: json_number(raw).and_then(accept_value),
            });
        }
    }
}

impl PayloadParser for RunTableParser {
    fn parse(&self, payload: &Payload) -> Result<Vec<Observation>, IngestError> {
        let root: Value = serde_json::from_slice(&payload.body)
            .map_err(|e| IngestError::new(format!("not a run table: {e}")))?;
        let slots = root
            .as_array()
            .ok_or_else(|| IngestError::new("run table is not an array"))?;

        let main = rows(slots, MAIN_RUN_SLOT)?;
        let climate = rows(slots, CLIMATE_SLOT)?;
        let run_time = main
            .first()
            .and_then(|row| valid_time(row))
            .ok_or_else(|| IngestError::new("run table has no first valid time"))?;

        let mut observations = Vec::new();
        push_rows(&main, run_time, "", &mut observations);
        push_rows(&climate, run_time, CLIMATE_SUFFIX, &mut observations);
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::PayloadFormat;
    use bytes::Bytes;
    use serde_json::json;

    fn payload(root: Value) -> Payload {
        Payload {
            request_id: "wx-00".into(),
            variable: "*".into(),
            format: PayloadFormat::RunTable,
            body: Bytes::from(root.to_string()),
        }
    }

    fn table(main: Value, climate: Value) -> Value {
        let mut slots = vec![json!([]); MAIN_RUN_SLOT];
        slots.push(main);
        slots.push(climate);
        Value::Array(slots)
    }

    #[test]
    fn test_parses_main_run_and_climate_means() {
        let root = table(
            json!([
                {"UNIX_TIMESTAMP(vt)": "1495778400", "TMP_2": "12.5", "UGRD_10": 3.0},
                {"UNIX_TIMESTAMP(vt)": 1495789200, "TMP_2": null, "UGRD_10": "-1.5"}
            ]),
            json!([{"UNIX_TIMESTAMP(vt)": "1495778400", "TMP_2": "14.0"}]),
        );
        let obs = RunTableParser.parse(&payload(root)).unwrap();
        let run = Utc.timestamp_opt(1_495_778_400, 0).unwrap();

        assert_eq!(obs.len(), 5);
        assert!(obs.iter().all(|o| o.run_time == run));

        let tmp: Vec<_> = obs.iter().filter(|o| o.variable == "TMP_2").collect();
        assert_eq!(tmp.len(), 2);
        assert_eq!(tmp[0].value, Some(12.5));
        assert_eq!(tmp[1].value, None);

        let mean = obs.iter().find(|o| o.variable == "TMP_2_30YR").unwrap();
        assert_eq!(mean.value, Some(14.0));
    }

    #[test]
    fn test_missing_slots_are_an_error() {
        let root = json!([[], []]);
        assert!(RunTableParser.parse(&payload(root)).is_err());
        assert!(RunTableParser.parse(&payload(json!({"a": 1}))).is_err());
    }
}
