//! Structured point listings: `{"entries": [{"axes": {...}, "data": {...}}]}`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{Payload, PayloadParser, json_number};
use crate::error::IngestError;
use crate::model::{Level, Observation, accept_value};
use crate::time::parse_upstream_time;

#[derive(Deserialize)]
struct Listing {
    entries: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    axes: Option<Axes>,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    classifiers: Option<Classifiers>,
}

#[derive(Deserialize)]
struct Axes {
    reftime: String,
    time: String,
    #[serde(default)]
    z: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Classifiers {
    reference_time: String,
}

fn decode(payload: &Payload) -> Result<Listing, IngestError> {
    serde_json::from_slice(&payload.body)
        .map_err(|e| IngestError::new(format!("not a structured listing: {e}")))
}

/// Parser for structured point listings.
///
/// Each entry yields one observation for the payload's variable; entries
/// without a vertical axis go to [`Level::SURFACE`].
pub struct StructuredParser;

impl PayloadParser for StructuredParser {
    fn parse(&self, payload: &Payload) -> Result<Vec<Observation>, IngestError> {
        let listing = decode(payload)?;
        let mut observations = Vec::with_capacity(listing.entries.len());

        for entry in listing.entries {
            let Some(axes) = entry.axes else {
                debug!(request = %payload.request_id, "Entry without axes skipped");
                continue;
            };
            let (run_time, valid_time) =
                match (parse_upstream_time(&axes.reftime), parse_upstream_time(&axes.time)) {
                    (Ok(run), Ok(valid)) => (run, valid),
                    _ => {
                        debug!(request = %payload.request_id, "Entry with bad timestamps skipped");
                        continue;
                    }
                };
            let level = axes
                .z
                .as_ref()
                .and_then(json_number)
                .map_or(Level::SURFACE, |z| Level(z.round() as u32));
            let value = entry
                .data
                .get(&payload.variable)
                .and_then(json_number)
                .and_then(accept_value);

            observations.push(Observation {
                variable: payload.variable.clone(),
                level,
                run_time,
                valid_time,
                value,
            });
        }

        Ok(observations)
    }
}

/// Reads the newest run's reference time from a reference-time probe response.
pub fn parse_reference_time(payload: &Payload) -> Result<DateTime<Utc>, IngestError> {
    let listing = decode(payload)?;
    let raw = listing
        .entries
        .first()
        .and_then(|e| e.classifiers.as_ref())
        .map(|c| c.reference_time.as_str())
        .ok_or_else(|| IngestError::new("reference time missing"))?;
    parse_upstream_time(raw).map_err(|e| IngestError::new(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::PayloadFormat;
    use bytes::Bytes;
    use chrono::TimeZone;

    fn payload(variable: &str, body: &str) -> Payload {
        Payload {
            request_id: format!("{variable}-test"),
            variable: variable.to_string(),
            format: PayloadFormat::Structured,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_parse_entries_with_levels() {
        let body = r#"{"entries": [
            {"axes": {"reftime": "2017-05-26T06:00:00", "time": "2017-05-26T12:00:00", "z": 85000.0},
             "data": {"tmpprs": 271.5}},
            {"axes": {"reftime": "2017-05-26T06:00:00Z", "time": "2017-05-26T18:00:00Z", "z": 50000},
             "data": {"tmpprs": "250.25"}}
        ]}"#;
        let obs = StructuredParser.parse(&payload("tmpprs", body)).unwrap();

        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].level, Level(85000));
        assert_eq!(obs[0].value, Some(271.5));
        assert_eq!(obs[0].run_time, Utc.with_ymd_and_hms(2017, 5, 26, 6, 0, 0).unwrap());
        assert_eq!(obs[1].level, Level(50000));
        assert_eq!(obs[1].value, Some(250.25));
        assert_eq!(obs[1].valid_time, Utc.with_ymd_and_hms(2017, 5, 26, 18, 0, 0).unwrap());
    }

    #[test]
    fn test_missing_level_uses_surface_and_missing_value_is_absent() {
        let body = r#"{"entries": [
            {"axes": {"reftime": "2017-05-26T06:00:00", "time": "2017-05-26T09:00:00"},
             "data": {"apcpsfc": null}},
            {"axes": {"reftime": "2017-05-26T06:00:00", "time": "2017-05-26T12:00:00"},
             "data": {}}
        ]}"#;
        let obs = StructuredParser.parse(&payload("apcpsfc", body)).unwrap();
        assert_eq!(obs.len(), 2);
        assert!(obs.iter().all(|o| o.level == Level::SURFACE && o.value.is_none()));
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(StructuredParser.parse(&payload("tmpprs", "[1, 2, 3]")).is_err());
        assert!(StructuredParser.parse(&payload("tmpprs", "<html>")).is_err());
    }

    #[test]
    fn test_bad_entry_timestamps_are_skipped() {
        let body = r#"{"entries": [
            {"axes": {"reftime": "soon", "time": "2017-05-26T09:00:00"}, "data": {"t": 1}},
            {"axes": {"reftime": "2017-05-26T06:00:00", "time": "2017-05-26T09:00:00"}, "data": {"t": 2}}
        ]}"#;
        let obs = StructuredParser.parse(&payload("t", body)).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].value, Some(2.0));
    }

    #[test]
    fn test_parse_reference_time() {
        let body = r#"{"entries": [{"classifiers": {"reference_time": "2017-05-26T12:00:00"}}]}"#;
        let run = parse_reference_time(&payload("reftime", body)).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2017, 5, 26, 12, 0, 0).unwrap());

        assert!(parse_reference_time(&payload("reftime", r#"{"entries": []}"#)).is_err());
    }
}
