//! Text reports with an embedded ensemble table.
//!
//! The table sits between `<table class='gefs'>` and `</table>`. Each row
//! starts with a `YYYY-M-D HHZ` cell and ends with the deterministic run's
//! value. The header row must read `Date` .. `GFS`; otherwise the table has
//! a different layout and nothing is taken from it.

use chrono::{DateTime, TimeZone, Utc};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{Payload, PayloadParser};
use crate::error::IngestError;
use crate::model::{Level, Observation, parse_value};

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<table class='gefs'>(.*?)</table>").expect("table pattern")
});

static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<tr><td.*?>(Date|(\d+)-(\d+)-(\d+) (\d+)Z)</td>.*?<td.*?>([0-9\-\+\.]+|GFS)(</font>)?</td></tr>",
    )
    .expect("row pattern")
});

const HEADER_DATE: &str = "Date";
const HEADER_MODEL: &str = "GFS";

/// Parser for tabular text reports.
///
/// Rows carry no run time; the first data row's valid time is the run.
pub struct TabularParser;

fn row_time(caps: &Captures<'_>) -> Option<DateTime<Utc>> {
    let field = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
    let year = caps.get(2)?.as_str().parse::<i32>().ok()?;
    Utc.with_ymd_and_hms(year, field(3)?, field(4)?, field(5)?, 0, 0)
        .single()
}

impl PayloadParser for TabularParser {
    fn parse(&self, payload: &Payload) -> Result<Vec<Observation>, IngestError> {
        let text = payload.text()?;
        let table = TABLE_RE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| IngestError::new("report contains no forecast table"))?
            .as_str();

        let mut header_ok = false;
        let mut run_time: Option<DateTime<Utc>> = None;
        let mut observations = Vec::new();

        for caps in ROW_RE.captures_iter(table) {
            let first = caps.get(1).map_or("", |m| m.as_str());
            let last = caps.get(6).map_or("", |m| m.as_str());

            if first == HEADER_DATE {
                header_ok = last == HEADER_MODEL;
                continue;
            }
            if !header_ok {
                continue;
            }
            let Some(valid_time) = row_time(&caps) else {
                debug!(request = %payload.request_id, row = first, "Row with invalid date skipped");
                continue;
            };
            let run = *run_time.get_or_insert(valid_time);
            observations.push(Observation {
                variable: payload.variable.clone(),
                level: Level::SURFACE,
                run_time: run,
                valid_time,
                value: parse_value(last),
            });
        }

        if !header_ok {
            warn!(request = %payload.request_id, "Table header does not match the expected layout; rows ignored");
        }
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::PayloadFormat;
    use bytes::Bytes;

    fn payload(body: &str) -> Payload {
        Payload {
            request_id: "TMP_500-run0".into(),
            variable: "TMP_500".into(),
            format: PayloadFormat::Tabular,
            body: Bytes::from(body.to_string()),
        }
    }

    const REPORT: &str = "<html><body><p>intro</p>
<table class='gefs'>
<tr><td class='h'>Date</td><td>P01</td><td>P02</td><td class='h'>GFS</td></tr>
<tr><td>2017-5-26 6Z</td><td>-12.1</td><td>-11.8</td><td><font color='red'>-12.5</font></td></tr>
<tr><td>2017-5-26 12Z</td><td>-12.0</td><td>-11.0</td><td>-11.5</td></tr>
<tr><td>2017-5-26 18Z</td><td>-12.0</td><td>-11.0</td><td>n/a</td></tr>
<tr><td>2017-5-27 0Z</td><td>-10.0</td><td>-9.0</td><td>-</td></tr>
</table></body></html>";

    #[test]
    fn test_parses_rows_after_matching_header() {
        let obs = TabularParser.parse(&payload(REPORT)).unwrap();
        let run = Utc.with_ymd_and_hms(2017, 5, 26, 6, 0, 0).unwrap();

        assert_eq!(obs.len(), 3);
        assert!(obs.iter().all(|o| o.run_time == run && o.level == Level::SURFACE));
        assert_eq!(obs[0].value, Some(-12.5));
        assert_eq!(obs[1].valid_time, Utc.with_ymd_and_hms(2017, 5, 26, 12, 0, 0).unwrap());
        assert_eq!(obs[1].value, Some(-11.5));
        assert_eq!(obs[2].valid_time, Utc.with_ymd_and_hms(2017, 5, 27, 0, 0, 0).unwrap());
        assert_eq!(obs[2].value, None);
    }

    #[test]
    fn test_wrong_header_rejects_all_rows() {
        let report = REPORT.replace(">GFS<", ">P03<");
        let obs = TabularParser.parse(&payload(&report)).unwrap();
        assert!(obs.is_empty());
    }

    #[test]
    fn test_missing_table_is_an_error() {
        assert!(TabularParser.parse(&payload("<html>maintenance</html>")).is_err());
    }
}
