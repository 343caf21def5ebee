//! Upstream payload parsers.
//!
//! Every upstream shape is a [`PayloadParser`] that turns one raw payload
//! into [`Observation`]s; the session does not care which shape produced
//! them.

pub mod run_table;
pub mod structured;
pub mod tabular;

use bytes::Bytes;
use serde::Deserialize;

use crate::error::IngestError;
use crate::model::Observation;

pub use run_table::RunTableParser;
pub use structured::{StructuredParser, parse_reference_time};
pub use tabular::TabularParser;

/// Shape of an upstream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// JSON listing of entries with reference time, valid time, level and data.
    Structured,
    /// Text report with an embedded fixed-layout table.
    Tabular,
    /// JSON array of per-run rows keyed by parameter name.
    RunTable,
}

impl PayloadFormat {
    pub fn parser(&self) -> Box<dyn PayloadParser> {
        match self {
            PayloadFormat::Structured => Box::new(StructuredParser),
            PayloadFormat::Tabular => Box::new(TabularParser),
            PayloadFormat::RunTable => Box::new(RunTableParser),
        }
    }

    /// Whether the forecast horizon cutoff applies to series from this shape.
    pub fn limits_horizon(&self) -> bool {
        !matches!(self, PayloadFormat::Structured)
    }
}

/// One raw upstream response.
#[derive(Debug, Clone)]
pub struct Payload {
    pub request_id: String,
    /// Variable the payload was requested for.
    pub variable: String,
    pub format: PayloadFormat,
    pub body: Bytes,
}

impl Payload {
    pub fn text(&self) -> Result<&str, IngestError> {
        std::str::from_utf8(&self.body)
            .map_err(|e| IngestError::new(format!("payload is not valid UTF-8: {e}")))
    }
}

pub trait PayloadParser: Send + Sync {
    /// Parses a whole payload. A payload missing its expected top-level
    /// structure is an error; individual bad rows are skipped.
    fn parse(&self, payload: &Payload) -> Result<Vec<Observation>, IngestError>;
}

/// Parses `payload` with the parser matching its format.
pub fn ingest(payload: &Payload) -> Result<Vec<Observation>, IngestError> {
    payload.format.parser().parse(payload)
}

/// Reads a JSON scalar that may be encoded as a number or a string.
pub(crate) fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
