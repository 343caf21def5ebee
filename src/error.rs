//! Failure kinds reported while a session runs.
//!
//! None of these abort a session; they are delivered to
//! [`SessionEvents::on_error`](crate::session::SessionEvents::on_error) and
//! the session continues with whatever data arrived.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The payload never arrived.
    #[error("request '{request}' failed: {source}")]
    FetchFailure {
        request: String,
        #[source]
        source: anyhow::Error,
    },

    /// The payload arrived but matched none of the expected shapes.
    #[error("payload '{request}' could not be ingested: {reason}")]
    IngestFailure { request: String, reason: String },

    /// The newest-run probe returned nothing usable.
    #[error("could not determine the latest run: {0}")]
    LastRunUnavailable(String),

    /// Records inside the window come from different runs.
    #[error("session mixes runs {oldest} .. {newest}; not persisting")]
    MixedRunSession {
        oldest: DateTime<Utc>,
        newest: DateTime<Utc>,
    },
}

impl SessionError {
    /// Stable machine-readable kind, used by consumers to pick a message.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::FetchFailure { .. } => "REQUEST_FAILED",
            SessionError::IngestFailure { .. } => "PARSE_FAILED",
            SessionError::LastRunUnavailable(_) => "READ_LAST_RUN_FAILED",
            SessionError::MixedRunSession { .. } => "MIXED_RUN",
        }
    }
}

/// Error from a single payload parser.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct IngestError(pub String);

impl IngestError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let fetch = SessionError::FetchFailure {
            request: "tmpprs@85000".into(),
            source: anyhow::anyhow!("timeout"),
        };
        assert_eq!(fetch.kind(), "REQUEST_FAILED");
        assert!(fetch.to_string().contains("timeout"));

        let ingest = SessionError::IngestFailure {
            request: "TMP_500".into(),
            reason: "no table".into(),
        };
        assert_eq!(ingest.kind(), "PARSE_FAILED");
    }
}
