//! Snapshots of a finished session, so a later session for the same run and
//! location can skip fetching.

mod file;
mod s3;

pub use file::FileSnapshotStore;
pub use s3::S3SnapshotStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};

use crate::model::AggregateRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub last_run: DateTime<Utc>,
    pub location_key: String,
    pub records: Vec<AggregateRecord>,
    /// Variables whose series are cut at the forecast horizon.
    #[serde(default)]
    pub horizon_limited: BTreeSet<String>,
}

impl Snapshot {
    /// Whether the snapshot was produced for this version, run and location.
    pub fn matches(&self, version: &str, last_run: DateTime<Utc>, location_key: &str) -> bool {
        self.version == version && self.last_run == last_run && self.location_key == location_key
    }

    /// Gzip-compressed JSON.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Key-value store for snapshots, one per location.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing is stored for the location.
    async fn load(&self, location_key: &str) -> Result<Option<Snapshot>>;

    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}
