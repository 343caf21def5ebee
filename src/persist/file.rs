use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::{Snapshot, SnapshotStore};

/// Snapshots as `<dir>/<location_key>.json.gz`.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, location_key: &str) -> PathBuf {
        self.dir.join(format!("{location_key}.json.gz"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, location_key: &str) -> Result<Option<Snapshot>> {
        let path = self.path_for(location_key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        let snapshot = Snapshot::decode(&bytes)
            .with_context(|| format!("corrupt snapshot {}", path.display()))?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&snapshot.location_key);
        tokio::fs::write(&path, snapshot.encode()?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), records = snapshot.records.len(), "Snapshot saved");
        Ok(())
    }
}
