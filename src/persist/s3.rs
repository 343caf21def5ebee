use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::info;

use super::{Snapshot, SnapshotStore};

/// Snapshots as gzip JSON objects under `<prefix>/<location_key>.json.gz`.
pub struct S3SnapshotStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3SnapshotStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Builds a client from the environment's AWS configuration.
    pub async fn from_env(bucket: &str, prefix: &str) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, prefix)
    }

    fn key_for(&self, location_key: &str) -> String {
        if self.prefix.is_empty() {
            format!("{location_key}.json.gz")
        } else {
            format!("{}/{location_key}.json.gz", self.prefix)
        }
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn load(&self, location_key: &str) -> Result<Option<Snapshot>> {
        let key = self.key_for(location_key);
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(e.into());
            }
        };
        let bytes = resp.body.collect().await?.into_bytes();
        Ok(Some(Snapshot::decode(&bytes)?))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let key = self.key_for(&snapshot.location_key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(snapshot.encode()?))
            .content_type("application/json")
            .content_encoding("gzip")
            .send()
            .await?;
        info!(bucket = %self.bucket, key = %key, "Snapshot uploaded");
        Ok(())
    }
}
