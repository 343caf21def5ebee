//! Payload fetching: the HTTP clients, request rendering and the
//! [`Fetcher`] seam the session pulls payloads through.

mod client;
pub mod request;

pub use client::{BasicClient, HttpClient, UrlParam};
pub use request::{LevelSelector, PayloadRequest, RequestSpec};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tracing::debug;

use crate::ingest::PayloadFormat;

pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?)
}

/// Delivers the raw payload for one request. No retries.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &PayloadRequest) -> Result<Bytes>;
}

/// Fetches payloads over HTTP for one grid location.
pub struct HttpFetcher<C> {
    client: C,
    latitude: f64,
    longitude: f64,
}

impl<C: HttpClient> HttpFetcher<C> {
    /// `latitude`/`longitude` must already be rounded to the upstream grid.
    pub fn new(client: C, latitude: f64, longitude: f64) -> Self {
        Self {
            client,
            latitude,
            longitude,
        }
    }
}

#[async_trait]
impl<C: HttpClient> Fetcher for HttpFetcher<C> {
    #[tracing::instrument(skip(self, request), fields(request = %request.id))]
    async fn fetch(&self, request: &PayloadRequest) -> Result<Bytes> {
        let url = request.url(self.latitude, self.longitude);
        debug!(%url, "Fetching payload");
        fetch_bytes(&self.client, &url)
            .await
            .with_context(|| format!("GET {url}"))
    }
}

/// Reads payloads saved to a directory, one file per request id.
///
/// `tmpprs@25` is read from `tmpprs_25.json`; tabular payloads use `.html`.
pub struct FileFetcher {
    dir: PathBuf,
}

impl FileFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, request: &PayloadRequest) -> PathBuf {
        let stem: String = request
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let ext = match request.format {
            PayloadFormat::Tabular => "html",
            PayloadFormat::Structured | PayloadFormat::RunTable => "json",
        };
        self.dir.join(format!("{stem}.{ext}"))
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, request: &PayloadRequest) -> Result<Bytes> {
        let path = self.path_for(request);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_file_fetcher_paths() {
        let fetcher = FileFetcher::new("/data");
        let run = Utc.with_ymd_and_hms(2017, 5, 26, 12, 0, 0).unwrap();

        let spec = RequestSpec::new("tmpprs", LevelSelector::Index(25));
        let request = &PayloadRequest::expand(&spec, run, "")[0];
        assert_eq!(fetcher.path_for(request), PathBuf::from("/data/tmpprs_25.json"));

        let mut spec = RequestSpec::new("TMP_500", LevelSelector::First);
        spec.format = PayloadFormat::Tabular;
        spec.run_hours = vec![6];
        let request = &PayloadRequest::expand(&spec, run, "")[0];
        assert_eq!(fetcher.path_for(request), PathBuf::from("/data/TMP_500_first_06.html"));
    }

    #[tokio::test]
    async fn test_file_fetcher_missing_file_is_an_error() {
        let fetcher = FileFetcher::new(std::env::temp_dir().join("forecast_merge_missing_dir"));
        let request = PayloadRequest::reference_time_probe("", Utc::now());
        assert!(fetcher.fetch(&request).await.is_err());
    }
}
