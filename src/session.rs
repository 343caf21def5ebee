//! One fetch-and-merge cycle for one location.
//!
//! A [`Session`] resolves the newest run, fetches every configured payload
//! concurrently, folds the results into a fresh [`AggregateStore`] through a
//! single drain loop, runs the derivation pass and finally persists the
//! store if every record inside the window came from the same run.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{Instrument, debug, error, info, warn};

use crate::climatology::ClimatologyLookup;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::fetch::{Fetcher, PayloadRequest};
use crate::ingest::{Payload, ingest, parse_reference_time};
use crate::model::{Level, SessionBounds};
use crate::persist::{Snapshot, SnapshotStore};
use crate::store::derive::run_derivation;
use crate::store::{AggregateStore, ChartClock, Series, StoreContext, Window, WindPoint, WindTable};
use crate::time;

/// Lifecycle notifications, fired from the session's own task.
pub trait SessionEvents: Send + Sync {
    /// Progress: after each payload and once more with the run summary.
    fn on_loaded(&self, message: &str, detail: &str);

    /// Derivation finished; series can be queried.
    fn on_ready(&self);

    fn on_error(&self, error: &SessionError);
}

/// Reports lifecycle events as log lines.
pub struct TracingEvents;

impl SessionEvents for TracingEvents {
    fn on_loaded(&self, message: &str, detail: &str) {
        info!(detail, "{message}");
    }

    fn on_ready(&self) {
        info!("Session ready");
    }

    fn on_error(&self, error: &SessionError) {
        error!(kind = error.kind(), error = %error, "Session error");
    }
}

/// What became of one expected payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStatus {
    Pending,
    Merged { observations: usize },
    Failed { kind: &'static str },
}

pub struct Session {
    config: SessionConfig,
    fetcher: Arc<dyn Fetcher>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    climatology: Option<Arc<dyn ClimatologyLookup>>,
    events: Arc<dyn SessionEvents>,
    clock: ChartClock,
}

impl Session {
    pub fn new(config: SessionConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            fetcher,
            snapshots: None,
            climatology: None,
            events: Arc::new(TracingEvents),
            clock: ChartClock::Fixed(Utc.fix()),
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_climatology(mut self, climatology: Arc<dyn ClimatologyLookup>) -> Self {
        self.climatology = Some(climatology);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn SessionEvents>) -> Self {
        self.events = events;
        self
    }

    /// Fixed offset of the consumer's wall clock, applied to series timestamps.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.clock = ChartClock::Fixed(offset);
        self
    }

    /// Shifts series timestamps into the host's local zone, per timestamp.
    pub fn with_local_clock(mut self) -> Self {
        self.clock = ChartClock::Local;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs one session as of `now`.
    ///
    /// Failures of individual payloads are reported through
    /// [`SessionEvents::on_error`]; the outcome always carries whatever
    /// data arrived.
    #[tracing::instrument(skip(self), fields(location = %self.config.location_key()))]
    pub async fn run(&self, now: DateTime<Utc>) -> SessionOutcome {
        let last_run = self.resolve_last_run(now).await;
        let window_start = time::window_start(now, self.config.run_interval());
        let location_key = self.config.location_key();
        info!(%last_run, %window_start, "Session started");

        if let Some(snapshot) = self.cached_snapshot(last_run, &location_key).await {
            let store = AggregateStore::from_records(self.store_context(), snapshot.records);
            let bounds = store.bounds(window_start);
            info!(records = store.len(), "Session restored from snapshot");
            self.report_runs(&bounds);
            self.events.on_ready();
            return self.outcome(store, bounds, last_run, snapshot.horizon_limited, BTreeMap::new(), true);
        }

        let requests = self.config.payload_requests(last_run);
        let (mut store, horizon_limited, statuses) = self.fetch_and_merge(requests).await;

        let derived = run_derivation(&mut store, &self.config.derivation);
        let bounds = store.bounds(window_start);
        debug!(records = store.len(), derived, "Session finalized");
        self.report_runs(&bounds);
        self.events.on_ready();

        self.persist(&store, &bounds, last_run, &location_key, &horizon_limited)
            .await;

        self.outcome(store, bounds, last_run, horizon_limited, statuses, false)
    }

    /// Newest run from the reference-time probe, or from the clock when
    /// there is no probe or it fails.
    async fn resolve_last_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = self.config.run_interval();
        let fallback = time::current_run(now, interval, self.config.publication_delay());
        let Some(template) = &self.config.reference_time_template else {
            return fallback;
        };

        let probe = PayloadRequest::reference_time_probe(template, now);
        let probed = match self.fetcher.fetch(&probe).await {
            Ok(body) => {
                let payload = Payload {
                    request_id: probe.id.clone(),
                    variable: probe.variable.clone(),
                    format: probe.format,
                    body,
                };
                parse_reference_time(&payload).map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("{e:#}")),
        };

        match probed {
            Ok(reference) => time::snap_reference_time(reference, interval),
            Err(reason) => {
                self.events
                    .on_error(&SessionError::LastRunUnavailable(reason));
                warn!(%fallback, "Falling back to the computed run");
                fallback
            }
        }
    }

    async fn cached_snapshot(&self, last_run: DateTime<Utc>, location_key: &str) -> Option<Snapshot> {
        let store = self.snapshots.as_ref()?;
        match store.load(location_key).await {
            Ok(Some(snapshot)) if snapshot.matches(&self.config.version, last_run, location_key) => {
                Some(snapshot)
            }
            Ok(Some(snapshot)) => {
                debug!(version = %snapshot.version, last_run = %snapshot.last_run, "Snapshot is stale");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load snapshot");
                None
            }
        }
    }

    /// Climatology lookups round the raw location to their own resolution,
    /// not the upstream grid.
    fn store_context(&self) -> StoreContext {
        let context = StoreContext::new(self.config.longitude, self.config.latitude);
        match &self.climatology {
            Some(lookup) => context.with_climatology(lookup.clone()),
            None => context,
        }
    }

    /// Fetches every request concurrently and merges the results in arrival
    /// order. Returns once every expected request id is accounted for.
    async fn fetch_and_merge(
        &self,
        requests: Vec<PayloadRequest>,
    ) -> (AggregateStore, BTreeSet<String>, BTreeMap<String, PayloadStatus>) {
        let mut store = AggregateStore::new(self.store_context());
        let mut horizon_limited = BTreeSet::new();
        let mut statuses: BTreeMap<String, PayloadStatus> = requests
            .iter()
            .map(|r| (r.id.clone(), PayloadStatus::Pending))
            .collect();
        let expected = statuses.len();

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel(expected.max(1));

        for request in requests {
            let sem = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let tx = tx.clone();

            let payload_span = tracing::info_span!(
                "fetch_payload",
                request = %request.id,
            );

            tokio::spawn(
                async move {
                    let Ok(_permit) = sem.acquire().await else {
                        return;
                    };
                    let result = fetcher.fetch(&request).await;
                    let _ = tx.send((request, result)).await;
                }
                .instrument(payload_span),
            );
        }
        drop(tx);

        let mut done = 0;
        while let Some((request, result)) = rx.recv().await {
            done += 1;
            let status = match result {
                Ok(body) => {
                    let payload = Payload {
                        request_id: request.id.clone(),
                        variable: request.variable.clone(),
                        format: request.format,
                        body,
                    };
                    match ingest(&payload) {
                        Ok(observations) => {
                            if payload.format.limits_horizon() {
                                horizon_limited
                                    .extend(observations.iter().map(|o| o.variable.clone()));
                            }
                            let summary = store.merge_all(observations);
                            self.events.on_loaded(
                                &format!("Loaded {done}/{expected}"),
                                &format!("{}: {} merged, {} skipped", request.id, summary.merged(), summary.skipped),
                            );
                            PayloadStatus::Merged {
                                observations: summary.merged(),
                            }
                        }
                        Err(e) => self.fail(SessionError::IngestFailure {
                            request: request.id.clone(),
                            reason: e.to_string(),
                        }),
                    }
                }
                Err(e) => self.fail(SessionError::FetchFailure {
                    request: request.id.clone(),
                    source: e,
                }),
            };
            statuses.insert(request.id, status);
        }

        let pending: Vec<String> = statuses
            .iter()
            .filter(|(_, status)| **status == PayloadStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            let status = self.fail(SessionError::FetchFailure {
                request: id.clone(),
                source: anyhow::anyhow!("fetch task ended without a result"),
            });
            statuses.insert(id, status);
        }

        (store, horizon_limited, statuses)
    }

    fn fail(&self, error: SessionError) -> PayloadStatus {
        self.events.on_error(&error);
        PayloadStatus::Failed { kind: error.kind() }
    }

    fn report_runs(&self, bounds: &SessionBounds) {
        if let (Some(oldest), Some(newest)) = (bounds.oldest_run_seen, bounds.newest_run_seen) {
            self.events.on_loaded(
                "Forecast runs",
                &format!("{} - {}", oldest.format("%Y-%m-%d %HZ"), newest.format("%Y-%m-%d %HZ")),
            );
        }
    }

    #[tracing::instrument(skip_all, fields(location = location_key))]
    async fn persist(
        &self,
        store: &AggregateStore,
        bounds: &SessionBounds,
        last_run: DateTime<Utc>,
        location_key: &str,
        horizon_limited: &BTreeSet<String>,
    ) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        if !bounds.is_single_run() {
            match (bounds.oldest_run_seen, bounds.newest_run_seen) {
                (Some(oldest), Some(newest)) => {
                    self.events
                        .on_error(&SessionError::MixedRunSession { oldest, newest });
                }
                _ => info!("No records inside the window, snapshot skipped"),
            }
            return;
        }

        let snapshot = Snapshot {
            version: self.config.version.clone(),
            last_run,
            location_key: location_key.to_string(),
            records: store.to_records(),
            horizon_limited: horizon_limited.clone(),
        };
        match snapshots.save(&snapshot).await {
            Ok(()) => info!(records = snapshot.records.len(), "Snapshot written"),
            Err(e) => warn!(error = %e, "Failed to write snapshot"),
        }
    }

    fn outcome(
        &self,
        store: AggregateStore,
        bounds: SessionBounds,
        last_run: DateTime<Utc>,
        horizon_limited: BTreeSet<String>,
        statuses: BTreeMap<String, PayloadStatus>,
        from_snapshot: bool,
    ) -> SessionOutcome {
        SessionOutcome {
            store,
            bounds,
            last_run,
            from_snapshot,
            statuses,
            wind_level: self.config.wind_level,
            window: Window::new(bounds.window_start).with_clock(self.clock),
            horizon: self.config.horizon(),
            horizon_limited,
            wind: self.config.wind.clone(),
        }
    }
}

/// The finished, read-only result of a session.
pub struct SessionOutcome {
    pub store: AggregateStore,
    pub bounds: SessionBounds,
    pub last_run: DateTime<Utc>,
    /// Restored from a snapshot instead of fetched.
    pub from_snapshot: bool,
    /// Per request id; empty when restored from a snapshot.
    pub statuses: BTreeMap<String, PayloadStatus>,
    /// Level the wind components are requested on.
    pub wind_level: Level,
    window: Window,
    horizon: chrono::Duration,
    horizon_limited: BTreeSet<String>,
    wind: WindTable,
}

impl SessionOutcome {
    /// Query window for one variable, cut at the horizon where it applies.
    pub fn window_for(&self, variable: &str) -> Window {
        if self.horizon_limited.contains(variable) {
            self.window.with_horizon(self.horizon)
        } else {
            self.window
        }
    }

    pub fn series<F>(&self, variable: &str, level: Level, transform: F) -> Series
    where
        F: Fn(f64) -> f64,
    {
        self.store
            .get_series(variable, level, &self.window_for(variable), transform)
    }

    pub fn wind_series(&self, level: Level) -> Vec<WindPoint> {
        let window = self.window_for(&self.wind.u_variable);
        self.store.get_wind_series(level, &window, &self.wind)
    }

    pub fn is_single_run(&self) -> bool {
        self.bounds.is_single_run()
    }
}
