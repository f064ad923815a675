//! Timer-driven polling of one entity collection.
//!
//! A [`Poller`] owns everything about one source: its endpoint, interval,
//! backoff state, cycle counter and status channel. Each tick starts a
//! fetch in its own task so a slow response never delays the next tick;
//! every fetch carries the cycle number it was started with, and the store
//! discards a result whose cycle is older than what it already shows.
//!
//! Failures (transport, HTTP status, decode, validation) are logged and
//! counted; the store keeps the last good snapshot.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tacmap_core::entity::{decode_snapshot, EntityKind};
use tacmap_core::types::Timestamp;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::SnapshotSource;
use crate::backoff::{Backoff, BackoffConfig};
use crate::error::SyncError;
use crate::store::{ApplyOutcome, ReconciliationStore, Snapshot, Tracked};

/// Default cap on concurrently outstanding fetches per poller.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

// ---------------------------------------------------------------------------
// Config / status
// ---------------------------------------------------------------------------

/// Static configuration of one poller.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Full URL of the collection endpoint.
    pub endpoint: String,
    /// Delay between cycles while the source is healthy.
    pub interval: Duration,
    pub backoff: BackoffConfig,
    /// Ticks that would exceed this many outstanding fetches are skipped.
    pub max_in_flight: usize,
}

impl PollerConfig {
    pub fn new(endpoint: impl Into<String>, interval: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            interval,
            backoff: BackoffConfig::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }
}

/// Health counters for one poller, published on a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerStatus {
    pub kind: EntityKind,
    pub cycles_started: u64,
    /// Latest cycle the store accepted from this poller.
    pub last_applied_cycle: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Successful fetches whose cycle was already superseded.
    pub stale_discards: u64,
    /// Ticks skipped because too many fetches were outstanding.
    pub skipped_ticks: u64,
    pub last_error: Option<String>,
    pub last_success_at: Option<Timestamp>,
}

impl PollerStatus {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            cycles_started: 0,
            last_applied_cycle: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            stale_discards: 0,
            skipped_ticks: 0,
            last_error: None,
            last_success_at: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Polls one collection endpoint and proposes snapshots to the store.
pub struct Poller<E: Tracked> {
    config: PollerConfig,
    source: Arc<dyn SnapshotSource>,
    store: Arc<ReconciliationStore>,
    backoff: Backoff,
    /// Monotonic per-poller cycle counter; the last cycle started.
    cycle: u64,
    status: watch::Sender<PollerStatus>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Tracked> Poller<E> {
    pub fn new(
        config: PollerConfig,
        source: Arc<dyn SnapshotSource>,
        store: Arc<ReconciliationStore>,
    ) -> Self {
        let backoff = Backoff::new(config.interval, config.backoff.clone());
        // Continue numbering after whatever an earlier poller applied.
        let cycle = store.cycle::<E>();
        Self {
            config,
            source,
            store,
            backoff,
            cycle,
            status: watch::channel(PollerStatus::new(E::KIND)).0,
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> EntityKind {
        E::KIND
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Subscribe to this poller's status updates.
    pub fn status(&self) -> watch::Receiver<PollerStatus> {
        self.status.subscribe()
    }

    /// Run one complete cycle inline: fetch, decode, apply.
    ///
    /// The error (if any) has already been logged and counted when it is
    /// returned; the store is untouched on error.
    pub async fn poll_once(&mut self) -> Result<ApplyOutcome, SyncError> {
        let cycle = self.begin_cycle();
        let result = fetch_snapshot::<E>(self.source.as_ref(), &self.config.endpoint).await;
        self.complete(cycle, result)
    }

    /// Poll until `cancel` fires.
    ///
    /// The first fetch starts immediately. After cancellation, outstanding
    /// fetches are aborted and no result is applied.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            kind = %E::KIND,
            endpoint = %self.config.endpoint,
            interval_ms = self.config.interval.as_millis() as u64,
            "Poller started",
        );

        let max_in_flight = self.config.max_in_flight.max(1);
        let mut in_flight: JoinSet<(u64, Result<Vec<E>, SyncError>)> = JoinSet::new();
        let mut last_tick = Instant::now();
        let sleep = tokio::time::sleep_until(last_tick);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = in_flight.join_next() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match joined {
                        Ok((cycle, result)) => {
                            let _ = self.complete(cycle, result);
                        }
                        Err(e) => {
                            tracing::error!(kind = %E::KIND, error = %e, "Fetch task failed");
                        }
                    }
                    // Failures stretch the wait before the next tick.
                    sleep.as_mut().reset(last_tick + self.backoff.delay());
                }

                _ = &mut sleep => {
                    last_tick = Instant::now();
                    if in_flight.len() >= max_in_flight {
                        self.status.send_modify(|s| s.skipped_ticks += 1);
                        tracing::debug!(
                            kind = %E::KIND,
                            in_flight = in_flight.len(),
                            "Skipping tick, too many fetches outstanding",
                        );
                    } else {
                        let cycle = self.begin_cycle();
                        let source = Arc::clone(&self.source);
                        let endpoint = self.config.endpoint.clone();
                        in_flight.spawn(async move {
                            let result = fetch_snapshot::<E>(source.as_ref(), &endpoint).await;
                            (cycle, result)
                        });
                    }
                    sleep.as_mut().reset(last_tick + self.backoff.delay());
                }
            }
        }

        in_flight.abort_all();
        tracing::info!(kind = %E::KIND, "Poller stopped");
    }

    // ---- private helpers ----

    fn begin_cycle(&mut self) -> u64 {
        self.cycle += 1;
        let cycle = self.cycle;
        self.status.send_modify(|s| s.cycles_started += 1);
        tracing::debug!(kind = %E::KIND, cycle, "Poll cycle started");
        cycle
    }

    /// Fold a finished fetch into the store, backoff and status.
    fn complete(
        &mut self,
        cycle: u64,
        result: Result<Vec<E>, SyncError>,
    ) -> Result<ApplyOutcome, SyncError> {
        match result {
            Ok(entities) => {
                let count = entities.len();
                let outcome = self.store.apply(Snapshot::new(cycle, entities));
                self.backoff.record_success();

                self.status.send_modify(|s| {
                    s.successes += 1;
                    s.consecutive_failures = 0;
                    s.last_error = None;
                    s.last_success_at = Some(Utc::now());
                    match outcome {
                        ApplyOutcome::Stale { .. } => s.stale_discards += 1,
                        _ => s.last_applied_cycle = s.last_applied_cycle.max(cycle),
                    }
                });

                match outcome {
                    ApplyOutcome::Applied => {
                        tracing::debug!(kind = %E::KIND, cycle, count, "Snapshot applied");
                    }
                    ApplyOutcome::Unchanged => {
                        tracing::debug!(kind = %E::KIND, cycle, count, "Snapshot unchanged");
                    }
                    ApplyOutcome::Stale { current } => {
                        tracing::debug!(
                            kind = %E::KIND,
                            cycle,
                            current,
                            "Discarding out-of-order snapshot",
                        );
                    }
                }
                Ok(outcome)
            }
            Err(e) if cycle < self.status.borrow().last_applied_cycle => {
                // A newer cycle already succeeded; the failure is history.
                self.status.send_modify(|s| s.failures += 1);
                tracing::debug!(
                    kind = %E::KIND,
                    cycle,
                    error_kind = %e.kind(),
                    error = %e,
                    "Superseded poll failed",
                );
                Err(e)
            }
            Err(e) => {
                let consecutive = self.backoff.record_failure();
                let message = e.to_string();

                self.status.send_modify(|s| {
                    s.failures += 1;
                    s.consecutive_failures = consecutive;
                    s.last_error = Some(message);
                });

                tracing::warn!(
                    kind = %E::KIND,
                    cycle,
                    error_kind = %e.kind(),
                    error = %e,
                    consecutive_failures = consecutive,
                    "Poll failed, keeping last good snapshot",
                );
                Err(e)
            }
        }
    }
}

/// Fetch and decode one snapshot. Nothing partial escapes on failure.
async fn fetch_snapshot<E: Tracked>(
    source: &dyn SnapshotSource,
    endpoint: &str,
) -> Result<Vec<E>, SyncError> {
    let body = source.fetch(endpoint).await?;
    Ok(decode_snapshot::<E>(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tacmap_core::entity::PointOfInterest;

    /// Scripted source: each fetch pops the next (delay, response).
    struct ScriptedSource {
        script: Mutex<VecDeque<(Duration, Result<String, u16>)>>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<(Duration, Result<&str, u16>)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    steps
                        .into_iter()
                        .map(|(d, r)| (d, r.map(String::from)))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch(&self, _url: &str) -> Result<String, SyncError> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result.map_err(|status| SyncError::HttpStatus {
                        status,
                        body: String::new(),
                    })
                }
                None => std::future::pending().await,
            }
        }
    }

    const ONE: &str = r#"[{"crucialplaceid": 1, "x": 50.0, "y": 22.0, "comment": "a"}]"#;
    const TWO: &str = r#"[{"crucialplaceid": 2, "x": 51.0, "y": 23.0, "comment": "b"}]"#;

    fn ids(store: &ReconciliationStore) -> Vec<i64> {
        store
            .read::<PointOfInterest>()
            .iter()
            .map(|p| p.id)
            .collect()
    }

    fn poller(source: Arc<ScriptedSource>, store: Arc<ReconciliationStore>) -> Poller<PointOfInterest> {
        let config = PollerConfig::new("http://test/crucialplaces", Duration::from_secs(5))
            .with_backoff(BackoffConfig {
                jitter: 0.0,
                ..Default::default()
            });
        Poller::new(config, source, store)
    }

    #[tokio::test]
    async fn failures_keep_last_good_snapshot() {
        let store = Arc::new(ReconciliationStore::new());
        let source = ScriptedSource::new(vec![
            (Duration::ZERO, Ok(ONE)),
            (Duration::ZERO, Err(500)),
            (Duration::ZERO, Ok("not json")),
            (Duration::ZERO, Ok(r#"[{"crucialplaceid": 3, "x": 1.0}]"#)),
            (Duration::ZERO, Ok(TWO)),
        ]);
        let mut p = poller(source, Arc::clone(&store));

        assert_eq!(p.poll_once().await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(ids(&store), vec![1]);

        assert_matches!(p.poll_once().await, Err(SyncError::HttpStatus { status: 500, .. }));
        assert_matches!(p.poll_once().await, Err(SyncError::Decode(_)));
        assert_matches!(p.poll_once().await, Err(SyncError::Validation(_)));
        assert_eq!(ids(&store), vec![1]);
        assert_eq!(store.cycle::<PointOfInterest>(), 1);

        let status = p.status().borrow().clone();
        assert_eq!(status.consecutive_failures, 3);
        assert!(status.last_error.is_some());

        assert_eq!(p.poll_once().await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(ids(&store), vec![2]);
        assert_eq!(store.cycle::<PointOfInterest>(), 5);
        assert!(p.status().borrow().is_healthy());
    }

    #[tokio::test]
    async fn duplicate_ids_are_a_validation_failure() {
        let store = Arc::new(ReconciliationStore::new());
        let dup = r#"[{"crucialplaceid": 1, "x": 1.0, "y": 1.0},
                      {"crucialplaceid": 1, "x": 2.0, "y": 2.0}]"#;
        let source = ScriptedSource::new(vec![(Duration::ZERO, Ok(dup))]);
        let mut p = poller(source, Arc::clone(&store));

        let err = p.poll_once().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(store.read::<PointOfInterest>().is_empty());
    }

    #[tokio::test]
    async fn new_poller_continues_store_cycle_numbering() {
        let store = Arc::new(ReconciliationStore::new());
        let earlier = ScriptedSource::new(vec![
            (Duration::ZERO, Ok(ONE)),
            (Duration::ZERO, Ok(TWO)),
            (Duration::ZERO, Ok(ONE)),
        ]);
        let mut p = poller(earlier, Arc::clone(&store));
        for _ in 0..3 {
            p.poll_once().await.unwrap();
        }
        assert_eq!(store.cycle::<PointOfInterest>(), 3);
        drop(p);

        let later = ScriptedSource::new(vec![(Duration::ZERO, Ok(TWO))]);
        let mut p = poller(later, Arc::clone(&store));
        assert_eq!(p.poll_once().await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(ids(&store), vec![2]);
        assert_eq!(store.cycle::<PointOfInterest>(), 4);

        let status = p.status().borrow().clone();
        assert_eq!(status.cycles_started, 1);
        assert_eq!(status.stale_discards, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_response_does_not_overwrite_newer() {
        let store = Arc::new(ReconciliationStore::new());
        // Cycle 1 is slow (12s); cycle 2 starts at t=5s and answers at once.
        let source = ScriptedSource::new(vec![
            (Duration::from_secs(12), Ok(ONE)),
            (Duration::ZERO, Ok(TWO)),
        ]);
        let p = poller(source, Arc::clone(&store));
        let status = p.status();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ids(&store), vec![2]);
        assert_eq!(store.cycle::<PointOfInterest>(), 2);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(ids(&store), vec![2], "late cycle-1 response must be discarded");
        assert_eq!(status.borrow().stale_discards, 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_applied_after_cancel() {
        let store = Arc::new(ReconciliationStore::new());
        let source = ScriptedSource::new(vec![(Duration::from_secs(3), Ok(ONE))]);
        let p = poller(source, Arc::clone(&store));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.read::<PointOfInterest>().is_empty());
        assert_eq!(store.cycle::<PointOfInterest>(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off() {
        let store = Arc::new(ReconciliationStore::new());
        let source = ScriptedSource::new(vec![
            (Duration::ZERO, Err(503)),
            (Duration::ZERO, Err(503)),
            (Duration::ZERO, Ok(ONE)),
        ]);
        let p = poller(source, Arc::clone(&store));
        let status = p.status();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(cancel.clone()));

        // t=0 fails; next tick after 10s (not 5s).
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(status.borrow().cycles_started, 1);

        // t=10 fails again; next tick at t=30.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(status.borrow().cycles_started, 2);
        assert_eq!(status.borrow().consecutive_failures, 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(status.borrow().cycles_started, 3);
        assert!(status.borrow().is_healthy());
        assert_eq!(ids(&store), vec![1]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_failure_does_not_back_off() {
        let store = Arc::new(ReconciliationStore::new());
        // Cycle 1 fails late (t=12s), after cycle 2 succeeded at t=5s.
        let source = ScriptedSource::new(vec![
            (Duration::from_secs(12), Err(500)),
            (Duration::ZERO, Ok(TWO)),
        ]);
        let p = poller(source, Arc::clone(&store));
        let status = p.status();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(ids(&store), vec![2]);
        {
            let s = status.borrow();
            assert_eq!(s.failures, 1);
            assert_eq!(s.consecutive_failures, 0);
            assert!(s.is_healthy());
        }

        // Ticks stay on the healthy 5s cadence: t=15 starts cycle 4.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(status.borrow().cycles_started, 4);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_in_flight_cap_still_polls() {
        let store = Arc::new(ReconciliationStore::new());
        let source = ScriptedSource::new(vec![(Duration::ZERO, Ok(ONE))]);
        let config = PollerConfig {
            max_in_flight: 0,
            ..PollerConfig::new("http://test", Duration::from_secs(1))
        };
        let p: Poller<PointOfInterest> = Poller::new(config, source, Arc::clone(&store));
        let status = p.status();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(status.borrow().cycles_started, 1);
        assert_eq!(ids(&store), vec![1]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_cap_skips_ticks() {
        let store = Arc::new(ReconciliationStore::new());
        // Every fetch hangs; the third tick must be skipped.
        let source = ScriptedSource::new(vec![]);
        let config = PollerConfig::new("http://test", Duration::from_secs(1)).with_max_in_flight(2);
        let p: Poller<PointOfInterest> = Poller::new(config, source, store);
        let status = p.status();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(status.borrow().cycles_started, 2);
        assert_eq!(status.borrow().skipped_ticks, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
