//! Batch scheduler: drives address records through the resolver.
//!
//! Records are cut into contiguous batches. Batches run strictly one after
//! another; inside a batch every record is resolved concurrently and the
//! scheduler waits for all of them to settle before moving on. The batch size
//! is therefore the cap on in-flight geocoder requests.
//!
//! Failures never abort a run. Each one is logged, recorded in the
//! [`RunReport`], and the record is dropped.

use crate::config::{ConfigError, PipelineConfig};
use crate::location::{AddressRecord, AddressResolver, ResolvedLocation};
use crate::store::MarkerStore;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::num::NonZeroUsize;
use std::slice::Chunks;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Split `records` into contiguous batches of `batch_size`; the last may be shorter.
pub fn partition<T>(records: &[T], batch_size: NonZeroUsize) -> Chunks<'_, T> {
    records.chunks(batch_size.get())
}

/// Number of batches `n` records make at `batch_size`: ceil(n / b).
pub fn batch_count(n: usize, batch_size: NonZeroUsize) -> usize {
    n.div_ceil(batch_size.get())
}

/// Cooperative stop signal for a run.
///
/// Once cancelled, no further batch is started; the batch in flight settles normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records attempted so far out of the run total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    completed: usize,
    total: usize,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self { completed: 0, total }
    }

    pub fn advance(&mut self, settled: usize) {
        self.completed = (self.completed + settled).min(self.total);
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Percent complete; an empty run is complete.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// A record the run could not place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub address: String,
    pub reason: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub submitted: usize,
    pub processed: usize,
    pub resolved: usize,
    pub batches: usize,
    pub failures: Vec<Failure>,
    pub cancelled: bool,
}

impl RunReport {
    fn new(submitted: usize) -> Self {
        Self {
            submitted,
            processed: 0,
            resolved: 0,
            batches: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// One-line summary for status bars.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "Successfully mapped {} of {} locations",
            self.resolved, self.submitted
        );
        if self.cancelled {
            line.push_str(" (cancelled)");
        }
        line
    }
}

pub struct BatchScheduler {
    resolver: AddressResolver,
    batch_size: NonZeroUsize,
    batch_pause: Duration,
    state: SchedulerState,
}

impl BatchScheduler {
    pub fn new(resolver: AddressResolver, batch_size: usize) -> Result<Self, ConfigError> {
        let batch_size =
            NonZeroUsize::new(batch_size).ok_or(ConfigError::InvalidBatchSize(batch_size))?;
        Ok(Self {
            resolver,
            batch_size,
            batch_pause: Duration::ZERO,
            state: SchedulerState::Idle,
        })
    }

    /// Scheduler for a validated config, with its retry policy and batch pause.
    pub fn from_config(resolver: AddressResolver, config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = resolver.with_retry(config.retry_policy());
        Ok(Self::new(resolver, config.batch_size)?.with_batch_pause(config.batch_pause()))
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Geocode `records` into `store`, calling `on_progress` after every batch.
    ///
    /// Successes are appended as they settle, so order within a batch follows
    /// completion, not submission. Geocoder state (the cache) is flushed once
    /// when the run ends. The final progress value is exactly 100
    /// unless the run is cancelled first; an empty input reports 100 once.
    pub async fn run<F>(
        &mut self,
        records: &[Arc<AddressRecord>],
        store: &mut MarkerStore,
        mut on_progress: F,
        cancel: Option<&CancelToken>,
    ) -> RunReport
    where
        F: FnMut(f64),
    {
        self.state = SchedulerState::Running;
        let mut progress = ProgressState::new(records.len());
        let mut report = RunReport::new(records.len());

        if records.is_empty() {
            on_progress(progress.percent());
            self.state = SchedulerState::Idle;
            return report;
        }

        let total_batches = batch_count(records.len(), self.batch_size);
        let resolver = &self.resolver;

        for (index, batch) in partition(records, self.batch_size).enumerate() {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                info!(batch = index, total_batches, "run cancelled, no further batches");
                report.cancelled = true;
                break;
            }
            if index > 0 && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }

            debug!(batch = index + 1, total_batches, size = batch.len(), "resolving batch");
            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .map(|record| async move { (record, resolver.resolve(&record.address).await) })
                .collect();

            while let Some((record, outcome)) = pending.next().await {
                match outcome {
                    Ok(hit) => {
                        store.add(ResolvedLocation::new(Arc::clone(record), hit));
                        report.resolved += 1;
                    }
                    Err(e) => {
                        warn!(address = %record.address, error = %e, "geocoding failed, dropping record");
                        report.failures.push(Failure {
                            address: record.address.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            progress.advance(batch.len());
            report.batches += 1;
            report.processed = progress.completed();
            on_progress(progress.percent());
        }

        self.resolver.flush().await;
        info!(
            resolved = report.resolved,
            submitted = report.submitted,
            cancelled = report.cancelled,
            "geocoding run finished"
        );
        self.state = SchedulerState::Idle;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Coordinate, GeocodeFuture, Geocoder, TableGeocoder};
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicUsize;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn records(addresses: &[&str]) -> Vec<Arc<AddressRecord>> {
        addresses.iter().map(|a| Arc::new(AddressRecord::new(*a))).collect()
    }

    fn table(addresses: &[&str]) -> TableGeocoder {
        addresses
            .iter()
            .enumerate()
            .fold(TableGeocoder::new(), |t, (i, a)| t.with(a, Coordinate::new(i as f64, i as f64)))
    }

    fn scheduler(geocoder: impl Geocoder + 'static, batch_size: usize) -> BatchScheduler {
        BatchScheduler::new(AddressResolver::new(Arc::new(geocoder)), batch_size).unwrap()
    }

    #[test]
    fn test_partition_sizes() {
        let items: Vec<u32> = (0..23).collect();
        let batches: Vec<&[u32]> = partition(&items, nz(10)).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batch_count(23, nz(10)), 3);
        assert_eq!(batches[2].len(), 3);

        let even: Vec<u32> = (0..20).collect();
        let batches: Vec<&[u32]> = partition(&even, nz(10)).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 10);

        assert_eq!(batch_count(0, nz(4)), 0);
        assert_eq!(partition::<u32>(&[], nz(4)).count(), 0);
    }

    #[test]
    fn test_partition_is_contiguous() {
        let items: Vec<u32> = (0..7).collect();
        let flat: Vec<u32> = partition(&items, nz(3)).flatten().copied().collect();
        assert_eq!(flat, items);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let resolver = AddressResolver::new(Arc::new(TableGeocoder::new()));
        assert!(matches!(
            BatchScheduler::new(resolver, 0),
            Err(ConfigError::InvalidBatchSize(0))
        ));
    }

    #[test]
    fn test_progress_state() {
        let mut p = ProgressState::new(3);
        assert_eq!(p.percent(), 0.0);
        p.advance(2);
        assert_relative_eq!(p.percent(), 200.0 / 3.0);
        p.advance(5);
        assert_eq!(p.completed(), p.total());
        assert_eq!(p.percent(), 100.0);
        assert_eq!(ProgressState::new(0).percent(), 100.0);
    }

    #[tokio::test]
    async fn test_partial_failure_scenario() {
        let mut s = scheduler(table(&["A", "C"]), 2);
        let mut store = MarkerStore::new();
        let mut calls = Vec::new();

        let report = s
            .run(&records(&["A", "B", "C"]), &mut store, |p| calls.push(p), None)
            .await;

        let mut addresses: Vec<&str> = store.all().iter().map(|l| l.address()).collect();
        addresses.sort_unstable();
        assert_eq!(addresses, vec!["A", "C"]);
        assert_eq!(calls.len(), 2);
        assert_relative_eq!(calls[0], 200.0 / 3.0);
        assert_eq!(calls[1], 100.0);

        assert_eq!(report.resolved, 2);
        assert_eq!(report.processed, 3);
        assert_eq!(report.batches, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, "B");
        assert_eq!(report.status_line(), "Successfully mapped 2 of 3 locations");
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_empty_input_reports_once() {
        let mut s = scheduler(TableGeocoder::new(), 10);
        let mut store = MarkerStore::new();
        let mut calls = Vec::new();
        let report = s.run(&[], &mut store, |p| calls.push(p), None).await;

        assert_eq!(calls, vec![100.0]);
        assert!(store.is_empty());
        assert_eq!(report.batches, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_all_failures_still_complete() {
        let mut s = scheduler(TableGeocoder::new(), 2);
        let mut store = MarkerStore::new();
        let mut last = 0.0;
        let report = s
            .run(&records(&["x", "y", "z", "w", "v"]), &mut store, |p| last = p, None)
            .await;

        assert_eq!(last, 100.0);
        assert!(store.is_empty());
        assert_eq!(report.failures.len(), 5);
        assert_eq!(report.processed, report.submitted);
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let mut s = scheduler(table(&["A"]), 1);
        let mut store = MarkerStore::new();
        let token = CancelToken::new();
        token.cancel();
        let mut calls = Vec::new();

        let report = s
            .run(&records(&["A", "A"]), &mut store, |p| calls.push(p), Some(&token))
            .await;
        assert!(report.cancelled);
        assert_eq!(report.batches, 0);
        assert!(calls.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_batches() {
        let mut s = scheduler(table(&["A", "B", "C", "D"]), 2);
        let mut store = MarkerStore::new();
        let token = CancelToken::new();
        let mut calls = Vec::new();

        let report = s
            .run(
                &records(&["A", "B", "C", "D"]),
                &mut store,
                |p| {
                    calls.push(p);
                    token.cancel();
                },
                Some(&token),
            )
            .await;

        assert!(report.cancelled);
        assert_eq!(report.batches, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(calls, vec![50.0]);
        assert!(report.status_line().ends_with("(cancelled)"));
    }

    /// Sleeps briefly on every call and records how many calls overlap.
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    impl Geocoder for Gauge {
        fn geocode<'a>(&'a self, _address: &'a str) -> GeocodeFuture<'a> {
            Box::pin(async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![crate::location::GeocodeHit {
                    coordinate: Coordinate::new(0.0, 0.0),
                    display_name: None,
                    source: crate::location::LocationSource::Table,
                }])
            })
        }
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_batch() {
        let gauge = Arc::new(Gauge {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        });
        let mut s = BatchScheduler::new(AddressResolver::new(gauge.clone()), 3).unwrap();
        let mut store = MarkerStore::new();
        let mut started_at_progress = Vec::new();

        let addresses: Vec<String> = (0..7).map(|i| format!("addr {i}")).collect();
        let input: Vec<Arc<AddressRecord>> =
            addresses.iter().map(|a| Arc::new(AddressRecord::new(a.as_str()))).collect();
        s.run(
            &input,
            &mut store,
            |_| started_at_progress.push(gauge.started.load(Ordering::SeqCst)),
            None,
        )
        .await;

        // Members of a batch overlap, but never more than the batch size.
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
        // The next batch starts only after the previous one settled.
        assert_eq!(started_at_progress, vec![3, 6, 7]);
        assert_eq!(store.len(), 7);
    }

    #[tokio::test]
    async fn test_from_config_validates() {
        let resolver = AddressResolver::new(Arc::new(TableGeocoder::new()));
        let bad = PipelineConfig {
            nearby_radius_m: -5.0,
            ..PipelineConfig::default()
        };
        assert!(BatchScheduler::from_config(resolver.clone(), &bad).is_err());

        let good = PipelineConfig {
            batch_size: 4,
            ..PipelineConfig::default()
        };
        let s = BatchScheduler::from_config(resolver, &good).unwrap();
        assert_eq!(s.batch_size(), 4);
    }

    struct Flushing {
        table: TableGeocoder,
        flushes: AtomicUsize,
    }

    impl Geocoder for Flushing {
        fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
            self.table.geocode(address)
        }

        fn flush(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_run_flushes_geocoder_once() {
        let geocoder = Arc::new(Flushing {
            table: table(&["A", "B", "C", "D", "E"]),
            flushes: AtomicUsize::new(0),
        });
        let mut s = BatchScheduler::new(AddressResolver::new(geocoder.clone()), 2).unwrap();
        let mut store = MarkerStore::new();
        s.run(&records(&["A", "B", "C", "D", "E"]), &mut store, |_| {}, None).await;

        assert_eq!(store.len(), 5);
        assert_eq!(geocoder.flushes.load(Ordering::SeqCst), 1);
    }
}
