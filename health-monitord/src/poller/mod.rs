//! Self-paced polling of registered services.
//!
//! Every cycle takes a directory snapshot, keeps the services whose
//! interval has elapsed, and drains them through a fixed pool of workers.
//! Each worker probes a service and writes the result back before taking
//! the next one, so a round is complete once every worker has returned.
//! The loop then sleeps for whatever is left of the cycle period.

pub mod prober;

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use shared::types::ServiceRecord;
use crate::config::PollerConfig;
use crate::directory::ServiceDirectory;
use self::prober::Probe;

/// What a single cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub registered: usize,
    pub due: usize,
    pub probed: usize,
}

pub struct Poller<P> {
    directory: ServiceDirectory,
    prober: Arc<P>,
    cycle_period: Duration,
    default_interval: Duration,
    workers: usize,
}

impl<P: Probe> Poller<P> {
    pub fn new(directory: ServiceDirectory, prober: P, config: &PollerConfig) -> Self {
        Self {
            directory,
            prober: Arc::new(prober),
            cycle_period: config.cycle_period(),
            default_interval: config.default_interval(),
            workers: config.workers.max(1),
        }
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            "Poller started: cycle {:?}, default interval {:?}, {} workers",
            self.cycle_period,
            self.default_interval,
            self.workers
        );

        loop {
            let started = Instant::now();
            let report = self.run_cycle(&cancel).await;
            let elapsed = started.elapsed();

            tracing::debug!(
                "Cycle finished in {:?}: {} registered, {} due, {} probed",
                elapsed,
                report.registered,
                report.due,
                report.probed
            );

            if cancel.is_cancelled() {
                break;
            }

            // an overrunning cycle goes straight into the next one
            if let Some(remaining) = self.cycle_period.checked_sub(elapsed) {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
        }

        tracing::info!("Poller shutting down");
    }

    /// Probe every due service once and wait for all results to be written
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let now = Utc::now();
        let snapshot = self.directory.list_snapshot().await;
        let registered = snapshot.len();

        let due: Vec<ServiceRecord> = snapshot
            .into_iter()
            .filter(|record| is_due(record, now, self.default_interval))
            .collect();
        let due_count = due.len();

        let probed = if due.is_empty() {
            0
        } else {
            self.dispatch(due, cancel).await
        };

        CycleReport {
            registered,
            due: due_count,
            probed,
        }
    }

    async fn dispatch(&self, due: Vec<ServiceRecord>, cancel: &CancellationToken) -> usize {
        let (tx, rx) = flume::bounded::<ServiceRecord>(due.len());

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            workers.spawn(run_worker(
                rx.clone(),
                self.prober.clone(),
                self.directory.clone(),
                cancel.clone(),
            ));
        }
        drop(rx);

        for record in due {
            if cancel.is_cancelled() {
                tracing::debug!("Cancelled while enqueueing due services");
                break;
            }
            // capacity equals the due count, so this never waits
            if tx.send_async(record).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut probed = 0;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(count) => probed += count,
                Err(e) => tracing::error!("Poll worker failed: {}", e),
            }
        }
        probed
    }
}

async fn run_worker<P: Probe>(
    rx: flume::Receiver<ServiceRecord>,
    prober: Arc<P>,
    directory: ServiceDirectory,
    cancel: CancellationToken,
) -> usize {
    let mut probed = 0;

    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv_async() => match next {
                Ok(record) => record,
                Err(_) => break,
            },
        };

        // own task per check so a panic only loses this one record
        let check = {
            let prober = prober.clone();
            let cancel = cancel.clone();
            let record = record.clone();
            tokio::spawn(async move { prober.probe(&record, &cancel).await })
        };
        let checked = match check.await {
            Ok(checked) => checked,
            Err(e) => {
                tracing::error!("Check of {} failed: {}", record.id, e);
                continue;
            }
        };

        // an interrupted check says nothing about the service
        if cancel.is_cancelled() {
            tracing::debug!("Discarding interrupted check of {}", record.id);
            break;
        }

        if checked.metrics.health != record.metrics.health {
            tracing::info!(
                "Service {} is now {} (was {})",
                checked.id,
                checked.metrics.health,
                record.metrics.health
            );
        }

        directory.update(checked).await;
        probed += 1;
    }

    probed
}

/// Per-service interval when set, otherwise the monitor default
pub fn effective_interval(record: &ServiceRecord, default_interval: Duration) -> Duration {
    if record.poll_interval_secs > 0 {
        Duration::from_secs(record.poll_interval_secs)
    } else {
        default_interval
    }
}

/// Whether the record's interval has elapsed since its last poll
pub fn is_due(record: &ServiceRecord, now: DateTime<Utc>, default_interval: Duration) -> bool {
    let Some(last_polled) = record.metrics.last_polled_at else {
        return true;
    };

    // negative when the last poll is ahead of `now`
    match (now - last_polled).to_std() {
        Ok(elapsed) => elapsed >= effective_interval(record, default_interval),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use shared::types::HealthStatus;
    use super::prober::{HealthProber, HealthTransport, HttpReply, ProbePolicy, TransportError};

    const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    /// Marks records healthy after a short delay and tracks concurrency
    #[derive(Default)]
    struct CountingProber {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Probe for CountingProber {
        async fn probe(&self, record: &ServiceRecord, _cancel: &CancellationToken) -> ServiceRecord {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            if record.id == "boom" {
                self.active.fetch_sub(1, Ordering::SeqCst);
                panic!("probe blew up");
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let mut checked = record.clone();
            checked.metrics.ready = true;
            checked.metrics.health = HealthStatus::Healthy;
            checked.metrics.last_polled_at = Some(Utc::now());
            checked.metrics.last_checked_at = checked.metrics.last_polled_at;
            checked
        }
    }

    /// Always returns the same health body and counts calls
    struct FixedTransport {
        body: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HealthTransport for FixedTransport {
        async fn get(&self, _url: &str) -> Result<HttpReply, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpReply {
                status: reqwest::StatusCode::OK,
                body: bytes::Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    fn poller_config(workers: usize) -> PollerConfig {
        PollerConfig {
            workers,
            ..PollerConfig::default()
        }
    }

    async fn directory_with(count: usize) -> ServiceDirectory {
        let directory = ServiceDirectory::new();
        for i in 0..count {
            let record = ServiceRecord::new(format!("svc{i}"), format!("http://svc{i}"));
            directory.register(record).await.unwrap();
        }
        directory
    }

    #[test]
    fn test_never_polled_is_due() {
        let record = ServiceRecord::new("svc1", "http://x");
        assert!(is_due(&record, Utc::now(), DEFAULT_INTERVAL));
    }

    #[test]
    fn test_due_after_interval_elapses() {
        let polled_at = Utc::now();
        let mut record = ServiceRecord::new("svc1", "http://x");
        record.poll_interval_secs = 5;
        record.metrics.last_polled_at = Some(polled_at);

        let just_before = polled_at + chrono::Duration::milliseconds(4_999);
        let exactly = polled_at + chrono::Duration::seconds(5);
        assert!(!is_due(&record, just_before, DEFAULT_INTERVAL));
        assert!(is_due(&record, exactly, DEFAULT_INTERVAL));
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let polled_at = Utc::now();
        let mut record = ServiceRecord::new("svc1", "http://x");
        record.metrics.last_polled_at = Some(polled_at);

        assert_eq!(effective_interval(&record, DEFAULT_INTERVAL), DEFAULT_INTERVAL);
        assert!(!is_due(&record, polled_at + chrono::Duration::seconds(9), DEFAULT_INTERVAL));
        assert!(is_due(&record, polled_at + chrono::Duration::seconds(10), DEFAULT_INTERVAL));
    }

    #[test]
    fn test_poll_in_the_future_is_not_due() {
        let now = Utc::now();
        let mut record = ServiceRecord::new("svc1", "http://x");
        record.metrics.last_polled_at = Some(now + chrono::Duration::seconds(30));
        assert!(!is_due(&record, now, DEFAULT_INTERVAL));
    }

    #[tokio::test]
    async fn test_round_never_exceeds_worker_count() {
        let directory = directory_with(23).await;
        let poller = Poller::new(directory.clone(), CountingProber::default(), &poller_config(5));

        let report = poller.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report, CycleReport { registered: 23, due: 23, probed: 23 });
        let peak = poller.prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak concurrency was {peak}");
        assert!(peak > 1, "probes never overlapped");

        let snapshot = directory.list_snapshot().await;
        assert!(snapshot.iter().all(|r| r.metrics.ready));
    }

    #[tokio::test]
    async fn test_small_due_set_with_large_pool() {
        let directory = directory_with(2).await;
        let poller = Poller::new(directory, CountingProber::default(), &poller_config(16));

        let report = poller.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.probed, 2);
        assert_eq!(poller.prober.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_probe_does_not_affect_others() {
        let directory = directory_with(10).await;
        directory.register(ServiceRecord::new("boom", "http://boom")).await.unwrap();
        let poller = Poller::new(directory.clone(), CountingProber::default(), &poller_config(3));

        let report = poller.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.due, 11);
        assert_eq!(report.probed, 10);
        for record in directory.list_snapshot().await {
            if record.id == "boom" {
                assert!(record.metrics.last_polled_at.is_none());
            } else {
                assert!(record.metrics.ready, "{} was not probed", record.id);
            }
        }
    }

    #[tokio::test]
    async fn test_single_worker_survives_panicking_check() {
        for _ in 0..5 {
            let directory = directory_with(6).await;
            directory.register(ServiceRecord::new("boom", "http://boom")).await.unwrap();
            let poller = Poller::new(directory.clone(), CountingProber::default(), &poller_config(1));

            let report = poller.run_cycle(&CancellationToken::new()).await;

            assert_eq!(report, CycleReport { registered: 7, due: 7, probed: 6 });
            assert_eq!(poller.prober.calls.load(Ordering::SeqCst), 7);
            let written = directory
                .list_snapshot()
                .await
                .iter()
                .filter(|r| r.metrics.ready)
                .count();
            assert_eq!(written, report.probed);
        }
    }

    /// Takes `delay` per check and leaves the record due again
    struct PacedProber {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl PacedProber {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for PacedProber {
        async fn probe(&self, record: &ServiceRecord, cancel: &CancellationToken) -> ServiceRecord {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.delay) => {}
            }
            record.clone()
        }
    }

    async fn cycles_within(probe_delay: Duration, window: Duration) -> usize {
        let directory = directory_with(1).await;
        let config = PollerConfig {
            cycle_period_secs: 10,
            ..PollerConfig::default()
        };
        let poller = Arc::new(Poller::new(directory, PacedProber::new(probe_delay), &config));

        let cancel = CancellationToken::new();
        let handle = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        tokio::time::sleep(window).await;
        let calls = poller.prober.calls.load(Ordering::SeqCst);
        cancel.cancel();
        handle.await.unwrap();
        calls
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_cycles_wait_out_the_period() {
        // cycles start at 0s, 10s and 20s
        let cycles = cycles_within(Duration::from_millis(50), Duration::from_secs(25)).await;
        assert_eq!(cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_starts_next_immediately() {
        // 15s checks against a 10s period: cycles start at 0s, 15s and 30s
        let cycles = cycles_within(Duration::from_secs(15), Duration::from_secs(31)).await;
        assert_eq!(cycles, 3);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_leaves_records_untouched() {
        let directory = directory_with(4).await;
        let poller = Poller::new(directory.clone(), CountingProber::default(), &poller_config(2));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = poller.run_cycle(&cancel).await;

        assert_eq!(report.due, 4);
        assert_eq!(report.probed, 0);
        assert_eq!(poller.prober.calls.load(Ordering::SeqCst), 0);
        assert!(directory
            .list_snapshot()
            .await
            .iter()
            .all(|r| r.metrics.last_polled_at.is_none()));
    }

    #[tokio::test]
    async fn test_first_cycle_probes_then_respects_interval() {
        let directory = ServiceDirectory::new();
        let mut record = ServiceRecord::new("svc1", "http://x");
        record.poll_interval_secs = 10;
        record.attributes = HashMap::from([("env".to_string(), "dev".to_string())]);
        directory.register(record).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let transport = FixedTransport {
            body: r#"{"uptime_sec":42,"request_count":100,"error_count":5,"attributes":{"version":"1.0"}}"#,
            calls: calls.clone(),
        };
        let config = PollerConfig::default();
        let prober = HealthProber::new(transport, ProbePolicy::from(&config));
        let poller = Poller::new(directory.clone(), prober, &config);

        let report = poller.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.probed, 1);

        let record = directory.get("svc1").await.unwrap();
        assert!(record.metrics.ready);
        assert_eq!(record.metrics.health, HealthStatus::Healthy);
        assert!((record.metrics.error_rate - 0.05).abs() < f64::EPSILON);
        assert_eq!(record.metrics.uptime_secs, 42);
        assert_eq!(record.attributes.get("version").map(String::as_str), Some("1.0"));
        assert_eq!(record.attributes.get("env").map(String::as_str), Some("dev"));

        // three seconds later the service is still inside its interval
        let polled_at = record.metrics.last_polled_at.unwrap();
        assert!(!is_due(&record, polled_at + chrono::Duration::seconds(3), DEFAULT_INTERVAL));

        let report = poller.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.due, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_stops_promptly_on_cancel() {
        let directory = directory_with(1).await;
        let config = PollerConfig {
            cycle_period_secs: 3600,
            ..PollerConfig::default()
        };
        let poller = Arc::new(Poller::new(directory.clone(), CountingProber::default(), &config));

        let cancel = CancellationToken::new();
        let handle = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        // wait for the first cycle to publish its result
        tokio::time::timeout(Duration::from_secs(5), async {
            while poller.prober.calls.load(Ordering::SeqCst) == 0
                || directory.get("svc0").await.unwrap().metrics.last_polled_at.is_none()
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert_eq!(poller.prober.calls.load(Ordering::SeqCst), 1);
    }
}
