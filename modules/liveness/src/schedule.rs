//! Bounded fan-out of probes over a work set.

use std::sync::Arc;
use std::time::Duration;

use keyprobe_core::ratelimiter::RateLimiter;
use keyprobe_core::Endpoint;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::Prober;

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub identity: String,
    pub endpoint: Endpoint,
    pub source: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub identity: String,
    pub source: String,
    /// `None` when the probe failed, timed out or panicked.
    pub latency_ms: Option<u64>,
    pub country: String,
}

/// Probes every item with at most `max_parallel` in flight. Reports arrive in
/// completion order; callers should treat the result as unordered.
pub async fn run_all(
    items: Vec<WorkItem>,
    prober: Arc<dyn Prober>,
    max_parallel: usize,
    per_item_timeout: Duration,
    pacing: Option<RateLimiter>,
) -> Vec<ProbeReport> {
    let total = items.len();
    let sem = Arc::new(Semaphore::new(max_parallel.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<ProbeReport>();

    for item in items {
        let tx = tx.clone();
        let sem = sem.clone();
        let prober = prober.clone();
        let pacing = pacing.clone();
        tokio::spawn(async move {
            let _permit = match sem.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if let Some(rl) = pacing { rl.acquire().await; }
            let WorkItem { identity, endpoint, source, country } = item;
            // inner task so a panicking prober only takes down its own probe
            let probe = tokio::spawn(async move {
                timeout(per_item_timeout, prober.probe(&endpoint, per_item_timeout)).await
            });
            let latency_ms = match probe.await {
                Ok(Ok(Ok(ms))) => Some(ms),
                Ok(Ok(Err(e))) => {
                    debug!(%identity, error = %e, "probe failed");
                    None
                }
                Ok(Err(_)) => {
                    debug!(%identity, ?per_item_timeout, "probe timed out");
                    None
                }
                Err(e) => {
                    warn!(%identity, error = %e, "probe task aborted");
                    None
                }
            };
            let _ = tx.send(ProbeReport { identity, source, latency_ms, country });
        });
    }
    drop(tx);

    let mut reports = Vec::with_capacity(total);
    while let Some(r) = rx.recv().await {
        reports.push(r);
    }
    let alive = reports.iter().filter(|r| r.latency_ms.is_some()).count();
    info!(total, alive, dead = reports.len() - alive, "probing finished");
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProbeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem {
                identity: format!("vless://id{i}@10.0.0.{i}:443"),
                endpoint: Endpoint {
                    host: format!("10.0.0.{i}"),
                    port: 443,
                    requires_tls: false,
                    is_websocket: false,
                    websocket_path: "/".into(),
                },
                source: "test".into(),
                country: "UNKNOWN".into(),
            })
            .collect()
    }

    #[derive(Default)]
    struct Counting {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Prober for Counting {
        async fn probe(&self, endpoint: &Endpoint, _limit: Duration) -> Result<u64, ProbeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(u64::from(endpoint.port))
        }
    }

    struct Hangs;

    #[async_trait]
    impl Prober for Hangs {
        async fn probe(&self, _endpoint: &Endpoint, _limit: Duration) -> Result<u64, ProbeError> {
            std::future::pending::<()>().await;
            Ok(0)
        }
    }

    struct PanicsOnFirst;

    #[async_trait]
    impl Prober for PanicsOnFirst {
        async fn probe(&self, endpoint: &Endpoint, _limit: Duration) -> Result<u64, ProbeError> {
            if endpoint.host == "10.0.0.0" {
                panic!("boom");
            }
            if endpoint.host == "10.0.0.1" {
                return Err(ProbeError::Upgrade("nope".into()));
            }
            Ok(7)
        }
    }

    #[tokio::test]
    async fn never_exceeds_parallel_limit() {
        let prober = Arc::new(Counting::default());
        let reports = run_all(items(40), prober.clone(), 4, Duration::from_secs(5), None).await;
        assert_eq!(reports.len(), 40);
        assert!(reports.iter().all(|r| r.latency_ms == Some(443)));
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 4 && peak >= 1, "peak {peak}");
    }

    #[tokio::test]
    async fn hung_prober_yields_none_within_timeout() {
        let start = Instant::now();
        let reports = run_all(items(3), Arc::new(Hangs), 8, Duration::from_millis(100), None).await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.latency_ms.is_none()));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let mut reports = run_all(items(4), Arc::new(PanicsOnFirst), 2, Duration::from_secs(1), None).await;
        reports.sort_by(|a, b| a.identity.cmp(&b.identity));
        let latencies: Vec<_> = reports.iter().map(|r| r.latency_ms).collect();
        assert_eq!(latencies, vec![None, None, Some(7), Some(7)]);
    }

    #[tokio::test]
    async fn empty_work_set() {
        assert!(run_all(Vec::new(), Arc::new(Hangs), 1, Duration::from_millis(10), None).await.is_empty());
    }

    #[tokio::test]
    async fn paced_launches() {
        let start = Instant::now();
        let reports = run_all(items(4), Arc::new(Counting::default()), 8, Duration::from_secs(1), Some(RateLimiter::new(40))).await;
        assert_eq!(reports.len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn extreme_pacing_rate_still_completes() {
        let run = run_all(items(3), Arc::new(Counting::default()), 4, Duration::from_millis(200), Some(RateLimiter::new(2_000_000)));
        let reports = tokio::time::timeout(Duration::from_secs(3), run).await.expect("run_all stalled");
        assert_eq!(reports.len(), 3);
    }
}
