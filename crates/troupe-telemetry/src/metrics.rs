//! Engine metrics: atomic counters and fixed-bucket histograms.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-bucket latency histogram (milliseconds).
#[derive(Debug)]
pub struct DelayHistogram {
    bounds: &'static [u64],
    buckets: Vec<AtomicU64>,
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl DelayHistogram {
    const DEFAULT_BOUNDS: &'static [u64] = &[10, 50, 100, 250, 500, 1_000, 5_000, 30_000];

    pub fn new() -> Self {
        Self {
            bounds: Self::DEFAULT_BOUNDS,
            buckets: (0..=Self::DEFAULT_BOUNDS.len())
                .map(|_| AtomicU64::new(0))
                .collect(),
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, delay_ms: u64) {
        let idx = self
            .bounds
            .iter()
            .position(|&bound| delay_ms <= bound)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(delay_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn avg_ms(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.sum_ms.load(Ordering::Relaxed) / count
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

impl Default for DelayHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-wide metrics collector.
#[derive(Default)]
pub struct EngineMetrics {
    pub workflows_started: AtomicU64,
    pub workflows_completed: AtomicU64,
    pub workflows_failed: AtomicU64,
    pub workflows_cancelled: AtomicU64,
    pub agents_executed: AtomicU64,
    pub agent_failures: AtomicU64,
    pub budget_denials: AtomicU64,
    pub strategy_degradations: AtomicU64,
    pub citations_collected: AtomicU64,
    pub approvals_requested: AtomicU64,
    pub approvals_denied: AtomicU64,
    rate_delay: DelayHistogram,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_rate_delay(&self, delay_ms: u64) {
        self.rate_delay.observe(delay_ms);
    }

    pub fn rate_delay(&self) -> &DelayHistogram {
        &self.rate_delay
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            workflows_started: self.workflows_started.load(Ordering::Relaxed),
            workflows_completed: self.workflows_completed.load(Ordering::Relaxed),
            workflows_failed: self.workflows_failed.load(Ordering::Relaxed),
            workflows_cancelled: self.workflows_cancelled.load(Ordering::Relaxed),
            agents_executed: self.agents_executed.load(Ordering::Relaxed),
            agent_failures: self.agent_failures.load(Ordering::Relaxed),
            budget_denials: self.budget_denials.load(Ordering::Relaxed),
            strategy_degradations: self.strategy_degradations.load(Ordering::Relaxed),
            citations_collected: self.citations_collected.load(Ordering::Relaxed),
            approvals_requested: self.approvals_requested.load(Ordering::Relaxed),
            approvals_denied: self.approvals_denied.load(Ordering::Relaxed),
            rate_delay_count: self.rate_delay.count(),
            rate_delay_avg_ms: self.rate_delay.avg_ms(),
        }
    }
}

/// Point-in-time view of [`EngineMetrics`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub workflows_started: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub workflows_cancelled: u64,
    pub agents_executed: u64,
    pub agent_failures: u64,
    pub budget_denials: u64,
    pub strategy_degradations: u64,
    pub citations_collected: u64,
    pub approvals_requested: u64,
    pub approvals_denied: u64,
    pub rate_delay_count: u64,
    pub rate_delay_avg_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_by_bound() {
        let histogram = DelayHistogram::new();
        histogram.observe(5);
        histogram.observe(100);
        histogram.observe(60_000);

        let counts = histogram.bucket_counts();
        assert_eq!(counts[0], 1); // <= 10
        assert_eq!(counts[2], 1); // <= 100
        assert_eq!(*counts.last().unwrap(), 1); // overflow
        assert_eq!(histogram.count(), 3);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = EngineMetrics::new();
        metrics.workflows_started.fetch_add(2, Ordering::Relaxed);
        metrics.record_rate_delay(40);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.workflows_started, 2);
        assert_eq!(snapshot.rate_delay_count, 1);
        assert_eq!(snapshot.rate_delay_avg_ms, 40);
    }
}
