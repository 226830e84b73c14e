//! Load-test metrics: an append-only sample store behind a read/write lock,
//! and immutable snapshots derived from it.
//!
//! Samples that arrive before the warm-up deadline are dropped on record, so
//! no snapshot ever sees them.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const MIN_ELAPSED_SECS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub latency_ms: u64,
    pub ok: bool,
    /// 0 when no response was received.
    pub status: u16,
}

/// Point-in-time view of a run. Latencies are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub total: usize,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub rps: f64,
    pub error_rate_pct: f64,
    pub status_dist: BTreeMap<u16, usize>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThresholdViolations {
    pub error_budget: bool,
    pub p95: bool,
}

impl ThresholdViolations {
    pub fn any(&self) -> bool {
        self.error_budget || self.p95
    }
}

impl Snapshot {
    /// Compare against maxima. A `max_p95_ms` of 0 disables the latency check.
    pub fn check_thresholds(&self, max_error_pct: f64, max_p95_ms: u64) -> ThresholdViolations {
        ThresholdViolations {
            error_budget: self.error_rate_pct > max_error_pct,
            p95: max_p95_ms > 0 && self.p95_ms > max_p95_ms,
        }
    }
}

struct Window {
    samples: Vec<Sample>,
    started_at: Instant,
    warm_up_ends_at: Instant,
    ended_at: Option<Instant>,
}

pub struct Metrics {
    window: RwLock<Window>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Metrics {
    pub fn new(warm_up: Duration) -> Self {
        let now = Instant::now();
        Self {
            window: RwLock::new(Window {
                samples: Vec::with_capacity(1024),
                started_at: now,
                warm_up_ends_at: now + warm_up,
                ended_at: None,
            }),
        }
    }

    /// Drop all samples and restart the clock.
    pub fn reset(&self, warm_up: Duration) {
        let now = Instant::now();
        let mut w = self.window.write();
        w.samples.clear();
        w.started_at = now;
        w.warm_up_ends_at = now + warm_up;
        w.ended_at = None;
    }

    pub fn started_at(&self) -> Instant {
        self.window.read().started_at
    }

    pub fn warm_up_ends_at(&self) -> Instant {
        self.window.read().warm_up_ends_at
    }

    /// Returns false when the sample fell inside the warm-up window and was
    /// discarded.
    pub fn record(&self, sample: Sample) -> bool {
        let mut w = self.window.write();
        if Instant::now() < w.warm_up_ends_at {
            return false;
        }
        w.samples.push(sample);
        true
    }

    pub fn mark_end(&self) {
        self.window.write().ended_at = Some(Instant::now());
    }

    pub fn len(&self) -> usize {
        self.window.read().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Snapshot {
        let (samples, elapsed) = {
            let w = self.window.read();
            let end = w.ended_at.unwrap_or_else(Instant::now);
            (w.samples.clone(), end.saturating_duration_since(w.started_at))
        };
        summarize(&samples, elapsed)
    }
}

/// Derive a snapshot from a set of samples collected over `elapsed`.
pub fn summarize(samples: &[Sample], elapsed: Duration) -> Snapshot {
    let mut latencies: Vec<u64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_unstable();

    let mut status_dist = BTreeMap::new();
    let mut failed = 0usize;
    for s in samples {
        *status_dist.entry(s.status).or_insert(0) += 1;
        if !s.ok {
            failed += 1;
        }
    }

    let total = samples.len();
    let elapsed_secs = elapsed.as_secs_f64().max(MIN_ELAPSED_SECS);
    Snapshot {
        total,
        p50_ms: percentile(&latencies, 50.0),
        p90_ms: percentile(&latencies, 90.0),
        p95_ms: percentile(&latencies, 95.0),
        p99_ms: percentile(&latencies, 99.0),
        rps: total as f64 / elapsed_secs,
        error_rate_pct: if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64 * 100.0
        },
        status_dist,
        elapsed_secs,
    }
}

/// Nearest-rank percentile over an ascending slice; 0 when empty.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    sorted[percentile_index(sorted.len(), p)]
}

pub fn percentile_index(n: usize, p: f64) -> usize {
    if n == 0 {
        return 0;
    }
    ((n as f64 * p / 100.0).floor() as usize).min(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency_ms: u64, ok: bool, status: u16) -> Sample {
        Sample {
            latency_ms,
            ok,
            status,
        }
    }

    #[test]
    fn nearest_rank() {
        let lat = [10, 20, 30, 40, 100];
        assert_eq!(percentile_index(5, 50.0), 2);
        assert_eq!(percentile(&lat, 50.0), 30);
        assert_eq!(percentile(&lat, 95.0), 100);
        assert_eq!(percentile(&lat, 100.0), 100);
        assert_eq!(percentile(&[], 50.0), 0);
        assert_eq!(percentile(&[7], 99.0), 7);
    }

    #[test]
    fn snapshot_sorts_and_counts() {
        let m = Metrics::default();
        for (lat, ok, status) in [(100, true, 200), (20, true, 200), (40, false, 500), (10, true, 200), (30, false, 0)] {
            assert!(m.record(sample(lat, ok, status)));
        }
        let s = m.snapshot();
        assert_eq!(s.total, 5);
        assert_eq!(s.p50_ms, 30);
        assert_eq!(s.p95_ms, 100);
        assert_eq!(s.error_rate_pct, 40.0);
        assert_eq!(s.status_dist.get(&200), Some(&3));
        assert_eq!(s.status_dist.get(&0), Some(&1));
        assert!(s.rps > 0.0);
    }

    #[test]
    fn warm_up_samples_are_discarded() {
        let m = Metrics::new(Duration::from_millis(50));
        assert!(!m.record(sample(5, false, 500)));
        std::thread::sleep(Duration::from_millis(80));
        assert!(m.record(sample(9, true, 200)));
        let s = m.snapshot();
        assert_eq!(s.total, 1);
        assert_eq!(s.p99_ms, 9);
        assert_eq!(s.error_rate_pct, 0.0);
        assert!(!s.status_dist.contains_key(&500));
    }

    #[test]
    fn reset_clears_samples() {
        let m = Metrics::default();
        m.record(sample(1, true, 200));
        m.mark_end();
        m.reset(Duration::ZERO);
        assert!(m.is_empty());
        assert_eq!(m.snapshot().total, 0);
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let s = summarize(&[], Duration::ZERO);
        assert_eq!(s.total, 0);
        assert_eq!(s.rps, 0.0);
        assert_eq!(s.error_rate_pct, 0.0);
        assert_eq!(s.elapsed_secs, MIN_ELAPSED_SECS);
    }

    #[test]
    fn thresholds_are_independent() {
        let s = Snapshot {
            error_rate_pct: 5.0,
            p95_ms: 300,
            ..Default::default()
        };
        assert_eq!(
            s.check_thresholds(1.0, 500),
            ThresholdViolations {
                error_budget: true,
                p95: false
            }
        );
        assert_eq!(
            s.check_thresholds(10.0, 200),
            ThresholdViolations {
                error_budget: false,
                p95: true
            }
        );
        assert!(!s.check_thresholds(10.0, 0).any());
    }
}
