use crate::smoke::SmokeResult;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;

/// Pass/fail counts and latency distribution of one smoke batch.
pub struct Statistics {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    latencies: Option<Histogram<u64>>,
    status_codes: BTreeMap<u16, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
    pub status_codes: BTreeMap<u16, usize>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            // 1ms..10min at 3 significant digits
            latencies: Histogram::<u64>::new_with_bounds(1, 600_000, 3).ok(),
            status_codes: BTreeMap::new(),
        }
    }

    pub fn from_results(results: &[SmokeResult]) -> Self {
        let mut stats = Self::new();
        for r in results {
            stats.record(r);
        }
        stats
    }

    pub fn record(&mut self, result: &SmokeResult) {
        self.total += 1;
        if result.ok {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        if result.status_code != 0 {
            *self.status_codes.entry(result.status_code).or_insert(0) += 1;
        }
        if let Some(h) = self.latencies.as_mut() {
            h.saturating_record(result.latency_ms.max(1));
        }
    }

    pub fn percentile(&self, p: f64) -> u64 {
        match &self.latencies {
            Some(h) if !h.is_empty() => h.value_at_percentile(p),
            _ => 0,
        }
    }

    pub fn max(&self) -> u64 {
        match &self.latencies {
            Some(h) if !h.is_empty() => h.max(),
            _ => 0,
        }
    }

    pub fn summary(&self) -> SmokeSummary {
        SmokeSummary {
            total: self.total,
            passed: self.passed,
            failed: self.failed,
            p50_ms: self.percentile(50.0),
            p95_ms: self.percentile(95.0),
            max_ms: self.max(),
            status_codes: self.status_codes.clone(),
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}
