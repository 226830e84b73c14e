use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    Closed,
    Open,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
        })
    }
}

/// Consecutive-failure gate owned by a single scenario run.
///
/// Opens once `threshold` failed attempts happen in a row. A success resets
/// the counter and closes it again.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failures: u32,
    threshold: u32,
    open: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold: threshold.max(1),
            open: false,
        }
    }

    pub fn allow(&self) -> bool {
        !self.open
    }

    pub fn record(&mut self, success: bool) {
        if success {
            self.failures = 0;
            self.open = false;
        } else {
            self.failures = self.failures.saturating_add(1);
            if self.failures >= self.threshold {
                self.open = true;
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> BreakerState {
        if self.open {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let mut b = CircuitBreaker::new(3);
        for _ in 0..2 {
            b.record(false);
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record(false);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn success_resets_count() {
        let mut b = CircuitBreaker::new(3);
        b.record(false);
        b.record(false);
        b.record(true);
        assert_eq!(b.failures(), 0);
        b.record(false);
        b.record(false);
        assert!(b.allow());
        b.record(false);
        assert!(!b.allow());
    }

    #[test]
    fn threshold_floor_is_one() {
        let mut b = CircuitBreaker::new(0);
        assert_eq!(b.threshold(), 1);
        b.record(false);
        assert_eq!(b.state().to_string(), "open");
    }
}
