use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::{remaining, to_delta};

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: DateTime<Utc> },
}

/// Consecutive-failure circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// `Err(retry_after)` while open and still cooling down
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), Duration> {
        match self.state {
            CircuitState::Open { until } if now < until => Err(remaining(until, now)),
            _ => Ok(()),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    /// Count a failure; returns true when this failure opened the circuit
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trial_failed = matches!(self.state, CircuitState::Open { .. });
        if trial_failed || self.consecutive_failures >= self.threshold {
            self.state = CircuitState::Open {
                until: now + to_delta(self.cooldown),
            };
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn opens_after_threshold_and_cools_down() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(300));
        assert!(!cb.record_failure(t0()));
        assert!(!cb.record_failure(t0()));
        assert!(cb.check(t0()).is_ok());
        assert!(cb.record_failure(t0()));

        let retry = cb.check(t0() + TimeDelta::seconds(100)).unwrap_err();
        assert_eq!(retry, Duration::from_secs(200));
        assert!(cb.check(t0() + TimeDelta::seconds(300)).is_ok());
    }

    #[test]
    fn success_closes_and_resets() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure(t0());
        cb.record_failure(t0());
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn failed_trial_reopens_immediately() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            cb.record_failure(t0());
        }
        let later = t0() + TimeDelta::seconds(61);
        assert!(cb.check(later).is_ok());
        assert!(cb.record_failure(later));
        assert!(cb.check(later + TimeDelta::seconds(1)).is_err());
    }
}
