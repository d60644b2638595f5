//! Vehicle polling budget
//!
//! Vehicle telemetry is the scarcest remote resource: the API is metered and
//! every poll may keep the car awake. [`PollingBudgetTracker`] enforces a
//! rolling daily call cap and only allows a fresh poll when enough time has
//! passed or the state of charge is expected to have drifted noticeably.
//!
//! Rules are evaluated in a fixed order and the first match decides:
//!
//! 1. startup seed poll (once per process)
//! 2. daily cap reached
//! 3. night conservation while not charging
//! 4. caller forced a poll
//! 5. last poll older than the absolute maximum
//! 6. last poll younger than the minimum interval
//! 7. idle (not charging) long interval
//! 8. expected SOC drift while charging

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::elapsed_secs;
use crate::config::BudgetConfig;

fn window() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Persisted accounting of vehicle polls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingBudget {
    pub daily_call_count: u32,
    pub window_start: DateTime<Utc>,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_known_charging_power_w: f64,
}

impl PollingBudget {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_call_count: 0,
            window_start: now,
            last_poll_time: None,
            last_known_charging_power_w: 0.0,
        }
    }
}

/// Which rule decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReason {
    StartupSeed,
    BudgetExhausted,
    NightIntervalDue,
    NightConservation,
    Forced,
    AbsoluteMaxExceeded,
    MinIntervalNotElapsed,
    IdleIntervalDue,
    IdleIntervalPending,
    SocDriftReached,
    SocDriftBelowThreshold,
}

impl PollReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollReason::StartupSeed => "startup_seed",
            PollReason::BudgetExhausted => "budget_exhausted",
            PollReason::NightIntervalDue => "night_interval_due",
            PollReason::NightConservation => "night_conservation",
            PollReason::Forced => "forced",
            PollReason::AbsoluteMaxExceeded => "absolute_max_exceeded",
            PollReason::MinIntervalNotElapsed => "min_interval_not_elapsed",
            PollReason::IdleIntervalDue => "idle_interval_due",
            PollReason::IdleIntervalPending => "idle_interval_pending",
            PollReason::SocDriftReached => "soc_drift_reached",
            PollReason::SocDriftBelowThreshold => "soc_drift_below_threshold",
        }
    }
}

impl fmt::Display for PollReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`PollingBudgetTracker::should_poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDecision {
    pub poll: bool,
    pub reason: PollReason,
}

impl PollDecision {
    fn yes(reason: PollReason) -> Self {
        Self { poll: true, reason }
    }

    fn no(reason: PollReason) -> Self {
        Self {
            poll: false,
            reason,
        }
    }
}

/// Inputs of one budget query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollQuery {
    pub is_charging: bool,
    pub last_charging_power_w: f64,
    pub daytime: bool,
    pub force: bool,
}

/// Decides whether the vehicle endpoint may be polled now
#[derive(Debug, Clone)]
pub struct PollingBudgetTracker {
    config: BudgetConfig,
    budget: PollingBudget,
    startup_pending: bool,
}

impl PollingBudgetTracker {
    pub fn new(config: BudgetConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            budget: PollingBudget::new(now),
            startup_pending: true,
        }
    }

    /// Resume from persisted accounting.
    ///
    /// A restored window that already hit the cap consumes the startup poll
    /// so a restart cannot push the count past the cap.
    pub fn restore(config: BudgetConfig, budget: PollingBudget, now: DateTime<Utc>) -> Self {
        let mut tracker = Self {
            config,
            budget,
            startup_pending: true,
        };
        tracker.roll_window(now);
        tracker.startup_pending = tracker.budget.daily_call_count < tracker.config.max_daily_calls;
        tracker
    }

    pub fn budget(&self) -> &PollingBudget {
        &self.budget
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn remaining_calls(&self) -> u32 {
        self.config
            .max_daily_calls
            .saturating_sub(self.budget.daily_call_count)
    }

    /// Start a fresh window once 24h have passed since the current one began
    pub fn roll_window(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.budget.window_start >= window() {
            self.budget.daily_call_count = 0;
            self.budget.window_start = now;
            return true;
        }
        false
    }

    fn elapsed_since_poll(&self, now: DateTime<Utc>) -> f64 {
        self.budget
            .last_poll_time
            .map_or(f64::INFINITY, |last| elapsed_secs(now, last))
    }

    fn at_cap(&self) -> bool {
        self.budget.daily_call_count >= self.config.max_daily_calls
    }

    /// Whether a poll is due no matter what the solar production looks like
    pub fn unconditional_due(&self, now: DateTime<Utc>) -> bool {
        if self.startup_pending {
            return true;
        }
        !self.at_cap() && self.elapsed_since_poll(now) > self.config.absolute_max_seconds as f64
    }

    pub fn should_poll(&mut self, now: DateTime<Utc>, query: PollQuery) -> PollDecision {
        self.roll_window(now);
        let elapsed = self.elapsed_since_poll(now);
        let cfg = &self.config;

        if self.startup_pending {
            return PollDecision::yes(PollReason::StartupSeed);
        }
        if self.at_cap() {
            return PollDecision::no(PollReason::BudgetExhausted);
        }
        if !query.daytime && !query.is_charging {
            return if elapsed >= cfg.night_interval_seconds as f64 {
                PollDecision::yes(PollReason::NightIntervalDue)
            } else {
                PollDecision::no(PollReason::NightConservation)
            };
        }
        if query.force {
            return PollDecision::yes(PollReason::Forced);
        }
        if elapsed > cfg.absolute_max_seconds as f64 {
            return PollDecision::yes(PollReason::AbsoluteMaxExceeded);
        }
        if elapsed < cfg.min_interval_seconds as f64 {
            return PollDecision::no(PollReason::MinIntervalNotElapsed);
        }
        if !query.is_charging {
            return if elapsed >= cfg.long_idle_seconds as f64 {
                PollDecision::yes(PollReason::IdleIntervalDue)
            } else {
                PollDecision::no(PollReason::IdleIntervalPending)
            };
        }

        let expected = expected_soc_delta(
            query.last_charging_power_w,
            elapsed,
            cfg.battery_capacity_kwh,
        );
        if expected >= cfg.soc_delta_threshold_percent {
            PollDecision::yes(PollReason::SocDriftReached)
        } else {
            PollDecision::no(PollReason::SocDriftBelowThreshold)
        }
    }

    /// Account for a confirmed vehicle round trip
    pub fn record_poll(&mut self, now: DateTime<Utc>, charging_power_w: f64) {
        self.roll_window(now);
        self.budget.daily_call_count = self.budget.daily_call_count.saturating_add(1);
        self.budget.last_poll_time = Some(now);
        self.budget.last_known_charging_power_w = charging_power_w.max(0.0);
        self.startup_pending = false;
    }
}

/// Percent of battery expected to be added at `power_w` over `elapsed_secs`
pub fn expected_soc_delta(power_w: f64, elapsed_secs: f64, capacity_kwh: f64) -> f64 {
    if capacity_kwh <= 0.0 || !elapsed_secs.is_finite() {
        return 0.0;
    }
    (power_w.max(0.0) / 1000.0) * (elapsed_secs / 3600.0) / capacity_kwh * 100.0
}
