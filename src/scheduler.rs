//! Control loop
//!
//! The [`Scheduler`] owns the controller, the polling budget and the last
//! known readings. One [`Scheduler::tick`] reads solar production, decides
//! whether the vehicle may be polled, assembles the decision context, lets
//! the controller decide and dispatches the action. [`Scheduler::run`]
//! repeats ticks until shutdown, containing every failure at the loop
//! boundary.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::budget::{PollDecision, PollQuery, PollingBudgetTracker};
use crate::clock::{Clock, ShutdownSignal};
use crate::config::{Config, PollingConfig};
use crate::controller::{Action, ApplyOutcome, ChargeController, HoldReason};
use crate::daytime::DaytimeWindow;
use crate::error::{ChargerError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::PersistenceManager;
use crate::ports::{SolarReadPort, VehicleCommandPort, VehicleReadPort};
use crate::types::{
    DecisionContext, ObservationSource, PowerReading, SolarReading, VehicleObservation,
    VehicleState,
};

/// Everything the scheduler talks to
pub struct Collaborators {
    pub solar: Arc<dyn SolarReadPort>,
    pub vehicle: Arc<dyn VehicleReadPort>,
    pub commands: Arc<dyn VehicleCommandPort>,
    pub daytime: Box<dyn DaytimeWindow>,
    pub clock: Arc<dyn Clock>,
}

/// Solar data used this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarObservation {
    Fresh(PowerReading),
    /// Read failed; last good reading reused
    Stale(PowerReading),
    Unconfigured,
    /// Read failed and nothing to fall back on
    Missing,
}

impl SolarObservation {
    pub fn reading(&self) -> Option<PowerReading> {
        match self {
            SolarObservation::Fresh(r) | SolarObservation::Stale(r) => Some(*r),
            _ => None,
        }
    }
}

/// Something that was deliberately not done this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SolarUnconfigured,
    SolarFetchFailed { kind: &'static str },
    BelowWakeThreshold { solar_w: i64, required_w: i64 },
    Budget(PollDecision),
    VehicleFetchFailed { kind: &'static str },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SolarUnconfigured => f.write_str("solar:unconfigured"),
            SkipReason::SolarFetchFailed { kind } => write!(f, "solar:{}", kind),
            SkipReason::BelowWakeThreshold {
                solar_w,
                required_w,
            } => write!(f, "vehicle:below_wake_threshold({}<{}W)", solar_w, required_w),
            SkipReason::Budget(d) => write!(f, "vehicle:{}", d.reason),
            SkipReason::VehicleFetchFailed { kind } => write!(f, "vehicle:{}", kind),
        }
    }
}

/// Summary of one iteration; `Display` is the compact status line
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub daytime: bool,
    pub solar: SolarObservation,
    pub vehicle: VehicleObservation,
    pub poll: Option<PollDecision>,
    pub action: Action,
    pub outcome: ApplyOutcome,
    pub skips: Vec<SkipReason>,
    pub next_sleep: Duration,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.at.format("%H:%M:%S"))?;
        match self.solar.reading() {
            Some(r) => {
                write!(f, "solar={:.2}kW", r.pv_production_w as f64 / 1000.0)?;
                if let Some(export) = r.site_export_w {
                    write!(f, " export={:+.2}kW", export as f64 / 1000.0)?;
                }
                if matches!(self.solar, SolarObservation::Stale(_)) {
                    f.write_str(" (stale)")?;
                }
            }
            None => f.write_str("solar=n/a")?,
        }
        match self.vehicle.source {
            ObservationSource::Placeholder => {
                write!(f, " soc=? [{}]", self.vehicle.state.charging_state)?
            }
            source => write!(
                f,
                " soc={}% [{}{}]",
                self.vehicle.state.soc_percent,
                self.vehicle.state.charging_state,
                if source == ObservationSource::Cached {
                    ", cached"
                } else {
                    ""
                }
            )?,
        }
        write!(f, " action={}", self.action)?;
        if self.outcome != ApplyOutcome::Nothing {
            write!(f, " result={}", self.outcome)?;
        }
        if !self.skips.is_empty() {
            let skips: Vec<String> = self.skips.iter().map(ToString::to_string).collect();
            write!(f, " skipped={}", skips.join(","))?;
        }
        write!(f, " next={}s", self.next_sleep.as_secs())
    }
}

/// Loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_ticks: u64,
    pub failed_ticks: u64,
}

/// Orchestrates solar reads, vehicle polls, decisions and commands
pub struct Scheduler {
    polling: PollingConfig,
    controller: ChargeController,
    budget: PollingBudgetTracker,
    solar: Arc<dyn SolarReadPort>,
    vehicle: Arc<dyn VehicleReadPort>,
    commands: Arc<dyn VehicleCommandPort>,
    daytime: Box<dyn DaytimeWindow>,
    clock: Arc<dyn Clock>,
    persistence: Option<PersistenceManager>,
    last_solar: Option<PowerReading>,
    last_vehicle: Option<VehicleState>,
    status_tx: broadcast::Sender<String>,
    stats: SchedulerStats,
    logger: StructuredLogger,
}

impl Scheduler {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let now = collaborators.clock.now();
        let (status_tx, _) = broadcast::channel(64);
        Self {
            polling: config.polling.clone(),
            controller: ChargeController::new(config.control.clone(), config.dynamic.clone()),
            budget: PollingBudgetTracker::new(config.budget.clone(), now),
            solar: collaborators.solar,
            vehicle: collaborators.vehicle,
            commands: collaborators.commands,
            daytime: collaborators.daytime,
            clock: collaborators.clock,
            persistence: None,
            last_solar: None,
            last_vehicle: None,
            status_tx,
            stats: SchedulerStats::default(),
            logger: get_logger("scheduler"),
        }
    }

    /// Attach state persistence, resuming any saved polling budget
    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        if let Some(saved) = persistence.budget().cloned() {
            let now = self.clock.now();
            self.budget = PollingBudgetTracker::restore(self.budget.config().clone(), saved, now);
            self.logger.info(&format!(
                "Restored polling budget: {} calls left in window",
                self.budget.remaining_calls()
            ));
        }
        self.persistence = Some(persistence);
        self
    }

    pub fn controller(&self) -> &ChargeController {
        &self.controller
    }

    pub fn budget(&self) -> &PollingBudgetTracker {
        &self.budget
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Receive every status line
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Sleep hint for the next iteration
    pub fn next_interval(&self, daytime: bool, high_production: bool) -> Duration {
        if !daytime {
            return self.polling.slow();
        }
        if high_production && self.controller.is_charging() {
            self.polling.fast()
        } else {
            self.polling.medium()
        }
    }

    /// Run one iteration.
    ///
    /// Remote failures are downgraded to cached or placeholder data. Only
    /// `AuthExpired`, `VehicleNotFound` and `Shutdown` end the tick early;
    /// none of them issues a command.
    pub async fn tick(&mut self) -> Result<TickReport> {
        self.stats.total_ticks += 1;
        let now = self.clock.now();
        let daytime = self.daytime.is_daytime(now);
        let mut skips = Vec::new();

        let solar = self.observe_solar(&mut skips).await?;
        let (vehicle, poll) = self
            .observe_vehicle(now, daytime, solar.reading(), &mut skips)
            .await?;

        let start_threshold = self.controller.start_threshold_w();
        let (action, high_production) = match solar.reading() {
            Some(reading) => {
                let ctx = DecisionContext::assemble(reading, &vehicle, start_threshold);
                (self.controller.decide(&ctx, now), ctx.high_production)
            }
            None => (Action::hold(HoldReason::NoSolarData), false),
        };

        let outcome = self
            .controller
            .apply(action, self.commands.as_ref(), now)
            .await;

        let report = TickReport {
            at: now,
            daytime,
            solar,
            vehicle,
            poll,
            action,
            outcome,
            skips,
            next_sleep: self.next_interval(daytime, high_production),
        };
        for skip in &report.skips {
            self.logger.debug(&format!("skipped {}", skip));
        }
        let _ = self.status_tx.send(report.to_string());
        Ok(report)
    }

    async fn observe_solar(&mut self, skips: &mut Vec<SkipReason>) -> Result<SolarObservation> {
        match self.solar.read_production().await {
            Ok(SolarReading::Reading(reading)) => {
                self.last_solar = Some(reading);
                Ok(SolarObservation::Fresh(reading))
            }
            Ok(SolarReading::Unconfigured) => {
                skips.push(SkipReason::SolarUnconfigured);
                Ok(SolarObservation::Unconfigured)
            }
            Err(ChargerError::Shutdown) => Err(ChargerError::Shutdown),
            Err(e) => {
                self.logger.warn(&format!("Solar read failed: {}", e));
                skips.push(SkipReason::SolarFetchFailed { kind: e.kind() });
                Ok(self
                    .last_solar
                    .map_or(SolarObservation::Missing, SolarObservation::Stale))
            }
        }
    }

    fn wake_threshold_w(&self) -> i64 {
        let start = self.controller.start_threshold_w() as f64;
        (start * self.polling.wake_threshold_percent / 100.0).round() as i64
    }

    fn fallback_vehicle(&self, placeholder: VehicleState) -> VehicleObservation {
        match &self.last_vehicle {
            Some(state) => VehicleObservation::cached(state.clone()),
            None => VehicleObservation::placeholder(placeholder),
        }
    }

    async fn observe_vehicle(
        &mut self,
        now: DateTime<Utc>,
        daytime: bool,
        solar: Option<PowerReading>,
        skips: &mut Vec<SkipReason>,
    ) -> Result<(VehicleObservation, Option<PollDecision>)> {
        let known_charging = self.controller.is_charging()
            || self.last_vehicle.as_ref().is_some_and(VehicleState::is_charging);

        let solar_w = solar.map_or(0, |r| r.pv_production_w);
        let required_w = self.wake_threshold_w();
        if !known_charging && !self.budget.unconditional_due(now) && solar_w < required_w {
            skips.push(SkipReason::BelowWakeThreshold {
                solar_w,
                required_w,
            });
            return Ok((
                self.fallback_vehicle(VehicleState::sleeping_placeholder()),
                None,
            ));
        }

        let last_charging_power_w = self.budget.budget().last_known_charging_power_w;
        let decision = self.budget.should_poll(
            now,
            PollQuery {
                is_charging: known_charging,
                last_charging_power_w,
                daytime,
                force: false,
            },
        );
        if !decision.poll {
            skips.push(SkipReason::Budget(decision));
            return Ok((
                self.fallback_vehicle(VehicleState::sleeping_placeholder()),
                Some(decision),
            ));
        }

        self.logger
            .debug(&format!("polling vehicle ({})", decision.reason));
        match self.vehicle.read_state(self.polling.wake_vehicle).await {
            Ok(state) => {
                self.record_poll(now, state.charging_power_w());
                self.last_vehicle = Some(state.clone());
                Ok((VehicleObservation::fresh(state), Some(decision)))
            }
            Err(ChargerError::Shutdown) => Err(ChargerError::Shutdown),
            Err(e) => {
                if reached_remote(&e) {
                    let power = self.budget.budget().last_known_charging_power_w;
                    self.record_poll(now, power);
                }
                if matches!(
                    e,
                    ChargerError::AuthExpired { .. } | ChargerError::VehicleNotFound { .. }
                ) {
                    return Err(e);
                }
                self.logger.warn(&format!("Vehicle read failed: {}", e));
                skips.push(SkipReason::VehicleFetchFailed { kind: e.kind() });
                Ok((
                    self.fallback_vehicle(VehicleState::error_placeholder()),
                    Some(decision),
                ))
            }
        }
    }

    fn record_poll(&mut self, now: DateTime<Utc>, charging_power_w: f64) {
        self.budget.record_poll(now, charging_power_w);
        if let Some(persistence) = self.persistence.as_mut() {
            persistence.set_budget(self.budget.budget().clone());
            if let Err(e) = persistence.save(now) {
                self.logger
                    .warn(&format!("Failed to persist polling budget: {}", e));
            }
        }
    }

    /// Tick until `shutdown` fires
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<()> {
        self.logger.info("Scheduler started");
        loop {
            if shutdown.is_triggered() {
                break;
            }
            let sleep = match self.tick().await {
                Ok(report) => {
                    self.logger.debug(&report.to_string());
                    report.next_sleep
                }
                Err(ChargerError::Shutdown) => break,
                Err(e) => {
                    self.stats.failed_ticks += 1;
                    self.logger.error(&format!(
                        "Error in control loop; backing off {}s: {}",
                        self.polling.error_backoff_seconds, e
                    ));
                    self.polling.error_backoff()
                }
            };
            if !shutdown.sleep(self.clock.as_ref(), sleep).await {
                break;
            }
        }
        self.logger.info(&format!(
            "Scheduler stopped after {} ticks ({} failed)",
            self.stats.total_ticks, self.stats.failed_ticks
        ));
        Ok(())
    }
}

/// Whether the vehicle API answered, so the call used budget
fn reached_remote(err: &ChargerError) -> bool {
    matches!(
        err,
        ChargerError::Api { .. }
            | ChargerError::AuthExpired { .. }
            | ChargerError::VehicleNotFound { .. }
            | ChargerError::Unavailable { .. }
            | ChargerError::RateLimited { .. }
            | ChargerError::Malformed { .. }
    )
}
