//! Charging decision state machine
//!
//! [`ChargeController`] turns one [`DecisionContext`] into an [`Action`] and,
//! once the vehicle acknowledged the matching command, commits the new
//! charging state. The controller's own record of whether it is charging is
//! the only input to the hysteresis timers; vehicle telemetry can lag and is
//! never used to infer it.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::clock::{remaining, to_delta};
use crate::config::{ControlConfig, ControlMode, DynamicConfig};
use crate::logging::{StructuredLogger, get_logger};
use crate::ports::VehicleCommandPort;
use crate::types::{DecisionContext, PlugStatus, PowerReading};

/// Why charging should start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    ExportAboveStart,
    DynamicSolarAvailable,
}

impl StartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartReason::ExportAboveStart => "export_above_start",
            StartReason::DynamicSolarAvailable => "dynamic_solar_available",
        }
    }
}

/// Why charging should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Unplugged,
    SocCap,
    ExportBelowStop,
    InsufficientSolar,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Unplugged => "unplugged",
            StopReason::SocCap => "soc_cap",
            StopReason::ExportBelowStop => "export_below_stop",
            StopReason::InsufficientSolar => "insufficient_solar",
        }
    }
}

/// Why the amperage should change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustReason {
    DynamicStepAdjustment,
}

impl AdjustReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustReason::DynamicStepAdjustment => "dynamic_step_adjustment",
        }
    }
}

/// Why nothing happens this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// Already in the wanted state
    Steady,
    /// Signal between the stop and start thresholds
    Deadband,
    /// Off and the signal is at or below the stop threshold
    BelowStart,
    /// Transition wanted but the dwell time has not passed
    Hysteresis { remaining_secs: u64 },
    PlugUnknown,
    Unplugged,
    AtSocCap,
    InsufficientSolar,
    NoSolarData,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldReason::Steady => "steady",
            HoldReason::Deadband => "deadband",
            HoldReason::BelowStart => "below_start",
            HoldReason::Hysteresis { .. } => "hysteresis_blocked",
            HoldReason::PlugUnknown => "plug_unknown",
            HoldReason::Unplugged => "unplugged",
            HoldReason::AtSocCap => "at_soc_cap",
            HoldReason::InsufficientSolar => "insufficient_solar",
            HoldReason::NoSolarData => "no_solar_data",
        }
    }
}

/// Controller output for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None { hold: HoldReason },
    Start {
        reason: StartReason,
        amps: Option<u32>,
    },
    Stop { reason: StopReason },
    SetAmps { amps: u32, reason: AdjustReason },
}

impl Action {
    pub fn hold(reason: HoldReason) -> Self {
        Action::None { hold: reason }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Action::None { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::None { .. } => "none",
            Action::Start { .. } => "start",
            Action::Stop { .. } => "stop",
            Action::SetAmps { .. } => "set_amps",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Action::None { hold } => hold.as_str(),
            Action::Start { reason, .. } => reason.as_str(),
            Action::Stop { reason } => reason.as_str(),
            Action::SetAmps { reason, .. } => reason.as_str(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None {
                hold: HoldReason::Hysteresis { remaining_secs },
            } => write!(f, "none(hysteresis_blocked, {}s left)", remaining_secs),
            Action::Start {
                reason,
                amps: Some(a),
            } => write!(f, "start({}, {}A)", reason.as_str(), a),
            Action::SetAmps { amps, reason } => {
                write!(f, "set_amps({}A, {})", amps, reason.as_str())
            }
            other => write!(f, "{}({})", other.kind(), other.reason()),
        }
    }
}

/// Result of dispatching an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nothing to dispatch
    Nothing,
    /// Command acknowledged and state committed
    Committed { dry_run: bool },
    /// Command failed; state untouched
    Rejected { kind: &'static str, message: String },
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOutcome::Nothing => f.write_str("-"),
            ApplyOutcome::Committed { dry_run: true } => f.write_str("ok [dry-run]"),
            ApplyOutcome::Committed { dry_run: false } => f.write_str("ok"),
            ApplyOutcome::Rejected { kind, .. } => write!(f, "failed ({})", kind),
        }
    }
}

/// State owned by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRuntimeState {
    pub charging: bool,
    pub last_change: DateTime<Utc>,
    /// Last amperage the vehicle acknowledged
    pub commanded_amps: Option<u32>,
}

impl Default for ControllerRuntimeState {
    fn default() -> Self {
        Self {
            charging: false,
            last_change: DateTime::<Utc>::UNIX_EPOCH,
            commanded_amps: None,
        }
    }
}

/// Hysteresis state machine for start/stop/amperage decisions
pub struct ChargeController {
    control: ControlConfig,
    dynamic: DynamicConfig,
    state: ControllerRuntimeState,
    logger: StructuredLogger,
}

impl ChargeController {
    pub fn new(control: ControlConfig, dynamic: DynamicConfig) -> Self {
        Self {
            control,
            dynamic,
            state: ControllerRuntimeState::default(),
            logger: get_logger("controller"),
        }
    }

    pub fn state(&self) -> &ControllerRuntimeState {
        &self.state
    }

    pub fn is_charging(&self) -> bool {
        self.state.charging
    }

    pub fn start_threshold_w(&self) -> i64 {
        self.control.start_export_watts
    }

    /// Remaining dwell time before the transition to `want_on` is allowed
    fn dwell_remaining(&self, want_on: bool, now: DateTime<Utc>) -> Option<Duration> {
        let dwell = match (want_on, self.state.charging) {
            (true, false) => self.control.min_off(),
            (false, true) => self.control.min_on(),
            _ => return None,
        };
        let ready_at = self.state.last_change + to_delta(dwell);
        (now < ready_at).then(|| remaining(ready_at, now))
    }

    /// Hysteresis gate for a transition towards `want_on`
    pub fn allow(&self, want_on: bool, now: DateTime<Utc>) -> bool {
        self.dwell_remaining(want_on, now).is_none()
    }

    fn gated(&self, want_on: bool, now: DateTime<Utc>, action: Action) -> Action {
        match self.dwell_remaining(want_on, now) {
            None => action,
            Some(left) => {
                let remaining_secs = left.as_secs_f64().ceil() as u64;
                self.logger.debug(&format!(
                    "{} held by hysteresis for another {}s",
                    action, remaining_secs
                ));
                Action::hold(HoldReason::Hysteresis { remaining_secs })
            }
        }
    }

    /// House consumption assumed by dynamic mode
    pub fn house_load_w(&self) -> i64 {
        self.dynamic.house_load_watts.unwrap_or_else(|| {
            let rated = f64::from(self.dynamic.min_start_amps) * self.dynamic.charging_voltage;
            (self.control.start_export_watts - rated.round() as i64).max(0)
        })
    }

    /// Largest allowed amperage step covered by `available_w`.
    ///
    /// `None` when the power is below `min_dynamic_watts` or no step at or
    /// above `min_start_amps` fits.
    pub fn calculate_optimal_amps(&self, available_w: i64) -> Option<u32> {
        let d = &self.dynamic;
        if available_w <= 0 || available_w < d.min_dynamic_watts || d.charging_voltage <= 0.0 {
            return None;
        }
        let raw_amps = available_w as f64 / d.charging_voltage;
        d.amp_steps
            .iter()
            .copied()
            .filter(|s| *s >= d.min_amps && *s <= d.max_amps && f64::from(*s) <= raw_amps)
            .max()
            .filter(|s| *s >= d.min_start_amps)
    }

    /// Decide what to do this tick; pure with respect to controller state
    pub fn decide(&self, ctx: &DecisionContext, now: DateTime<Utc>) -> Action {
        let charging = self.state.charging;

        match ctx.plug {
            PlugStatus::Unknown => return Action::hold(HoldReason::PlugUnknown),
            PlugStatus::Unplugged => {
                return if charging {
                    Action::Stop {
                        reason: StopReason::Unplugged,
                    }
                } else {
                    Action::hold(HoldReason::Unplugged)
                };
            }
            PlugStatus::Plugged => {}
        }

        if ctx.soc_percent >= self.control.max_soc {
            return if charging {
                Action::Stop {
                    reason: StopReason::SocCap,
                }
            } else {
                Action::hold(HoldReason::AtSocCap)
            };
        }

        match self.control.mode {
            ControlMode::Threshold => self.decide_threshold(ctx.reading.signal_w(), now),
            ControlMode::Dynamic => self.decide_dynamic(&ctx.reading, now),
        }
    }

    fn decide_threshold(&self, signal: i64, now: DateTime<Utc>) -> Action {
        let start = self.control.start_export_watts;
        let stop = self.control.stop_export_watts;

        if self.state.charging {
            if signal <= stop {
                return self.gated(
                    false,
                    now,
                    Action::Stop {
                        reason: StopReason::ExportBelowStop,
                    },
                );
            }
            if signal < start {
                return Action::hold(HoldReason::Deadband);
            }
            return Action::hold(HoldReason::Steady);
        }

        if signal >= start {
            return self.gated(
                true,
                now,
                Action::Start {
                    reason: StartReason::ExportAboveStart,
                    amps: None,
                },
            );
        }
        if signal > stop {
            Action::hold(HoldReason::Deadband)
        } else {
            Action::hold(HoldReason::BelowStart)
        }
    }

    /// Power the vehicle draws at the last acknowledged step.
    ///
    /// Only counted while charging and when the signal is measured grid
    /// export, which already has the vehicle's draw taken out.
    pub fn own_draw_w(&self, reading: &PowerReading) -> i64 {
        if !self.state.charging || reading.site_export_w.is_none() {
            return 0;
        }
        self.state.commanded_amps.map_or(0, |amps| {
            (f64::from(amps) * self.dynamic.charging_voltage).round() as i64
        })
    }

    fn decide_dynamic(&self, reading: &PowerReading, now: DateTime<Utc>) -> Action {
        let available = reading.signal_w() + self.own_draw_w(reading) - self.house_load_w();
        let optimal = self.calculate_optimal_amps(available);

        match (optimal, self.state.charging) {
            (None, true) => self.gated(
                false,
                now,
                Action::Stop {
                    reason: StopReason::InsufficientSolar,
                },
            ),
            (None, false) => Action::hold(HoldReason::InsufficientSolar),
            (Some(amps), false) => self.gated(
                true,
                now,
                Action::Start {
                    reason: StartReason::DynamicSolarAvailable,
                    amps: Some(amps),
                },
            ),
            (Some(amps), true) if self.state.commanded_amps != Some(amps) => Action::SetAmps {
                amps,
                reason: AdjustReason::DynamicStepAdjustment,
            },
            (Some(_), true) => Action::hold(HoldReason::Steady),
        }
    }

    /// Dispatch `action` and commit the transition only on acknowledgement
    pub async fn apply(
        &mut self,
        action: Action,
        commands: &dyn VehicleCommandPort,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        match action {
            Action::None { hold } => {
                self.logger.debug(&format!("no action ({})", hold.as_str()));
                ApplyOutcome::Nothing
            }
            Action::Start { reason, amps } => {
                let mut amps_set = None;
                if let Some(a) = amps {
                    match commands.set_amps(a).await {
                        Ok(_) => amps_set = Some(a),
                        Err(e) => self
                            .logger
                            .warn(&format!("Setting {}A before start failed: {}", a, e)),
                    }
                }
                self.logger
                    .info(&format!("Starting charge ({})", reason.as_str()));
                match commands.start_charging().await {
                    Ok(ack) => {
                        self.state.charging = true;
                        self.state.last_change = now;
                        self.state.commanded_amps = amps_set;
                        ApplyOutcome::Committed {
                            dry_run: ack.dry_run,
                        }
                    }
                    Err(e) => self.rejected("start", e),
                }
            }
            Action::Stop { reason } => {
                self.logger
                    .info(&format!("Stopping charge ({})", reason.as_str()));
                match commands.stop_charging().await {
                    Ok(ack) => {
                        self.state.charging = false;
                        self.state.last_change = now;
                        self.state.commanded_amps = None;
                        ApplyOutcome::Committed {
                            dry_run: ack.dry_run,
                        }
                    }
                    Err(e) => self.rejected("stop", e),
                }
            }
            Action::SetAmps { amps, .. } => {
                self.logger
                    .info(&format!("Setting charge amps to {}", amps));
                match commands.set_amps(amps).await {
                    Ok(ack) => {
                        self.state.commanded_amps = Some(amps);
                        ApplyOutcome::Committed {
                            dry_run: ack.dry_run,
                        }
                    }
                    Err(e) => self.rejected("set_amps", e),
                }
            }
        }
    }

    fn rejected(&self, command: &str, err: crate::error::ChargerError) -> ApplyOutcome {
        self.logger
            .error(&format!("{} command failed, state unchanged: {}", command, err));
        ApplyOutcome::Rejected {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
