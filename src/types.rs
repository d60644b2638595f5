//! Readings, vehicle state and the per-tick decision context

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instantaneous site power snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerReading {
    /// PV production in W, never negative
    pub pv_production_w: i64,

    /// Net export in W, positive while exporting; `None` without meter data
    pub site_export_w: Option<i64>,
}

impl PowerReading {
    pub fn new(pv_production_w: i64, site_export_w: Option<i64>) -> Self {
        Self {
            pv_production_w: pv_production_w.max(0),
            site_export_w,
        }
    }

    /// Value the controller compares against its thresholds
    pub fn signal_w(&self) -> i64 {
        self.site_export_w.unwrap_or(self.pv_production_w)
    }
}

/// Result of a solar read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarReading {
    Reading(PowerReading),
    /// No credentials; distinct from a true zero production reading
    Unconfigured,
}

/// Vehicle charging state, vendor-reported or synthetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    Charging,
    Stopped,
    Complete,
    Disconnected,
    /// Synthetic: poll skipped
    Sleeping,
    Unknown,
    /// Synthetic: poll failed
    Error,
}

impl ChargingState {
    /// Map the vendor's `charging_state` string
    pub fn from_vendor(raw: &str) -> Self {
        match raw {
            "Charging" | "Starting" => ChargingState::Charging,
            "Stopped" | "NoPower" => ChargingState::Stopped,
            "Complete" => ChargingState::Complete,
            "Disconnected" => ChargingState::Disconnected,
            _ => ChargingState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargingState::Charging => "Charging",
            ChargingState::Stopped => "Stopped",
            ChargingState::Complete => "Complete",
            ChargingState::Disconnected => "Disconnected",
            ChargingState::Sleeping => "Sleeping",
            ChargingState::Unknown => "Unknown",
            ChargingState::Error => "Error",
        }
    }
}

impl fmt::Display for ChargingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vehicle telemetry used by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub plugged_in: bool,
    pub soc_percent: u8,
    pub charging_state: ChargingState,
    pub charger_actual_current_a: f64,
    pub charger_voltage_v: f64,
    pub charge_limit_soc: u8,
}

impl VehicleState {
    /// Stand-in used when a poll was skipped
    pub fn sleeping_placeholder() -> Self {
        Self::synthetic(ChargingState::Sleeping)
    }

    /// Stand-in used when a poll failed
    pub fn error_placeholder() -> Self {
        Self::synthetic(ChargingState::Error)
    }

    fn synthetic(charging_state: ChargingState) -> Self {
        Self {
            plugged_in: false,
            soc_percent: 0,
            charging_state,
            charger_actual_current_a: 0.0,
            charger_voltage_v: 0.0,
            charge_limit_soc: 0,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.charging_state == ChargingState::Charging
    }

    /// Measured charging power in W
    pub fn charging_power_w(&self) -> f64 {
        (self.charger_actual_current_a * self.charger_voltage_v).max(0.0)
    }
}

/// Where this tick's vehicle state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    Fresh,
    Cached,
    Placeholder,
}

/// Vehicle state tagged with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleObservation {
    pub state: VehicleState,
    pub source: ObservationSource,
}

impl VehicleObservation {
    pub fn fresh(state: VehicleState) -> Self {
        Self {
            state,
            source: ObservationSource::Fresh,
        }
    }

    pub fn cached(state: VehicleState) -> Self {
        Self {
            state,
            source: ObservationSource::Cached,
        }
    }

    pub fn placeholder(state: VehicleState) -> Self {
        Self {
            state,
            source: ObservationSource::Placeholder,
        }
    }

    /// Placeholders never say anything about the plug
    pub fn plug_status(&self) -> PlugStatus {
        match self.source {
            ObservationSource::Placeholder => PlugStatus::Unknown,
            _ if self.state.plugged_in => PlugStatus::Plugged,
            _ => PlugStatus::Unplugged,
        }
    }
}

/// Tri-state cable status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugStatus {
    Plugged,
    Unplugged,
    Unknown,
}

/// Everything the controller looks at for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionContext {
    pub reading: PowerReading,
    pub plug: PlugStatus,
    pub soc_percent: u8,
    pub high_production: bool,
}

impl DecisionContext {
    pub fn assemble(
        reading: PowerReading,
        vehicle: &VehicleObservation,
        start_threshold_w: i64,
    ) -> Self {
        Self {
            reading,
            plug: vehicle.plug_status(),
            soc_percent: vehicle.state.soc_percent,
            high_production: reading.signal_w() > start_threshold_w,
        }
    }
}

/// Acknowledgement of a vehicle command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Simulated without any network effect
    pub dry_run: bool,
}

impl Ack {
    pub fn confirmed() -> Self {
        Self { dry_run: false }
    }

    pub fn simulated() -> Self {
        Self { dry_run: true }
    }
}
