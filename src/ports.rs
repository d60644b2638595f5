//! Collaborator contracts consumed by the control loop

use crate::error::Result;
use crate::types::{Ack, SolarReading, VehicleState};

/// Source of site production and export
#[async_trait::async_trait]
pub trait SolarReadPort: Send + Sync {
    async fn read_production(&self) -> Result<SolarReading>;
}

/// Source of vehicle telemetry
#[async_trait::async_trait]
pub trait VehicleReadPort: Send + Sync {
    /// Errors with `VehicleNotFound`, `AuthExpired` or `Unavailable`
    async fn read_state(&self, wake_if_asleep: bool) -> Result<VehicleState>;
}

/// Charging commands; each call is safe to repeat
#[async_trait::async_trait]
pub trait VehicleCommandPort: Send + Sync {
    async fn start_charging(&self) -> Result<Ack>;
    async fn stop_charging(&self) -> Result<Ack>;
    async fn set_amps(&self, amps: u32) -> Result<Ack>;
}
