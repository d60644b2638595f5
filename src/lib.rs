//! # Solarcharge - Solar-Surplus EV Charging Controller
//!
//! Starts, stops and throttles a vehicle's charging session so that it
//! follows the surplus of a rooftop solar installation, while keeping the
//! number of vehicle API calls inside a hard daily budget.
//!
//! ## Features
//!
//! - **Threshold and dynamic control**: start/stop on export thresholds, or
//!   track the surplus with discrete amperage steps
//! - **Anti-flap**: minimum on/off times bound every state change
//! - **Polling budget**: a persisted 24h quota decides when the vehicle may be
//!   queried at all
//! - **Resilient gateways**: caching, pacing with jitter, retries and a
//!   circuit breaker in front of every remote read
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `clock`: Injectable time source and the shutdown signal
//! - `types`: Readings, vehicle telemetry and decision context
//! - `ports`: Collaborator traits for solar reads, vehicle reads and commands
//! - `daytime`: Daytime window used for night conservation
//! - `gateway`: Cache, pacing, retry and circuit breaker around remote reads
//! - `budget`: Vehicle polling budget
//! - `controller`: Charging decisions and their application
//! - `scheduler`: The control loop
//! - `persistence`: State persistence and recovery
//! - `clients`: SolarEdge and Tesla Fleet HTTP clients (feature `http`)

#[cfg(feature = "http")]
pub mod clients;

pub mod budget;
pub mod clock;
pub mod config;
pub mod controller;
pub mod daytime;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod persistence;
pub mod ports;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use controller::{Action, ChargeController};
pub use error::{ChargerError, Result};
pub use scheduler::{Collaborators, Scheduler, TickReport};
