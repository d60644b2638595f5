//! Configuration management for Solarcharge
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable
//! overrides. Defaults are resolved once at load time; components receive
//! their section by reference and never look values up by name.

use crate::error::{ChargerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Charging decision thresholds and hysteresis
    pub control: ControlConfig,

    /// Dynamic-amperage parameters (used when `control.mode = dynamic`)
    pub dynamic: DynamicConfig,

    /// Scheduler cadence
    pub polling: PollingConfig,

    /// Vehicle API call budget
    pub budget: BudgetConfig,

    /// Resilience policies for the two remote data sources
    pub gateway: GatewayConfig,

    /// Daytime window used for night conservation
    pub daytime: DaytimeConfig,

    /// SolarEdge monitoring API
    pub solaredge: SolarEdgeConfig,

    /// Tesla Fleet API
    pub tesla: TeslaConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// State file for the polling budget
    pub persistence: PersistenceConfig,

    /// Simulate vehicle commands without touching the vehicle
    pub dry_run: bool,
}

/// Controller operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Start above one export threshold, stop below another
    Threshold,
    /// Track available surplus with discrete amperage steps
    Dynamic,
}

/// Charging decision thresholds and hysteresis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Export (or production) at or above which charging starts, in W
    pub start_export_watts: i64,

    /// Export (or production) at or below which charging stops, in W
    pub stop_export_watts: i64,

    /// Minimum time charging must stay on before it may be stopped
    pub min_on_seconds: u64,

    /// Minimum time charging must stay off before it may be started
    pub min_off_seconds: u64,

    /// State of charge cap in percent
    pub max_soc: u8,

    /// Threshold or dynamic control
    pub mode: ControlMode,
}

/// Dynamic-amperage parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    /// Lowest amperage the charger accepts
    pub min_amps: u32,

    /// Highest amperage we will ever command
    pub max_amps: u32,

    /// Allowed amperage steps, ascending
    pub amp_steps: Vec<u32>,

    /// Smallest step that may start a session
    pub min_start_amps: u32,

    /// Available power below which dynamic charging is considered insufficient
    pub min_dynamic_watts: i64,

    /// Charging voltage used to convert watts to amps
    pub charging_voltage: f64,

    /// Fixed house load in W; inferred from thresholds when absent
    pub house_load_watts: Option<i64>,
}

/// Scheduler cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval while production is high and the vehicle is charging
    pub fast_seconds: u64,

    /// Default daytime interval
    pub medium_seconds: u64,

    /// Night interval
    pub slow_seconds: u64,

    /// Sleep after a failed iteration
    pub error_backoff_seconds: u64,

    /// Solar production, as a percentage of the start threshold, required
    /// before the vehicle is worth polling
    pub wake_threshold_percent: f64,

    /// Wake the vehicle when a poll finds it asleep
    pub wake_vehicle: bool,
}

/// Vehicle API call budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Hard cap of vehicle polls per rolling 24h window
    pub max_daily_calls: u32,

    /// Never poll more often than this
    pub min_interval_seconds: u64,

    /// Always poll when the last poll is older than this
    pub absolute_max_seconds: u64,

    /// Poll interval while idle (not charging)
    pub long_idle_seconds: u64,

    /// Poll interval at night while not charging
    pub night_interval_seconds: u64,

    /// Usable battery capacity for SOC drift estimation
    pub battery_capacity_kwh: f64,

    /// Expected SOC change that justifies a poll while charging
    pub soc_delta_threshold_percent: f64,
}

/// Resilience policy of a single gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayPolicyConfig {
    /// Minimum spacing between network calls
    pub min_interval_ms: u64,

    /// Lower bound of the random factor applied to the spacing
    pub jitter_min: f64,

    /// Upper bound of the random factor applied to the spacing
    pub jitter_max: f64,

    /// Attempts per fetch including the first one
    pub max_attempts: u32,

    /// First backoff delay
    pub base_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,

    /// Failures in a row that open the circuit
    pub max_consecutive_failures: u32,

    /// How long an open circuit rejects calls
    pub circuit_cooldown_seconds: u64,

    /// Upper bound for a server supplied Retry-After
    pub max_retry_after_seconds: u64,

    /// Per-request HTTP timeout
    pub request_timeout_seconds: u64,
}

/// Resilience policies for the two remote data sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub solar: GatewayPolicyConfig,
    pub vehicle: GatewayPolicyConfig,
}

/// Where the daytime window comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaytimeSource {
    /// Fixed local hours
    Fixed,
    /// Treat every moment as daytime
    Always,
}

/// Daytime window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaytimeConfig {
    pub source: DaytimeSource,

    /// IANA timezone name for the local hours
    pub timezone: String,

    /// Start of daytime, local "HH:MM"
    pub start: String,

    /// End of daytime, local "HH:MM"
    pub end: String,
}

/// SolarEdge monitoring API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolarEdgeConfig {
    pub base_url: String,

    /// Monitoring API key
    #[serde(skip_serializing)]
    pub api_key: String,

    pub site_id: String,

    /// Cache TTL of the primary current-power-flow endpoint
    pub primary_ttl_seconds: u64,

    /// Cache TTL of the fallback overview endpoint
    pub fallback_ttl_seconds: u64,
}

/// Tesla Fleet API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeslaConfig {
    /// Fleet API base URL for reads
    pub base_url: String,

    /// Vehicle command proxy URL for signed commands
    pub command_proxy_url: String,

    /// Accept the proxy's self-signed certificate
    pub accept_invalid_proxy_certs: bool,

    #[serde(skip_serializing)]
    pub access_token: String,

    pub vehicle_vin: String,

    /// Wake attempts before a command gives up
    pub wake_attempts: u32,

    /// Wait after the first wake request
    pub wake_base_wait_seconds: u64,

    /// Additional wait per subsequent wake attempt
    pub wake_step_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// State persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub state_file: String,
}

impl ControlConfig {
    pub fn min_on(&self) -> Duration {
        Duration::from_secs(self.min_on_seconds)
    }

    pub fn min_off(&self) -> Duration {
        Duration::from_secs(self.min_off_seconds)
    }
}

impl PollingConfig {
    pub fn fast(&self) -> Duration {
        Duration::from_secs(self.fast_seconds)
    }

    pub fn medium(&self) -> Duration {
        Duration::from_secs(self.medium_seconds)
    }

    pub fn slow(&self) -> Duration {
        Duration::from_secs(self.slow_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "solarcharge.yaml",
            "config.yaml",
            "/etc/solarcharge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Override secrets and identifiers from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str, target: &mut String| {
            if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = v.trim().to_string();
            }
        };
        set(
            "SOLARCHARGE_TESLA_ACCESS_TOKEN",
            &mut self.tesla.access_token,
        );
        set("SOLARCHARGE_TESLA_VIN", &mut self.tesla.vehicle_vin);
        set("SOLARCHARGE_SOLAREDGE_API_KEY", &mut self.solaredge.api_key);
        set("SOLARCHARGE_SOLAREDGE_SITE_ID", &mut self.solaredge.site_id);
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let c = &self.control;
        if c.start_export_watts <= c.stop_export_watts {
            return Err(ChargerError::validation(
                "control.start_export_watts",
                "Must be strictly greater than control.stop_export_watts",
            ));
        }
        if c.max_soc == 0 || c.max_soc > 100 {
            return Err(ChargerError::validation(
                "control.max_soc",
                "Must be within 1..=100",
            ));
        }

        self.validate_dynamic()?;

        let p = &self.polling;
        if p.fast_seconds == 0 || p.medium_seconds == 0 || p.slow_seconds == 0 {
            return Err(ChargerError::validation(
                "polling",
                "Intervals must be greater than 0",
            ));
        }
        if p.wake_threshold_percent < 0.0 {
            return Err(ChargerError::validation(
                "polling.wake_threshold_percent",
                "Must not be negative",
            ));
        }

        let b = &self.budget;
        if b.max_daily_calls == 0 {
            return Err(ChargerError::validation(
                "budget.max_daily_calls",
                "Must be greater than 0",
            ));
        }
        if b.min_interval_seconds > b.absolute_max_seconds {
            return Err(ChargerError::validation(
                "budget.min_interval_seconds",
                "Must not exceed budget.absolute_max_seconds",
            ));
        }
        if b.battery_capacity_kwh <= 0.0 {
            return Err(ChargerError::validation(
                "budget.battery_capacity_kwh",
                "Must be positive",
            ));
        }

        let gateways = [
            ("gateway.solar", &self.gateway.solar),
            ("gateway.vehicle", &self.gateway.vehicle),
        ];
        for (name, g) in gateways {
            if g.max_attempts == 0 {
                return Err(ChargerError::validation(
                    name,
                    "max_attempts must be at least 1",
                ));
            }
            if g.jitter_min <= 0.0 || g.jitter_min > g.jitter_max {
                return Err(ChargerError::validation(
                    name,
                    "jitter range must satisfy 0 < jitter_min <= jitter_max",
                ));
            }
            if g.max_consecutive_failures == 0 {
                return Err(ChargerError::validation(
                    name,
                    "max_consecutive_failures must be at least 1",
                ));
            }
        }

        if self.daytime.source == DaytimeSource::Fixed {
            crate::daytime::FixedHoursWindow::from_config(&self.daytime)?;
        }

        Ok(())
    }

    fn validate_dynamic(&self) -> Result<()> {
        let d = &self.dynamic;
        if d.amp_steps.is_empty() {
            return Err(ChargerError::validation(
                "dynamic.amp_steps",
                "Must contain at least one step",
            ));
        }
        if d.amp_steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ChargerError::validation(
                "dynamic.amp_steps",
                "Must be strictly ascending",
            ));
        }
        if d.min_amps > d.max_amps {
            return Err(ChargerError::validation(
                "dynamic.min_amps",
                "Must not exceed dynamic.max_amps",
            ));
        }
        if !d
            .amp_steps
            .iter()
            .any(|s| *s >= d.min_start_amps && *s >= d.min_amps && *s <= d.max_amps)
        {
            return Err(ChargerError::validation(
                "dynamic.min_start_amps",
                "No allowed step satisfies min_start_amps within min/max amps",
            ));
        }
        if d.charging_voltage <= 0.0 {
            return Err(ChargerError::validation(
                "dynamic.charging_voltage",
                "Must be positive",
            ));
        }
        Ok(())
    }

    /// Fatal startup check for credentials and identifiers
    pub fn require_credentials(&self) -> Result<()> {
        if self.tesla.vehicle_vin.trim().is_empty() {
            return Err(ChargerError::config("Tesla VIN not configured"));
        }
        if self.tesla.access_token.trim().is_empty() {
            return Err(ChargerError::config("Tesla access token not configured"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.control.start_export_watts, 3500);
        assert_eq!(config.control.stop_export_watts, 1500);
        assert_eq!(config.control.max_soc, 80);
        assert_eq!(config.control.mode, ControlMode::Threshold);
        assert_eq!(config.dynamic.amp_steps, vec![8, 10, 12]);
        assert!(config.dry_run);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        // Deadband must be positive
        config.control.stop_export_watts = config.control.start_export_watts;
        assert!(config.validate().is_err());

        config = Config::default();
        config.dynamic.amp_steps = vec![10, 8];
        assert!(config.validate().is_err());

        config = Config::default();
        config.budget.max_daily_calls = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.gateway.solar.jitter_min = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "control:\n  start_export_watts: 4200\n  mode: dynamic\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.control.start_export_watts, 4200);
        assert_eq!(config.control.stop_export_watts, 1500);
        assert_eq!(config.control.mode, ControlMode::Dynamic);
        assert_eq!(config.budget.max_daily_calls, 200);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_from(|key| match key {
            "SOLARCHARGE_TESLA_VIN" => Some("5YJ3E1EA7KF000001".to_string()),
            "SOLARCHARGE_TESLA_ACCESS_TOKEN" => Some("  tok  ".to_string()),
            "SOLARCHARGE_SOLAREDGE_API_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.tesla.vehicle_vin, "5YJ3E1EA7KF000001");
        assert_eq!(config.tesla.access_token, "tok");
        assert!(config.solaredge.api_key.is_empty());
        assert!(config.require_credentials().is_ok());
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let config = Config::default();
        let err = config.require_credentials().unwrap_err();
        assert!(matches!(err, ChargerError::Config { .. }));
    }
}
