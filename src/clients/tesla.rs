//! Tesla Fleet API client
//!
//! Reads go straight to the Fleet API through a [`ResilientGateway`].
//! Commands go to the vehicle command proxy, which signs them for the
//! vehicle; the proxy usually serves a self-signed certificate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use super::{finite, read_json, user_agent};
use crate::clock::{Clock, ShutdownSignal};
use crate::config::{GatewayPolicyConfig, TeslaConfig};
use crate::error::{ChargerError, Result};
use crate::gateway::{GatewayPolicy, GatewayStats, ResilientGateway};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::ports::{VehicleCommandPort, VehicleReadPort};
use crate::types::{Ack, ChargingState, VehicleState};

const CHARGE_START: &str = "charge_start";
const CHARGE_STOP: &str = "charge_stop";
const SET_CHARGING_AMPS: &str = "set_charging_amps";

pub struct TeslaFleetClient {
    http: reqwest::Client,
    proxy: reqwest::Client,
    base_url: String,
    proxy_url: String,
    access_token: String,
    vin: String,
    wake_attempts: u32,
    wake_base_wait: Duration,
    wake_step: Duration,
    dry_run: bool,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    gateway: ResilientGateway,
    logger: StructuredLogger,
}

impl TeslaFleetClient {
    pub fn new(
        config: &TeslaConfig,
        policy: &GatewayPolicyConfig,
        dry_run: bool,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(policy.request_timeout_seconds);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()?;
        let proxy = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .danger_accept_invalid_certs(config.accept_invalid_proxy_certs)
            .build()?;
        let vin = config.vehicle_vin.trim().to_string();

        Ok(Self {
            http,
            proxy,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            proxy_url: config.command_proxy_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.trim().to_string(),
            wake_attempts: config.wake_attempts,
            wake_base_wait: Duration::from_secs(config.wake_base_wait_seconds),
            wake_step: Duration::from_secs(config.wake_step_seconds),
            dry_run,
            gateway: ResilientGateway::new(
                "vehicle",
                GatewayPolicy::from(policy),
                clock.clone(),
                shutdown.clone(),
            ),
            clock,
            shutdown,
            logger: get_logger_with_context(LogContext::new("tesla").with_vehicle(&vin)),
            vin,
        })
    }

    pub fn gateway_stats(&self) -> GatewayStats {
        self.gateway.stats()
    }

    fn vehicle_url(&self, base: &str, suffix: &str) -> String {
        format!("{}/api/1/vehicles/{}{}", base, self.vin, suffix)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn post_json(&self, client: &reqwest::Client, url: &str, body: &Value) -> Result<Value> {
        let resp = client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        read_json(resp).await
    }

    /// Online state of the configured vehicle from the account's vehicle list
    async fn online_state(&self) -> Result<String> {
        let url = format!("{}/api/1/vehicles", self.base_url);
        let (url, vin) = (url.as_str(), self.vin.as_str());
        let body = self
            .gateway
            .fetch("vehicles", &[], None, move || async move {
                let body = self.get_json(url).await?;
                find_vehicle(&body, vin)?;
                Ok(body)
            })
            .await?;
        find_vehicle(&body, vin)
    }

    async fn vehicle_data(&self) -> Result<VehicleState> {
        let url = self.vehicle_url(&self.base_url, "/vehicle_data");
        let url = url.as_str();
        let body = self
            .gateway
            .fetch("vehicle_data", &[("vin", self.vin.as_str())], None, move || async move {
                let body = self.get_json(url).await?;
                parse_vehicle_data(&body)?;
                Ok(body)
            })
            .await?;
        parse_vehicle_data(&body)
    }

    fn wake_wait(&self, attempt: u32) -> Duration {
        self.wake_base_wait + self.wake_step * attempt
    }

    /// Send one wake request and give the vehicle time to come up.
    ///
    /// Returns `true` when the wake response already reports the vehicle
    /// online, in which case no wait is done.
    async fn wake_once(&self, attempt: u32) -> Result<bool> {
        self.logger.info(&format!(
            "Wake attempt {}/{}",
            attempt + 1,
            self.wake_attempts
        ));
        let url = self.vehicle_url(&self.base_url, "/wake_up");
        match self.post_json(&self.http, &url, &json!({})).await {
            Ok(body) if body.pointer("/response/state").and_then(Value::as_str) == Some("online") => {
                return Ok(true);
            }
            Ok(_) => {}
            Err(e @ (ChargerError::AuthExpired { .. } | ChargerError::Shutdown)) => return Err(e),
            Err(e) => self.logger.warn(&format!("Wake request failed: {}", e)),
        }

        let wait = self.wake_wait(attempt);
        self.logger
            .info(&format!("Waiting {}s for vehicle to wake", wait.as_secs()));
        if !self.shutdown.sleep(self.clock.as_ref(), wait).await {
            return Err(ChargerError::Shutdown);
        }
        Ok(false)
    }

    /// Wake the vehicle, confirming through the vehicle list
    async fn wake(&self) -> Result<()> {
        for attempt in 0..self.wake_attempts {
            if self.wake_once(attempt).await? {
                return Ok(());
            }
            match self.online_state().await {
                Ok(state) if state == "online" => return Ok(()),
                Ok(state) => self.logger.debug(&format!("vehicle still {}", state)),
                Err(e @ (ChargerError::AuthExpired { .. }
                | ChargerError::VehicleNotFound { .. }
                | ChargerError::Shutdown)) => return Err(e),
                Err(e) => self.logger.debug(&format!("wake check failed: {}", e)),
            }
        }
        Err(ChargerError::unavailable(format!(
            "vehicle did not wake after {} attempts",
            self.wake_attempts
        )))
    }

    async fn send_command(&self, command: &str, body: &Value) -> Result<()> {
        let url = self.vehicle_url(&self.proxy_url, &format!("/command/{}", command));
        let response = self.post_json(&self.proxy, &url, body).await?;
        parse_command_result(command, &response)
    }

    /// Run `command`, waking the vehicle and retrying while it reports
    /// itself asleep or offline. Every failure other than shutdown is
    /// reported as `CommandFailed`.
    pub async fn ensure_awake_then_command(&self, command: &str, body: Value) -> Result<Ack> {
        if self.dry_run {
            self.logger.info(&format!(
                "[DRY-RUN] Would send {} {}",
                command, body
            ));
            return Ok(Ack::simulated());
        }

        let mut last_error = match self.send_command(command, &body).await {
            Ok(()) => return Ok(self.confirmed(command)),
            Err(ChargerError::Shutdown) => return Err(ChargerError::Shutdown),
            Err(e @ ChargerError::Unavailable { .. }) => e,
            Err(e) => return Err(ChargerError::command_failed(command, e.to_string())),
        };

        self.logger.info(&format!(
            "Vehicle unavailable for {}; starting wake sequence",
            command
        ));
        for attempt in 0..self.wake_attempts {
            match self.wake_once(attempt).await {
                Ok(_) => {}
                Err(ChargerError::Shutdown) => return Err(ChargerError::Shutdown),
                Err(e) => return Err(ChargerError::command_failed(command, e.to_string())),
            }
            match self.send_command(command, &body).await {
                Ok(()) => return Ok(self.confirmed(command)),
                Err(ChargerError::Shutdown) => return Err(ChargerError::Shutdown),
                Err(e @ ChargerError::Unavailable { .. }) => {
                    self.logger.warn(&format!(
                        "Attempt {} failed, vehicle still asleep: {}",
                        attempt + 1,
                        e
                    ));
                    last_error = e;
                }
                Err(e) => return Err(ChargerError::command_failed(command, e.to_string())),
            }
        }
        Err(ChargerError::command_failed(
            command,
            format!(
                "vehicle did not wake after {} attempts: {}",
                self.wake_attempts, last_error
            ),
        ))
    }

    fn confirmed(&self, command: &str) -> Ack {
        self.logger.info(&format!("{} acknowledged", command));
        Ack::confirmed()
    }
}

#[async_trait::async_trait]
impl VehicleReadPort for TeslaFleetClient {
    async fn read_state(&self, wake_if_asleep: bool) -> Result<VehicleState> {
        let state = self.online_state().await?;
        self.logger.debug(&format!("vehicle is {}", state));
        if is_dormant(&state) {
            if !wake_if_asleep {
                return Err(ChargerError::unavailable(format!("vehicle is {}", state)));
            }
            self.logger
                .info(&format!("Vehicle is {}, attempting to wake", state));
            self.wake().await?;
        }
        self.vehicle_data().await
    }
}

#[async_trait::async_trait]
impl VehicleCommandPort for TeslaFleetClient {
    async fn start_charging(&self) -> Result<Ack> {
        self.ensure_awake_then_command(CHARGE_START, json!({})).await
    }

    async fn stop_charging(&self) -> Result<Ack> {
        self.ensure_awake_then_command(CHARGE_STOP, json!({})).await
    }

    async fn set_amps(&self, amps: u32) -> Result<Ack> {
        self.ensure_awake_then_command(SET_CHARGING_AMPS, json!({ "charging_amps": amps }))
            .await
    }
}

fn is_dormant(state: &str) -> bool {
    matches!(state, "asleep" | "offline")
}

/// Online state (`online`, `asleep`, `offline`, ...) of `vin` in a vehicle list body
pub fn find_vehicle(body: &Value, vin: &str) -> Result<String> {
    let vehicles = body
        .get("response")
        .and_then(Value::as_array)
        .ok_or_else(|| ChargerError::malformed("vehicle list has no response array"))?;
    vehicles
        .iter()
        .find(|v| v.get("vin").and_then(Value::as_str) == Some(vin))
        .map(|v| {
            v.get("state")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string()
        })
        .ok_or_else(|| ChargerError::vehicle_not_found(vin))
}

fn number(section: &Value, key: &str, default: f64) -> Result<f64> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => {
            let n = v
                .as_f64()
                .ok_or_else(|| ChargerError::malformed(format!("{} is not a number", key)))?;
            finite(n, key)
        }
    }
}

fn percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Parse a `vehicle_data` body into the telemetry the controller uses
pub fn parse_vehicle_data(body: &Value) -> Result<VehicleState> {
    let charge = body
        .pointer("/response/charge_state")
        .filter(|v| v.is_object())
        .ok_or_else(|| ChargerError::malformed("missing response.charge_state"))?;

    let raw_state = charge
        .get("charging_state")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");

    Ok(VehicleState {
        plugged_in: raw_state != "Disconnected",
        soc_percent: percent(number(charge, "battery_level", 0.0)?),
        charging_state: ChargingState::from_vendor(raw_state),
        charger_actual_current_a: number(charge, "charger_actual_current", 0.0)?.max(0.0),
        charger_voltage_v: number(charge, "charger_voltage", 0.0)?.max(0.0),
        charge_limit_soc: percent(number(charge, "charge_limit_soc", 80.0)?),
    })
}

fn classify_failure(command: &str, reason: &str) -> ChargerError {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("asleep") || lower.contains("offline") || lower.contains("unavailable") {
        ChargerError::unavailable(reason)
    } else {
        ChargerError::command_failed(command, reason)
    }
}

/// Interpret a command response.
///
/// A rejected start while already charging, or a rejected stop while not
/// charging, leaves the vehicle in the requested state and counts as success.
pub fn parse_command_result(command: &str, body: &Value) -> Result<()> {
    if let Some(error) = body.get("error").and_then(Value::as_str)
        && !error.is_empty()
    {
        return Err(classify_failure(command, error));
    }
    let response = body
        .get("response")
        .filter(|v| v.is_object())
        .ok_or_else(|| ChargerError::malformed("command response has no response object"))?;
    let result = response
        .get("result")
        .and_then(Value::as_bool)
        .ok_or_else(|| ChargerError::malformed("command response has no result flag"))?;
    if result {
        return Ok(());
    }

    let reason = response
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("");
    match (command, reason) {
        (CHARGE_START, "is_charging") | (CHARGE_STOP, "not_charging") => Ok(()),
        (_, "") => Err(ChargerError::command_failed(command, "rejected without reason")),
        _ => Err(classify_failure(command, reason)),
    }
}
