//! SolarEdge monitoring API client

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{finite, read_json, user_agent};
use crate::clock::{Clock, ShutdownSignal};
use crate::config::{GatewayPolicyConfig, SolarEdgeConfig};
use crate::error::{ChargerError, Result};
use crate::gateway::{GatewayPolicy, GatewayStats, ResilientGateway};
use crate::logging::{StructuredLogger, get_logger};
use crate::ports::SolarReadPort;
use crate::types::{PowerReading, SolarReading};

/// Site power from `currentPowerFlow`, falling back to `overview`
pub struct SolarEdgeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    site_id: String,
    primary_ttl: Duration,
    fallback_ttl: Duration,
    gateway: ResilientGateway,
    logger: StructuredLogger,
}

impl SolarEdgeClient {
    pub fn new(
        config: &SolarEdgeConfig,
        policy: &GatewayPolicyConfig,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(policy.request_timeout_seconds))
            .user_agent(user_agent())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            site_id: config.site_id.trim().to_string(),
            primary_ttl: Duration::from_secs(config.primary_ttl_seconds),
            fallback_ttl: Duration::from_secs(config.fallback_ttl_seconds),
            gateway: ResilientGateway::new("solar", GatewayPolicy::from(policy), clock, shutdown),
            logger: get_logger("solaredge"),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.site_id.is_empty()
    }

    pub fn gateway_stats(&self) -> GatewayStats {
        self.gateway.stats()
    }

    async fn get_validated(
        &self,
        path: &str,
        validate: fn(&Value) -> Result<PowerReading>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;
        let body = read_json(resp).await?;
        validate(&body)?;
        Ok(body)
    }

    /// Read one endpoint; `retry` is off for the primary so a failing
    /// primary leaves breaker headroom for the fallback
    async fn read_endpoint(
        &self,
        endpoint: &str,
        ttl: Duration,
        retry: bool,
        parse: fn(&Value) -> Result<PowerReading>,
    ) -> Result<PowerReading> {
        let path = format!("/site/{}/{}.json", self.site_id, endpoint);
        let path = path.as_str();
        let params = [("site", self.site_id.as_str())];
        let operation = move || self.get_validated(path, parse);
        let body = if retry {
            self.gateway
                .fetch(endpoint, &params, Some(ttl), operation)
                .await?
        } else {
            self.gateway
                .fetch_without_retry(endpoint, &params, Some(ttl), operation)
                .await?
        };
        parse(&body)
    }
}

#[async_trait::async_trait]
impl SolarReadPort for SolarEdgeClient {
    async fn read_production(&self) -> Result<SolarReading> {
        if !self.is_configured() {
            self.logger
                .debug("SolarEdge API key/site ID not set; no solar data");
            return Ok(SolarReading::Unconfigured);
        }

        match self
            .read_endpoint("currentPowerFlow", self.primary_ttl, false, parse_power_flow)
            .await
        {
            Ok(reading) => return Ok(SolarReading::Reading(reading)),
            Err(ChargerError::Shutdown) => return Err(ChargerError::Shutdown),
            Err(e) => self.logger.warn(&format!(
                "currentPowerFlow failed; falling back to overview: {}",
                e
            )),
        }

        let reading = self
            .read_endpoint("overview", self.fallback_ttl, true, parse_overview)
            .await?;
        Ok(SolarReading::Reading(reading))
    }
}

fn unit_scale(unit: &str) -> Result<f64> {
    match unit {
        "W" => Ok(1.0),
        "kW" => Ok(1000.0),
        "MW" => Ok(1_000_000.0),
        other => Err(ChargerError::malformed(format!("unknown power unit {:?}", other))),
    }
}

fn has_connection(flow: &Value, from: &str, to: &str) -> bool {
    flow.get("connections")
        .and_then(Value::as_array)
        .is_some_and(|conns| {
            conns.iter().any(|c| {
                let f = c.get("from").and_then(Value::as_str).unwrap_or("");
                let t = c.get("to").and_then(Value::as_str).unwrap_or("");
                f.eq_ignore_ascii_case(from) && t.eq_ignore_ascii_case(to)
            })
        })
}

/// Parse a `currentPowerFlow` body.
///
/// PV and grid powers are scaled by the flow's `unit`. The export direction
/// comes from the `connections` list when present (`LOAD → GRID` exports,
/// `GRID → Load` imports); otherwise a negative grid power means export.
/// Without a `GRID` element there is no meter and `site_export_w` is `None`.
pub fn parse_power_flow(body: &Value) -> Result<PowerReading> {
    let flow = body
        .get("siteCurrentPowerFlow")
        .ok_or_else(|| ChargerError::malformed("missing siteCurrentPowerFlow"))?;
    let scale = unit_scale(flow.get("unit").and_then(Value::as_str).unwrap_or("kW"))?;

    let pv = flow
        .pointer("/PV/currentPower")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let pv_w = finite(pv * scale, "PV currentPower")?;

    let export_w = match flow.pointer("/GRID/currentPower").and_then(Value::as_f64) {
        Some(grid) => {
            let grid_w = finite(grid * scale, "GRID currentPower")?;
            let export = if has_connection(flow, "LOAD", "GRID") {
                grid_w.abs()
            } else if has_connection(flow, "GRID", "LOAD") {
                -grid_w.abs()
            } else {
                -grid_w
            };
            Some(export.round() as i64)
        }
        None => None,
    };

    Ok(PowerReading::new(pv_w.round() as i64, export_w))
}

/// Parse an `overview` body; `currentPower.power` is in W and carries no meter data
pub fn parse_overview(body: &Value) -> Result<PowerReading> {
    let power = body
        .pointer("/overview/currentPower/power")
        .and_then(Value::as_f64)
        .ok_or_else(|| ChargerError::malformed("missing overview.currentPower.power"))?;
    let power = finite(power, "overview power")?;
    Ok(PowerReading::new(power.round() as i64, None))
}
