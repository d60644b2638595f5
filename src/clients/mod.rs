//! HTTP collaborators for the SolarEdge monitoring API and the Tesla Fleet API
//!
//! Both clients route their reads through a [`crate::gateway::ResilientGateway`]
//! and keep response parsing in pure functions.

pub mod solaredge;
pub mod tesla;

pub use solaredge::SolarEdgeClient;
pub use tesla::TeslaFleetClient;

use crate::error::{ChargerError, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Retry-After used when a 429 carries no usable header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

pub(crate) fn user_agent() -> String {
    format!("solarcharge/{}", env!("APP_VERSION"))
}

/// Map the HTTP status onto the error taxonomy and decode the JSON body
pub(crate) async fn read_json(resp: Response) -> Result<Value> {
    let status = resp.status();
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs);
            return Err(ChargerError::rate_limited(retry_after));
        }
        StatusCode::UNAUTHORIZED => {
            return Err(ChargerError::auth_expired("access token rejected (401)"));
        }
        StatusCode::REQUEST_TIMEOUT => {
            return Err(ChargerError::unavailable("vehicle unavailable (408)"));
        }
        _ => {}
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(ChargerError::api(status.as_u16(), snippet));
    }
    Ok(resp.json::<Value>().await?)
}

pub(crate) fn finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ChargerError::malformed(format!("{} is not a finite number", what)))
    }
}
