#![cfg(feature = "http")]

use mockito::{Matcher, Server};
use serde_json::json;
use solarcharge::clients::{SolarEdgeClient, TeslaFleetClient};
use solarcharge::clock::{Clock, ShutdownSignal, SystemClock};
use solarcharge::config::{GatewayPolicyConfig, SolarEdgeConfig, TeslaConfig};
use solarcharge::error::ChargerError;
use solarcharge::ports::{SolarReadPort, VehicleCommandPort, VehicleReadPort};
use solarcharge::types::{Ack, ChargingState, PowerReading, SolarReading};
use std::sync::Arc;

const VIN: &str = "5YJ3E1EA7KF000001";

fn policy() -> GatewayPolicyConfig {
    GatewayPolicyConfig {
        min_interval_ms: 0,
        jitter_min: 1.0,
        jitter_max: 1.0,
        max_attempts: 1,
        max_retry_after_seconds: 0,
        ..GatewayPolicyConfig::default()
    }
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

fn solaredge(url: &str) -> SolarEdgeClient {
    solaredge_with_policy(url, &policy())
}

fn solaredge_with_policy(url: &str, policy: &GatewayPolicyConfig) -> SolarEdgeClient {
    let cfg = SolarEdgeConfig {
        base_url: url.to_string(),
        api_key: "KEY".to_string(),
        site_id: "123".to_string(),
        ..SolarEdgeConfig::default()
    };
    SolarEdgeClient::new(&cfg, policy, clock(), ShutdownSignal::never()).unwrap()
}

fn tesla(url: &str, dry_run: bool) -> TeslaFleetClient {
    let cfg = TeslaConfig {
        base_url: url.to_string(),
        command_proxy_url: url.to_string(),
        access_token: "test_token".to_string(),
        vehicle_vin: VIN.to_string(),
        wake_attempts: 2,
        wake_base_wait_seconds: 0,
        wake_step_seconds: 0,
        ..TeslaConfig::default()
    };
    TeslaFleetClient::new(&cfg, &policy(), dry_run, clock(), ShutdownSignal::never()).unwrap()
}

fn vehicle_list(state: &str) -> String {
    json!({"response": [{"vin": VIN, "state": state}], "count": 1}).to_string()
}

#[tokio::test]
async fn solaredge_reads_power_flow() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/site/123/currentPowerFlow.json")
        .match_query(Matcher::UrlEncoded("api_key".into(), "KEY".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"siteCurrentPowerFlow": {
                "unit": "kW",
                "connections": [{"from": "LOAD", "to": "Grid"}],
                "GRID": {"currentPower": 1.2},
                "PV": {"currentPower": 4.4}
            }})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = solaredge(&server.url());
    let first = client.read_production().await.unwrap();
    // Second read inside the TTL is served from cache
    let second = client.read_production().await.unwrap();

    let expected = SolarReading::Reading(PowerReading::new(4400, Some(1200)));
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(client.gateway_stats().cache_hits, 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn solaredge_falls_back_to_overview() {
    let mut server = Server::new_async().await;
    let primary = server
        .mock("GET", "/site/123/currentPowerFlow.json")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;
    let fallback = server
        .mock("GET", "/site/123/overview.json")
        .match_query(Matcher::UrlEncoded("api_key".into(), "KEY".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"overview": {"currentPower": {"power": 2100.0}}}).to_string())
        .create_async()
        .await;

    let client = solaredge(&server.url());
    let reading = client.read_production().await.unwrap();

    assert_eq!(
        reading,
        SolarReading::Reading(PowerReading::new(2100, None))
    );
    primary.assert_async().await;
    fallback.assert_async().await;
}

#[tokio::test]
async fn solaredge_server_error_falls_back_under_default_policy() {
    let mut server = Server::new_async().await;
    let primary = server
        .mock("GET", "/site/123/currentPowerFlow.json")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("maintenance")
        .expect(1)
        .create_async()
        .await;
    let fallback = server
        .mock("GET", "/site/123/overview.json")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"overview": {"currentPower": {"power": 1800.0}}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let client = solaredge_with_policy(&server.url(), &GatewayPolicyConfig::default());
    let reading = client.read_production().await.unwrap();

    assert_eq!(
        reading,
        SolarReading::Reading(PowerReading::new(1800, None))
    );
    let stats = client.gateway_stats();
    assert_eq!(stats.network_calls, 2);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.circuit_rejections, 0);
    primary.assert_async().await;
    fallback.assert_async().await;
}

#[tokio::test]
async fn solaredge_without_credentials_is_unconfigured() {
    let client = SolarEdgeClient::new(
        &SolarEdgeConfig::default(),
        &policy(),
        clock(),
        ShutdownSignal::never(),
    )
    .unwrap();
    assert_eq!(
        client.read_production().await.unwrap(),
        SolarReading::Unconfigured
    );
    assert_eq!(client.gateway_stats().network_calls, 0);
}

#[tokio::test]
async fn tesla_reads_vehicle_data() {
    let mut server = Server::new_async().await;
    let list = server
        .mock("GET", "/api/1/vehicles")
        .match_header("authorization", "Bearer test_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(vehicle_list("online"))
        .create_async()
        .await;
    let data = server
        .mock("GET", format!("/api/1/vehicles/{}/vehicle_data", VIN).as_str())
        .match_header("authorization", "Bearer test_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"response": {"charge_state": {
                "charging_state": "Charging",
                "battery_level": 64,
                "charger_actual_current": 16,
                "charger_voltage": 230,
                "charge_limit_soc": 85
            }}})
            .to_string(),
        )
        .create_async()
        .await;

    let client = tesla(&server.url(), false);
    let state = client.read_state(false).await.unwrap();

    assert!(state.plugged_in);
    assert_eq!(state.charging_state, ChargingState::Charging);
    assert_eq!(state.soc_percent, 64);
    assert_eq!(state.charging_power_w(), 3680.0);
    list.assert_async().await;
    data.assert_async().await;
}

#[tokio::test]
async fn tesla_asleep_without_wake_is_unavailable() {
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/api/1/vehicles")
        .with_status(200)
        .with_body(vehicle_list("asleep"))
        .create_async()
        .await;
    let data = server
        .mock("GET", format!("/api/1/vehicles/{}/vehicle_data", VIN).as_str())
        .expect(0)
        .create_async()
        .await;

    let client = tesla(&server.url(), false);
    let err = client.read_state(false).await.unwrap_err();

    assert!(matches!(err, ChargerError::Unavailable { .. }));
    data.assert_async().await;
}

#[tokio::test]
async fn tesla_missing_vin_is_reported() {
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/api/1/vehicles")
        .with_status(200)
        .with_body(json!({"response": [{"vin": "OTHER", "state": "online"}]}).to_string())
        .create_async()
        .await;

    let client = tesla(&server.url(), false);
    let err = client.read_state(true).await.unwrap_err();
    assert!(matches!(err, ChargerError::VehicleNotFound { .. }));
}

#[tokio::test]
async fn tesla_status_codes_map_to_errors() {
    let mut server = Server::new_async().await;
    let unauthorized = server
        .mock("GET", "/api/1/vehicles")
        .with_status(401)
        .create_async()
        .await;

    let client = tesla(&server.url(), false);
    let err = client.read_state(false).await.unwrap_err();
    assert!(matches!(err, ChargerError::AuthExpired { .. }));
    unauthorized.assert_async().await;

    let mut server = Server::new_async().await;
    let _limited = server
        .mock("GET", "/api/1/vehicles")
        .with_status(429)
        .with_header("retry-after", "5")
        .create_async()
        .await;
    let client = tesla(&server.url(), false);
    let err = client.read_state(false).await.unwrap_err();
    assert!(matches!(err, ChargerError::RateLimited { .. }));
}

#[tokio::test]
async fn tesla_wakes_vehicle_before_reading() {
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/api/1/vehicles")
        .with_status(200)
        .with_body(vehicle_list("asleep"))
        .create_async()
        .await;
    let wake = server
        .mock("POST", format!("/api/1/vehicles/{}/wake_up", VIN).as_str())
        .match_header("authorization", "Bearer test_token")
        .with_status(200)
        .with_body(json!({"response": {"state": "online"}}).to_string())
        .expect(1)
        .create_async()
        .await;
    let _data = server
        .mock("GET", format!("/api/1/vehicles/{}/vehicle_data", VIN).as_str())
        .with_status(200)
        .with_body(
            json!({"response": {"charge_state": {"charging_state": "Stopped", "battery_level": 40}}})
                .to_string(),
        )
        .create_async()
        .await;

    let client = tesla(&server.url(), false);
    let state = client.read_state(true).await.unwrap();
    assert_eq!(state.charging_state, ChargingState::Stopped);
    wake.assert_async().await;
}

#[tokio::test]
async fn dry_run_commands_never_hit_the_network() {
    let mut server = Server::new_async().await;
    let any = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let client = tesla(&server.url(), true);
    assert_eq!(client.start_charging().await.unwrap(), Ack::simulated());
    assert_eq!(client.set_amps(10).await.unwrap(), Ack::simulated());
    any.assert_async().await;
}

#[tokio::test]
async fn commands_go_to_the_proxy() {
    let mut server = Server::new_async().await;
    let amps = server
        .mock(
            "POST",
            format!("/api/1/vehicles/{}/command/set_charging_amps", VIN).as_str(),
        )
        .match_header("authorization", "Bearer test_token")
        .match_body(Matcher::Json(json!({"charging_amps": 10})))
        .with_status(200)
        .with_body(json!({"response": {"result": true, "reason": ""}}).to_string())
        .create_async()
        .await;
    let stop = server
        .mock("POST", format!("/api/1/vehicles/{}/command/charge_stop", VIN).as_str())
        .with_status(200)
        .with_body(json!({"response": {"result": false, "reason": "not_charging"}}).to_string())
        .create_async()
        .await;

    let client = tesla(&server.url(), false);
    assert_eq!(client.set_amps(10).await.unwrap(), Ack::confirmed());
    assert_eq!(client.stop_charging().await.unwrap(), Ack::confirmed());
    amps.assert_async().await;
    stop.assert_async().await;
}

#[tokio::test]
async fn asleep_command_wakes_and_gives_up() {
    let mut server = Server::new_async().await;
    let start = server
        .mock("POST", format!("/api/1/vehicles/{}/command/charge_start", VIN).as_str())
        .with_status(200)
        .with_body(
            json!({"response": null, "error": "vehicle unavailable: vehicle is offline or asleep"})
                .to_string(),
        )
        .expect(3)
        .create_async()
        .await;
    let wake = server
        .mock("POST", format!("/api/1/vehicles/{}/wake_up", VIN).as_str())
        .with_status(200)
        .with_body(json!({"response": {"state": "online"}}).to_string())
        .expect(2)
        .create_async()
        .await;

    let client = tesla(&server.url(), false);
    let err = client.start_charging().await.unwrap_err();

    assert!(matches!(err, ChargerError::CommandFailed { .. }));
    start.assert_async().await;
    wake.assert_async().await;
}
