#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Only well-formed JSON reaches the parsers in production
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Exercise every response parser on the same document
    let _ = solarcharge::clients::solaredge::parse_power_flow(&body);
    let _ = solarcharge::clients::solaredge::parse_overview(&body);
    let _ = solarcharge::clients::tesla::parse_vehicle_data(&body);
    let _ = solarcharge::clients::tesla::find_vehicle(&body, "5YJ3E1EA7KF000001");
    let _ = solarcharge::clients::tesla::parse_command_result("charge_start", &body);
});
