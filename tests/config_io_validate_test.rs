use solarcharge::config::{Config, ControlMode, DaytimeSource};
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.control.mode = ControlMode::Dynamic;
    cfg.dynamic.amp_steps = vec![6, 8, 10, 13, 16];
    cfg.dynamic.max_amps = 16;
    cfg.tesla.vehicle_vin = "5YJ3E1EA7KF000001".to_string();
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.control.mode, ControlMode::Dynamic);
    assert_eq!(loaded.dynamic.amp_steps, vec![6, 8, 10, 13, 16]);
    assert_eq!(loaded.tesla.vehicle_vin, "5YJ3E1EA7KF000001");
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn secrets_are_not_written_back() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut cfg = Config::default();
    cfg.tesla.access_token = "secret-token".to_string();
    cfg.solaredge.api_key = "secret-key".to_string();

    cfg.save_to_file(tmp.path()).unwrap();
    let text = fs::read_to_string(tmp.path()).unwrap();
    assert!(!text.contains("secret-token"));
    assert!(!text.contains("secret-key"));
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    // SOC cap out of range
    cfg.control.max_soc = 0;
    assert!(cfg.validate().is_err());
    cfg = Config::default();
    cfg.control.max_soc = 101;
    assert!(cfg.validate().is_err());

    // Intervals must be positive
    cfg = Config::default();
    cfg.polling.fast_seconds = 0;
    assert!(cfg.validate().is_err());

    // min_interval must not exceed the absolute maximum
    cfg = Config::default();
    cfg.budget.min_interval_seconds = cfg.budget.absolute_max_seconds + 1;
    assert!(cfg.validate().is_err());

    // No step reachable from min_start_amps
    cfg = Config::default();
    cfg.dynamic.min_start_amps = 20;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.gateway.vehicle.max_attempts = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.daytime.timezone = "Mars/Olympus".to_string();
    assert!(cfg.validate().is_err());
    cfg.daytime.source = DaytimeSource::Always;
    assert!(cfg.validate().is_ok());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(dir.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{}", err).contains("I/O error"));
}
