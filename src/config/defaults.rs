use super::*;

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            start_export_watts: 3500,
            stop_export_watts: 1500,
            min_on_seconds: 300,
            min_off_seconds: 300,
            max_soc: 80,
            mode: ControlMode::Threshold,
        }
    }
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            min_amps: 5,
            max_amps: 12,
            amp_steps: vec![8, 10, 12],
            min_start_amps: 8,
            min_dynamic_watts: 0,
            charging_voltage: 240.0,
            house_load_watts: None,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_seconds: 20,
            medium_seconds: 60,
            slow_seconds: 300,
            error_backoff_seconds: 10,
            wake_threshold_percent: 50.0,
            wake_vehicle: true,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_daily_calls: 200,
            min_interval_seconds: 300,
            absolute_max_seconds: 3600,
            long_idle_seconds: 3 * 3600,
            night_interval_seconds: 6 * 3600,
            battery_capacity_kwh: 75.0,
            soc_delta_threshold_percent: 2.0,
        }
    }
}

impl Default for GatewayPolicyConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            jitter_min: 0.5,
            jitter_max: 1.5,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            max_consecutive_failures: 3,
            circuit_cooldown_seconds: 300,
            max_retry_after_seconds: 60,
            request_timeout_seconds: 10,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            solar: GatewayPolicyConfig::default(),
            vehicle: GatewayPolicyConfig {
                min_interval_ms: 30_000,
                max_retry_after_seconds: 120,
                ..GatewayPolicyConfig::default()
            },
        }
    }
}

impl Default for DaytimeConfig {
    fn default() -> Self {
        Self {
            source: DaytimeSource::Fixed,
            timezone: "UTC".to_string(),
            start: "07:00".to_string(),
            end: "20:00".to_string(),
        }
    }
}

impl Default for SolarEdgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://monitoringapi.solaredge.com".to_string(),
            api_key: String::new(),
            site_id: String::new(),
            primary_ttl_seconds: 45,
            fallback_ttl_seconds: 300,
        }
    }
}

impl Default for TeslaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fleet-api.prd.na.vn.cloud.tesla.com".to_string(),
            command_proxy_url: "https://localhost:8080".to_string(),
            accept_invalid_proxy_certs: true,
            access_token: String::new(),
            vehicle_vin: String::new(),
            wake_attempts: 3,
            wake_base_wait_seconds: 10,
            wake_step_seconds: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/solarcharge.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_file: "solarcharge_state.json".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            dynamic: DynamicConfig::default(),
            polling: PollingConfig::default(),
            budget: BudgetConfig::default(),
            gateway: GatewayConfig::default(),
            daytime: DaytimeConfig::default(),
            solaredge: SolarEdgeConfig::default(),
            tesla: TeslaConfig::default(),
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
            dry_run: true,
        }
    }
}
