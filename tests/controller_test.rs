use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use solarcharge::config::{ControlConfig, ControlMode, DynamicConfig};
use solarcharge::controller::{
    Action, ApplyOutcome, ChargeController, HoldReason, StartReason, StopReason,
};
use solarcharge::error::{ChargerError, Result};
use solarcharge::ports::VehicleCommandPort;
use solarcharge::types::{Ack, DecisionContext, PlugStatus, PowerReading};
use std::sync::Mutex;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs)
}

fn plugged(export: i64, soc: u8) -> DecisionContext {
    DecisionContext {
        reading: PowerReading::new(export.max(0) + 500, Some(export)),
        plug: PlugStatus::Plugged,
        soc_percent: soc,
        high_production: export > 3500,
    }
}

#[derive(Default)]
struct Vehicle {
    calls: Mutex<Vec<&'static str>>,
    refuse: bool,
    dry_run: bool,
}

impl Vehicle {
    fn record(&self, call: &'static str) -> Result<Ack> {
        self.calls.lock().unwrap().push(call);
        if self.refuse {
            return Err(ChargerError::command_failed(call, "refused"));
        }
        Ok(Ack {
            dry_run: self.dry_run,
        })
    }
}

#[async_trait::async_trait]
impl VehicleCommandPort for Vehicle {
    async fn start_charging(&self) -> Result<Ack> {
        self.record("start")
    }
    async fn stop_charging(&self) -> Result<Ack> {
        self.record("stop")
    }
    async fn set_amps(&self, _amps: u32) -> Result<Ack> {
        self.record("amps")
    }
}

fn controller() -> ChargeController {
    ChargeController::new(ControlConfig::default(), DynamicConfig::default())
}

async fn step(
    c: &mut ChargeController,
    v: &Vehicle,
    ctx: &DecisionContext,
    now: DateTime<Utc>,
) -> Action {
    let action = c.decide(ctx, now);
    c.apply(action, v, now).await;
    action
}

#[tokio::test]
async fn premature_stop_is_blocked_by_min_on() {
    let mut c = controller();
    let v = Vehicle::default();

    let actions = [
        step(&mut c, &v, &plugged(4000, 50), t(0)).await,
        step(&mut c, &v, &plugged(4000, 50), t(100)).await,
        step(&mut c, &v, &plugged(1000, 50), t(110)).await,
    ];

    assert_eq!(
        actions[0],
        Action::Start {
            reason: StartReason::ExportAboveStart,
            amps: None
        }
    );
    assert_eq!(actions[1], Action::hold(HoldReason::Steady));
    assert!(matches!(
        actions[2],
        Action::None {
            hold: HoldReason::Hysteresis { .. }
        }
    ));
    assert_eq!(*v.calls.lock().unwrap(), vec!["start"]);
    assert!(c.is_charging());
}

#[test]
fn deadband_holds_in_both_states() {
    let c = controller();
    assert_eq!(
        c.decide(&plugged(2500, 50), t(0)),
        Action::hold(HoldReason::Deadband)
    );
    assert_eq!(
        c.decide(&plugged(1500, 50), t(0)),
        Action::hold(HoldReason::BelowStart)
    );
}

#[tokio::test]
async fn restart_waits_for_min_off() {
    let mut c = controller();
    let v = Vehicle::default();
    step(&mut c, &v, &plugged(4000, 50), t(0)).await;
    step(&mut c, &v, &plugged(1000, 50), t(300)).await;
    assert!(!c.is_charging());

    assert_eq!(
        c.decide(&plugged(4000, 50), t(400)),
        Action::hold(HoldReason::Hysteresis {
            remaining_secs: 200
        })
    );
    assert!(matches!(
        c.decide(&plugged(4000, 50), t(600)),
        Action::Start { .. }
    ));
}

#[tokio::test]
async fn soc_cap_stops_without_waiting_for_min_on() {
    let mut c = controller();
    let v = Vehicle::default();
    step(&mut c, &v, &plugged(4000, 79), t(0)).await;

    let action = step(&mut c, &v, &plugged(4000, 80), t(10)).await;
    assert_eq!(
        action,
        Action::Stop {
            reason: StopReason::SocCap
        }
    );
    assert!(!c.is_charging());

    // At the cap and idle there is nothing left to do
    assert_eq!(
        c.decide(&plugged(6000, 85), t(1000)),
        Action::hold(HoldReason::AtSocCap)
    );
}

#[tokio::test]
async fn unplug_stops_exactly_once() {
    let mut c = controller();
    let v = Vehicle::default();
    step(&mut c, &v, &plugged(4000, 50), t(0)).await;

    let mut unplugged = plugged(4000, 50);
    unplugged.plug = PlugStatus::Unplugged;
    let first = step(&mut c, &v, &unplugged, t(30)).await;
    let second = step(&mut c, &v, &unplugged, t(60)).await;

    assert_eq!(
        first,
        Action::Stop {
            reason: StopReason::Unplugged
        }
    );
    assert_eq!(second, Action::hold(HoldReason::Unplugged));
    assert_eq!(*v.calls.lock().unwrap(), vec!["start", "stop"]);
}

#[tokio::test]
async fn refused_command_leaves_state_untouched() {
    let mut c = controller();
    let v = Vehicle {
        refuse: true,
        ..Vehicle::default()
    };
    let before = c.state().clone();

    let action = c.decide(&plugged(4000, 50), t(0));
    let outcome = c.apply(action, &v, t(0)).await;

    assert!(matches!(
        outcome,
        ApplyOutcome::Rejected {
            kind: "command_failed",
            ..
        }
    ));
    assert_eq!(*c.state(), before);
    // The same start is proposed again on the next tick
    assert!(matches!(
        c.decide(&plugged(4000, 50), t(10)),
        Action::Start { .. }
    ));
}

#[tokio::test]
async fn dry_run_ack_still_commits() {
    let mut c = controller();
    let v = Vehicle {
        dry_run: true,
        ..Vehicle::default()
    };
    let action = c.decide(&plugged(4000, 50), t(0));
    assert_eq!(
        c.apply(action, &v, t(0)).await,
        ApplyOutcome::Committed { dry_run: true }
    );
    assert!(c.is_charging());
    assert_eq!(c.state().last_change, t(0));
}

#[tokio::test]
async fn deadband_oscillation_never_starts() {
    let mut c = controller();
    let v = Vehicle::default();

    for i in 0..30 {
        let export = if i % 2 == 0 { 1600 } else { 3400 };
        let action = step(&mut c, &v, &plugged(export, 50), t(i * 60)).await;
        assert_eq!(action, Action::hold(HoldReason::Deadband), "tick {}", i);
    }
    assert!(v.calls.lock().unwrap().is_empty());
    assert!(!c.is_charging());
}

#[tokio::test]
async fn deadband_oscillation_never_stops() {
    let mut c = controller();
    let v = Vehicle::default();
    step(&mut c, &v, &plugged(4000, 50), t(0)).await;
    assert!(c.is_charging());

    // Runs well past min_on so only the thresholds hold the state
    for i in 1..=30 {
        let export = if i % 2 == 0 { 1600 } else { 3400 };
        let action = step(&mut c, &v, &plugged(export, 50), t(i * 60)).await;
        assert_eq!(action, Action::hold(HoldReason::Deadband), "tick {}", i);
    }
    assert_eq!(*v.calls.lock().unwrap(), vec!["start"]);
    assert!(c.is_charging());
}

#[tokio::test]
async fn transitions_respect_dwell_times_under_noisy_export() {
    let cfg = ControlConfig::default();
    let (min_on, min_off) = (cfg.min_on_seconds as i64, cfg.min_off_seconds as i64);
    let mut c = controller();
    let v = Vehicle::default();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut now = 0;
    let mut transitions: Vec<(i64, bool)> = Vec::new();
    for _ in 0..400 {
        now += rng.gen_range(5..90);
        let export = rng.gen_range(-1000..7000);
        let action = c.decide(&plugged(export, 50), t(now));
        let outcome = c.apply(action, &v, t(now)).await;
        if matches!(outcome, ApplyOutcome::Committed { .. }) {
            transitions.push((now, c.is_charging()));
        }
    }

    assert!(transitions.len() >= 4, "only {} transitions", transitions.len());
    for pair in transitions.windows(2) {
        let ((prev_at, prev_on), (at, on)) = (pair[0], pair[1]);
        assert_ne!(prev_on, on, "two identical transitions in a row at {}", at);
        let dwell = if prev_on { min_on } else { min_off };
        assert!(
            at - prev_at >= dwell,
            "transition at {} only {}s after the one at {}",
            at,
            at - prev_at,
            prev_at
        );
    }
}

fn dynamic_controller() -> ChargeController {
    let control = ControlConfig {
        mode: ControlMode::Dynamic,
        ..ControlConfig::default()
    };
    let dynamic = DynamicConfig {
        house_load_watts: Some(0),
        ..DynamicConfig::default()
    };
    ChargeController::new(control, dynamic)
}

#[tokio::test]
async fn dynamic_mode_stays_on_under_constant_surplus() {
    let mut c = dynamic_controller();
    let v = Vehicle::default();
    let surplus = 4000;
    let voltage = DynamicConfig::default().charging_voltage;

    let mut actions = Vec::new();
    for i in 0..8 {
        // Measured export already has the vehicle's draw taken out
        let draw = if c.is_charging() {
            c.state()
                .commanded_amps
                .map_or(0, |a| (f64::from(a) * voltage).round() as i64)
        } else {
            0
        };
        actions.push(step(&mut c, &v, &plugged(surplus - draw, 50), t(i * 300)).await);
    }

    assert!(matches!(actions[0], Action::Start { amps: Some(12), .. }));
    assert!(
        actions[1..]
            .iter()
            .all(|a| *a == Action::hold(HoldReason::Steady)),
        "{:?}",
        actions
    );
    assert_eq!(*v.calls.lock().unwrap(), vec!["amps", "start"]);
    assert!(c.is_charging());
    assert_eq!(c.state().commanded_amps, Some(12));
}
