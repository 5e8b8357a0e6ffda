/*
 * Integration tests for the pifan control loop
 *
 * The controller is driven through in-memory fake ports so every PWM write,
 * temperature reading and RPM reading is scripted and observable.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pf_core::engine::Timing;
use pf_core::{
    Config, Controller, FanActuator, Mode, PifanError, PwmOutput, Result, RpmReading, RpmSource,
    SharedStatus, StopSignal, TemperatureSource,
};
use serial_test::serial;

// Test utilities

#[derive(Clone, Default)]
struct RecordingPwm(Arc<Mutex<Vec<u16>>>);

impl RecordingPwm {
    fn take(&self) -> Vec<u16> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    fn last(&self) -> Option<u16> {
        self.0.lock().unwrap().last().copied()
    }
}

impl PwmOutput for RecordingPwm {
    fn set_pwm(&mut self, value: u16) -> Result<()> {
        self.0.lock().unwrap().push(value);
        Ok(())
    }
}

/// Temperature that tests can move between iterations; `None` fails the read
#[derive(Clone)]
struct Thermometer(Arc<Mutex<Option<f32>>>);

impl Thermometer {
    fn new(temp: f32) -> Self {
        Self(Arc::new(Mutex::new(Some(temp))))
    }

    fn set(&self, temp: f32) {
        *self.0.lock().unwrap() = Some(temp);
    }

    fn fail(&self) {
        *self.0.lock().unwrap() = None;
    }
}

impl TemperatureSource for Thermometer {
    fn read_celsius(&mut self) -> Result<f32> {
        let temp = *self.0.lock().unwrap();
        temp.ok_or_else(|| PifanError::TemperatureRead {
            path: "fake".into(),
            reason: "sensor unplugged".into(),
        })
    }
}

/// Replays readings in order and then repeats the last one
#[derive(Clone)]
struct ScriptedRpm(Arc<Mutex<VecDeque<RpmReading>>>);

impl ScriptedRpm {
    fn new(readings: &[RpmReading]) -> Self {
        Self(Arc::new(Mutex::new(readings.iter().copied().collect())))
    }
}

impl RpmSource for ScriptedRpm {
    fn read_rpm(&self) -> RpmReading {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().copied().unwrap_or(RpmReading::Pending)
        }
    }
}

fn instant() -> Timing {
    Timing {
        interval: Duration::ZERO,
        spin_up_settle: Duration::ZERO,
        stall_retry: Duration::ZERO,
    }
}

fn controller(config: &Config, temp: f32) -> (Controller<RecordingPwm, Thermometer>, RecordingPwm, Thermometer) {
    config.validate().unwrap();
    let pwm = RecordingPwm::default();
    let thermometer = Thermometer::new(temp);
    let actuator = FanActuator::new(pwm.clone(), config.pwm_range().unwrap());
    let controller = Controller::new(config, actuator, thermometer.clone(), StopSignal::new()).with_timing(instant());
    (controller, pwm, thermometer)
}

fn hall_controller(
    config: &Config,
    temp: f32,
    rpm: &[RpmReading],
) -> (Controller<RecordingPwm, Thermometer>, RecordingPwm, Thermometer) {
    let (controller, pwm, thermometer) = controller(config, temp);
    (controller.with_rpm_source(Box::new(ScriptedRpm::new(rpm))), pwm, thermometer)
}

// Curve scenarios

#[test]
fn test_in_range_temperature_gives_interpolated_speed() {
    let (mut c, pwm, _) = controller(&Config::default(), 60.0);
    c.step().unwrap();
    assert_eq!(c.state().speed, Some(50.0));
    assert_eq!(c.state().mode, Some(Mode::InRange));
    // spin-up at 75% first, then the steady 50%
    assert_eq!(pwm.take(), vec![768, 512]);
}

#[test]
fn test_cold_board_runs_at_idle_speed() {
    let (mut c, pwm, _) = controller(&Config::default(), 40.0);
    c.step().unwrap();
    assert_eq!(c.state().speed, Some(25.0));
    assert_eq!(c.state().mode, Some(Mode::Idle));
    assert_eq!(pwm.take(), vec![768, 256]);
}

#[test]
fn test_heat_from_stopped_fan_spins_up_first() {
    let mut config = Config::default();
    config.speed.idle = 0.0;
    let (mut c, pwm, thermometer) = controller(&config, 40.0);

    c.step().unwrap();
    assert_eq!(c.state().speed, Some(0.0));
    // stopping needs no spin-up
    assert_eq!(pwm.take(), vec![0]);

    thermometer.set(80.0);
    c.step().unwrap();
    assert_eq!(c.state().mode, Some(Mode::Heat));
    assert_eq!(c.state().speed, Some(100.0));
    assert_eq!(pwm.take(), vec![768, 1024]);
}

#[test]
fn test_const_speed_ignores_temperature() {
    let mut config = Config::default();
    config.speed.constant = Some(40.0);
    let (mut c, pwm, thermometer) = controller(&config, 60.0);

    c.step().unwrap();
    assert_eq!(c.state().mode, Some(Mode::Const));
    assert_eq!(pwm.take(), vec![768, 410]);

    for temp in [80.0, 30.0, 85.0] {
        thermometer.set(temp);
        c.step().unwrap();
        assert_eq!(c.state().speed, Some(40.0));
    }
    assert!(pwm.take().is_empty());
}

// Hysteresis and idempotence

#[test]
fn test_small_changes_stay_within_hysteresis() {
    let (mut c, pwm, thermometer) = controller(&Config::default(), 60.0);
    c.step().unwrap();
    pwm.take();

    for temp in [60.0, 61.0, 62.9, 57.1, 60.0] {
        thermometer.set(temp);
        c.step().unwrap();
        assert_eq!(c.state().speed, Some(50.0));
        assert_eq!(c.state().temp_fixed, 60.0);
    }
    assert!(pwm.take().is_empty());
}

#[test]
fn test_change_beyond_hysteresis_recomputes_without_spin_up() {
    let (mut c, pwm, thermometer) = controller(&Config::default(), 60.0);
    c.step().unwrap();
    pwm.take();

    thermometer.set(63.0);
    c.step().unwrap();
    assert_eq!(c.state().speed, Some(55.0));
    assert_eq!(c.state().temp_fixed, 63.0);
    assert_eq!(pwm.take(), vec![563]);
}

#[test]
fn test_same_speed_twice_never_spins_up_again() {
    let mut config = Config::default();
    config.temp.hyst = 1.0;
    let (mut c, pwm, thermometer) = controller(&config, 30.0);
    c.step().unwrap();
    pwm.take();

    // both readings are below temp.low, so the speed stays at idle
    thermometer.set(35.0);
    c.step().unwrap();
    thermometer.set(40.0);
    c.step().unwrap();
    assert_eq!(pwm.take(), vec![256, 256]);
}

// Tachometer and stall handling

#[test]
fn test_pending_tachometer_is_not_a_stall() {
    let (mut c, pwm, _) = hall_controller(&Config::default(), 60.0, &[RpmReading::Pending]);
    c.step().unwrap();
    assert!(c.state().fan_ok);
    assert_eq!(c.state().rpm, -2);
    assert_eq!(pwm.take(), vec![768, 512]);
}

#[test]
fn test_stalled_fan_recovers_and_restores_speed() {
    let rpm = [
        RpmReading::Measured(0),
        RpmReading::Measured(0),
        RpmReading::Measured(0),
        RpmReading::Measured(1500),
    ];
    let (mut c, pwm, _) = hall_controller(&Config::default(), 60.0, &rpm);
    c.step().unwrap();

    // spin-up, steady, three full-speed attempts, restore
    assert_eq!(pwm.take(), vec![768, 512, 1024, 1024, 1024, 512]);
    let state = c.state();
    assert!(state.fan_ok);
    assert_eq!(state.rpm, 1500);
    assert_eq!(state.speed, Some(50.0));
    assert!(state.last_fail_ts.is_some());
}

#[test]
fn test_stall_is_reported_while_recovering() {
    let config = Config::default();
    let status = Arc::new(SharedStatus::new(true));
    let rpm = ScriptedRpm::new(&[RpmReading::Measured(0)]);
    let (c, pwm, _) = controller(&config, 60.0);
    let c = c.with_rpm_source(Box::new(rpm.clone())).with_status(status.clone());
    let mut c = c.with_timing(Timing {
        stall_retry: Duration::from_millis(20),
        ..instant()
    });
    let handle = thread::spawn(move || {
        c.step().unwrap();
        c
    });

    // wait for the first full-speed attempt to be published
    let mut seen = None;
    for _ in 0..200 {
        let snap = status.snapshot();
        if snap.pwm == 1024 {
            seen = Some(snap);
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    let snap = seen.expect("stall never published");
    assert!(!snap.ok);
    assert!(snap.last_fail_ts.is_some());

    // let the fan spin again
    *rpm.0.lock().unwrap() = VecDeque::from(vec![RpmReading::Measured(900)]);
    let c = handle.join().unwrap();
    assert!(c.state().fan_ok);
    assert!(status.snapshot().ok);
    assert_eq!(pwm.last(), Some(512));
}

#[test]
fn test_failed_tachometer_degrades_without_recovery() {
    let rpm = [RpmReading::Measured(1200), RpmReading::Failed];
    let (mut c, pwm, _) = hall_controller(&Config::default(), 60.0, &rpm);

    c.step().unwrap();
    assert!(c.state().fan_ok);
    pwm.take();

    c.step().unwrap();
    let state = c.state();
    assert!(state.hall_degraded);
    assert!(!state.fan_ok);
    assert_eq!(state.rpm, -1);
    assert!(state.last_fail_ts.is_some());
    // no full-speed recovery attempts
    assert!(pwm.take().is_empty());

    c.step().unwrap();
    assert!(pwm.take().is_empty());
}

#[test]
fn test_tachometer_failing_mid_recovery_restores_steady_speed() {
    let rpm = [RpmReading::Measured(0), RpmReading::Measured(0), RpmReading::Failed];
    let (mut c, pwm, _) = hall_controller(&Config::default(), 60.0, &rpm);
    c.step().unwrap();

    // spin-up, steady, two full-speed attempts, then back to steady
    assert_eq!(pwm.take(), vec![768, 512, 1024, 1024, 512]);
    let state = c.state();
    assert!(state.hall_degraded);
    assert!(!state.fan_ok);
    assert_eq!(state.rpm, -1);
    assert_eq!(state.pwm, 512);
    assert_eq!(state.speed, Some(50.0));

    // degraded: no further recovery attempts
    c.step().unwrap();
    assert!(pwm.take().is_empty());
    assert!(!c.state().fan_ok);
}

#[test]
fn test_zero_rpm_at_zero_speed_is_fine() {
    let mut config = Config::default();
    config.speed.idle = 0.0;
    let (mut c, pwm, _) = hall_controller(&config, 30.0, &[RpmReading::Measured(0)]);
    c.step().unwrap();
    assert!(c.state().fan_ok);
    assert_eq!(pwm.take(), vec![0]);
}

// Status publication

#[test]
fn test_status_snapshot_matches_state() {
    let status = Arc::new(SharedStatus::new(true));
    let (c, _, _) = hall_controller(&Config::default(), 60.0, &[RpmReading::Measured(2100)]);
    let mut c = c.with_status(status.clone());
    c.step().unwrap();

    let snap = status.snapshot();
    assert_eq!(snap.temp_real, 60.0);
    assert_eq!(snap.temp_fixed, 60.0);
    assert_eq!(snap.speed, 50.0);
    assert_eq!(snap.pwm, 512);
    assert_eq!(snap.rpm, 2100);
    assert!(snap.ok);
    assert_eq!(snap.last_fail_ts, None);
}

// Lifecycle

#[test]
#[serial]
fn test_stop_leaves_fan_at_full_speed() {
    let config = Config::default();
    let pwm = RecordingPwm::default();
    let stop = StopSignal::new();
    let actuator = FanActuator::new(pwm.clone(), config.pwm_range().unwrap());
    let mut c = Controller::new(&config, actuator, Thermometer::new(50.0), stop.clone()).with_timing(Timing {
        interval: Duration::from_millis(10),
        ..instant()
    });

    let handle = thread::spawn(move || c.run());
    thread::sleep(Duration::from_millis(50));
    stop.stop();
    handle.join().unwrap().unwrap();
    assert_eq!(pwm.last(), Some(1024));
}

#[test]
#[serial]
fn test_temperature_failure_is_fatal_and_leaves_full_speed() {
    let config = Config::default();
    let (mut c, pwm, thermometer) = controller(&config, 50.0);
    c.step().unwrap();
    thermometer.fail();

    let err = c.run().unwrap_err();
    assert!(matches!(err, PifanError::TemperatureRead { .. }));
    assert_eq!(pwm.last(), Some(1024));
}

#[test]
#[serial]
fn test_stop_interrupts_stall_recovery() {
    let config = Config::default();
    let pwm = RecordingPwm::default();
    let stop = StopSignal::new();
    let actuator = FanActuator::new(pwm.clone(), config.pwm_range().unwrap());
    let mut c = Controller::new(&config, actuator, Thermometer::new(60.0), stop.clone())
        .with_rpm_source(Box::new(ScriptedRpm::new(&[RpmReading::Measured(0)])))
        .with_timing(Timing {
            stall_retry: Duration::from_secs(30),
            ..instant()
        });

    let handle = thread::spawn(move || c.run());
    thread::sleep(Duration::from_millis(100));
    stop.stop();
    handle.join().unwrap().unwrap();
    assert_eq!(pwm.last(), Some(1024));
}
