//! Thermostat control loop
//!
//! Each iteration reads the temperature, decides whether the commanded speed
//! must change, drives the fan, verifies rotation when a tachometer is
//! present, and publishes a status snapshot.
//!
//! # Hysteresis
//!
//! The speed is recomputed only on the first iteration or when the reading
//! moved at least `temp.hyst` away from the temperature the current speed was
//! fixed at. A constant speed is applied once and never recomputed.
//!
//! # Spin-up
//!
//! Starting a fan that is stopped (or below idle speed) first commands
//! `speed.spin_up` for a short settle period so the motor reliably starts.
//!
//! # Stall recovery
//!
//! If the fan reports no rotation while a nonzero speed is commanded, the
//! loop runs it at full speed, retrying every few seconds until rotation is
//! seen, then restores the previous speed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::constants::{speed, timing};
use crate::engine::curve::{Mode, SpeedCurve};
use crate::engine::tachometer::{RpmReading, RpmSource};
use crate::error::Result;
use crate::hw::{FanActuator, PwmOutput, TemperatureSource};
use crate::status::{SharedStatus, StatusSnapshot};
use crate::system::{monotonic_seconds, StopSignal};

/// Loop delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub interval: Duration,
    pub spin_up_settle: Duration,
    pub stall_retry: Duration,
}

impl Timing {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            spin_up_settle: timing::SPIN_UP_SETTLE,
            stall_retry: timing::STALL_RETRY,
        }
    }
}

/// Controller-owned state
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub measured_temp: f32,
    /// Temperature the current speed was computed from
    pub temp_fixed: f32,
    /// Steady-state commanded speed; `None` until the first iteration
    pub speed: Option<f32>,
    /// Last PWM value actually written
    pub pwm: u16,
    pub mode: Option<Mode>,
    pub fan_ok: bool,
    pub rpm: i32,
    pub last_fail_ts: Option<f64>,
    /// Tachometer failed; rotation is no longer verified
    pub hall_degraded: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            measured_temp: 0.0,
            temp_fixed: 0.0,
            speed: None,
            pwm: 0,
            mode: None,
            fan_ok: true,
            rpm: 0,
            last_fail_ts: None,
            hall_degraded: false,
        }
    }
}

pub struct Controller<P: PwmOutput, T: TemperatureSource> {
    curve: SpeedCurve,
    hysteresis: f32,
    speed_idle: f32,
    speed_spin_up: f32,
    timing: Timing,
    actuator: FanActuator<P>,
    thermal: T,
    rpm: Option<Box<dyn RpmSource>>,
    status: Option<Arc<SharedStatus>>,
    stop: StopSignal,
    state: ControlState,
}

impl<P: PwmOutput, T: TemperatureSource> Controller<P, T> {
    /// Build a controller from validated configuration
    pub fn new(config: &Config, actuator: FanActuator<P>, thermal: T, stop: StopSignal) -> Self {
        Self {
            curve: SpeedCurve::from_config(config),
            hysteresis: config.temp.hyst,
            speed_idle: config.speed.idle,
            speed_spin_up: config.speed.spin_up,
            timing: Timing::from_config(config),
            actuator,
            thermal,
            rpm: None,
            status: None,
            stop,
            state: ControlState::default(),
        }
    }

    /// Verify rotation using `source`
    pub fn with_rpm_source(mut self, source: Box<dyn RpmSource>) -> Self {
        self.rpm = Some(source);
        self
    }

    /// Publish snapshots to `status` after every iteration
    pub fn with_status(mut self, status: Arc<SharedStatus>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Run until stopped or a fatal error occurs.
    ///
    /// The fan is left at full speed on the way out in either case.
    pub fn run(&mut self) -> Result<()> {
        info!(
            interval = self.timing.interval.as_secs(),
            hall = self.rpm.is_some(),
            "Control loop started"
        );

        let result = self.run_loop();
        if let Err(e) = &result {
            error!(error = %e, "Control loop failed");
        }

        match self.actuator.set_speed_percent(speed::MAX_PERCENT) {
            Ok(pwm) => {
                self.state.pwm = pwm;
                self.state.speed = Some(speed::MAX_PERCENT);
                self.publish();
            }
            Err(e) => error!(error = %e, "Can't leave the fan at full speed"),
        }

        result
    }

    fn run_loop(&mut self) -> Result<()> {
        while !self.stop.is_stopped() {
            self.step()?;
            self.stop.sleep(self.timing.interval);
        }
        Ok(())
    }

    /// One control iteration, without the trailing poll sleep
    pub fn step(&mut self) -> Result<()> {
        let temp = self.thermal.read_celsius().map_err(|e| {
            error!(error = %e, "Can't read temperature");
            e
        })?;
        self.state.measured_temp = temp;

        if self.needs_update(temp) {
            let (mode, target) = self.curve.evaluate(temp);
            if self.state.mode != Some(mode) {
                debug!(%mode, temp, "Mode changed");
            }
            self.apply_speed(target)?;
            self.state.mode = Some(mode);
            self.state.temp_fixed = temp;
            debug!(temp, speed = target, pwm = self.state.pwm, %mode, "Fan speed updated");
        } else {
            trace!(temp, temp_fixed = self.state.temp_fixed, speed = ?self.state.speed, "Speed unchanged");
        }

        self.check_fan();
        self.publish();

        if !self.state.fan_ok && !self.state.hall_degraded {
            self.recover_stall()?;
        }
        Ok(())
    }

    fn needs_update(&self, temp: f32) -> bool {
        match self.state.speed {
            None => true,
            Some(_) if self.curve.is_const() => false,
            Some(_) => (self.state.temp_fixed - temp).abs() >= self.hysteresis,
        }
    }

    fn apply_speed(&mut self, target: f32) -> Result<()> {
        let stopped = match self.state.speed {
            None => true,
            Some(prev) => prev < self.speed_idle || prev <= 0.0,
        };

        if stopped && target > 0.0 {
            debug!(spin_up = self.speed_spin_up, "Spinning up the fan");
            self.state.pwm = self.actuator.set_speed_percent(self.speed_spin_up)?;
            self.stop.sleep(self.timing.spin_up_settle);
        }

        self.state.pwm = self.actuator.set_speed_percent(target)?;
        self.state.speed = Some(target);
        Ok(())
    }

    fn check_fan(&mut self) {
        let Some(source) = &self.rpm else {
            return;
        };
        let commanded = self.state.speed.unwrap_or(0.0);
        let reading = source.read_rpm();
        self.state.rpm = reading.as_raw();

        match reading {
            RpmReading::Measured(rpm) => self.set_fan_ok(!(commanded > 0.0 && rpm == 0)),
            RpmReading::Pending => {}
            RpmReading::Failed => {
                self.note_hall_failure();
                self.set_fan_ok(!(commanded > 0.0));
            }
        }
    }

    fn note_hall_failure(&mut self) {
        if !self.state.hall_degraded {
            warn!("Hall sensor failed, fan rotation is no longer monitored");
            self.state.hall_degraded = true;
        }
    }

    fn set_fan_ok(&mut self, ok: bool) {
        if self.state.fan_ok && !ok {
            self.state.last_fail_ts = Some(monotonic_seconds());
        }
        self.state.fan_ok = ok;
    }

    fn recover_stall(&mut self) -> Result<()> {
        let Some(steady) = self.state.speed else {
            return Ok(());
        };
        error!(speed = steady, rpm = self.state.rpm, "Fan is not spinning");

        let mut attempts = 0u32;
        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }
            attempts += 1;
            self.state.pwm = self.actuator.set_speed_percent(speed::MAX_PERCENT)?;
            self.publish();
            if !self.stop.sleep(self.timing.stall_retry) {
                return Ok(());
            }

            let reading = match &self.rpm {
                Some(source) => source.read_rpm(),
                None => return Ok(()),
            };
            self.state.rpm = reading.as_raw();
            match reading {
                RpmReading::Measured(rpm) if rpm > 0 => break,
                RpmReading::Failed => {
                    self.note_hall_failure();
                    self.state.pwm = self.actuator.set_speed_percent(steady)?;
                    self.publish();
                    return Ok(());
                }
                _ => trace!(attempts, "Fan is still stalled"),
            }
        }

        self.state.pwm = self.actuator.set_speed_percent(steady)?;
        self.set_fan_ok(true);
        info!(attempts, rpm = self.state.rpm, speed = steady, "Fan is spinning again");
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        if let Some(status) = &self.status {
            status.publish(StatusSnapshot {
                temp_real: self.state.measured_temp,
                temp_fixed: self.state.temp_fixed,
                speed: self.state.speed.unwrap_or(0.0),
                pwm: self.state.pwm,
                rpm: self.state.rpm,
                ok: self.state.fan_ok,
                last_fail_ts: self.state.last_fail_ts,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::port::MockPwmOutput;
    use crate::hw::PwmRange;

    struct FixedTemp(f32);

    impl TemperatureSource for FixedTemp {
        fn read_celsius(&mut self) -> Result<f32> {
            Ok(self.0)
        }
    }

    fn instant() -> Timing {
        Timing {
            interval: Duration::ZERO,
            spin_up_settle: Duration::ZERO,
            stall_retry: Duration::ZERO,
        }
    }

    #[test]
    fn test_timing_from_config() {
        let mut config = Config::default();
        config.main.interval = 4;
        let timing = Timing::from_config(&config);
        assert_eq!(timing.interval, Duration::from_secs(4));
        assert_eq!(timing.spin_up_settle, Duration::from_secs(2));
    }

    #[test]
    fn test_first_step_spins_up_then_settles() {
        let config = Config::default();
        let mut output = MockPwmOutput::new();
        let mut seq = mockall::Sequence::new();
        output.expect_set_pwm().withf(|v| *v == 768).times(1).in_sequence(&mut seq).returning(|_| Ok(()));
        output.expect_set_pwm().withf(|v| *v == 512).times(1).in_sequence(&mut seq).returning(|_| Ok(()));

        let actuator = FanActuator::new(output, PwmRange::new(0, 1024, Default::default()).unwrap());
        let mut controller = Controller::new(&config, actuator, FixedTemp(60.0), StopSignal::new()).with_timing(instant());
        controller.step().unwrap();

        let state = controller.state();
        assert_eq!(state.speed, Some(50.0));
        assert_eq!(state.pwm, 512);
        assert_eq!(state.mode, Some(Mode::InRange));
        assert!(state.fan_ok);
    }

    #[test]
    fn test_no_tachometer_never_flags_stall() {
        let config = Config::default();
        let mut output = MockPwmOutput::new();
        output.expect_set_pwm().returning(|_| Ok(()));
        let actuator = FanActuator::new(output, config.pwm_range().unwrap());
        let mut controller = Controller::new(&config, actuator, FixedTemp(70.0), StopSignal::new()).with_timing(instant());
        for _ in 0..3 {
            controller.step().unwrap();
        }
        assert!(controller.state().fan_ok);
        assert_eq!(controller.state().last_fail_ts, None);
    }
}
