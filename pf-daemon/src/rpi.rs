//! Raspberry Pi hardware backend
//!
//! Hardware PWM is available on:
//! - GPIO 12 (PWM0)
//! - GPIO 13 (PWM1)
//! - GPIO 18 (PWM0)
//! - GPIO 19 (PWM1)
//!
//! Any other pin needs software PWM (`pwm_soft`), which divides the 0-1024
//! value down to the configured range.

use std::time::Duration;

use pf_core::config::MainSettings;
use pf_core::constants::{hall, pwm};
use pf_core::{EdgeSource, HallBias, PifanError, PwmOutput, Result};
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::{info, warn};

/// Fan PWM output
pub enum RpiPwm {
    Hardware { pin: u8, pwm: Pwm },
    Software { pin: u8, range: u16, output: OutputPin },
}

impl RpiPwm {
    pub fn open(settings: &MainSettings) -> Result<Self> {
        match settings.pwm_soft {
            Some(range) => Self::software(settings.pwm_pin, range),
            None => Self::hardware(settings.pwm_pin),
        }
    }

    fn hardware(pin: u8) -> Result<Self> {
        let channel = match pin {
            12 | 18 => Channel::Pwm0,
            13 | 19 => Channel::Pwm1,
            _ => {
                return Err(PifanError::gpio(
                    pin,
                    "no hardware PWM on this pin, use 12, 13, 18 or 19, or enable software PWM",
                ))
            }
        };

        let mut output = Pwm::with_frequency(channel, pwm::HARDWARE_FREQUENCY_HZ, 0.0, Polarity::Normal, true)
            .map_err(|e| PifanError::gpio(pin, e))?;
        // Keep the last duty cycle (full speed at shutdown) after exit
        output.set_reset_on_drop(false);

        info!(pin, ?channel, "Using hardware PWM");
        Ok(Self::Hardware { pin, pwm: output })
    }

    fn software(pin: u8, range: u16) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| PifanError::gpio(pin, e))?;
        let mut output = gpio.get(pin).map_err(|e| PifanError::gpio(pin, e))?.into_output_low();
        output.set_reset_on_drop(false);

        info!(pin, range, "Using software PWM");
        Ok(Self::Software { pin, range, output })
    }
}

impl PwmOutput for RpiPwm {
    fn set_pwm(&mut self, value: u16) -> Result<()> {
        let duty = f64::from(value.min(pwm::MAX_VALUE)) / f64::from(pwm::MAX_VALUE);
        match self {
            Self::Hardware { pin, pwm } => pwm.set_duty_cycle(duty).map_err(|e| PifanError::PwmWrite {
                pin: *pin,
                value,
                reason: e.to_string(),
            }),
            Self::Software { pin, range, output } => {
                let steps = f64::from(*range);
                let duty = (duty * steps).round() / steps;
                output
                    .set_pwm_frequency(pwm::SOFT_PULSE_UNIT_HZ / steps, duty)
                    .map_err(|e| PifanError::PwmWrite {
                        pin: *pin,
                        value,
                        reason: e.to_string(),
                    })
            }
        }
    }
}

impl Drop for RpiPwm {
    fn drop(&mut self) {
        match self {
            // Duty cycle survives the handle; leave the fan at full speed
            Self::Hardware { pin, pwm } => {
                if let Err(e) = pwm.set_duty_cycle(1.0) {
                    warn!(pin = *pin, error = %e, "Can't leave PWM at full duty");
                }
            }
            // The software PWM thread dies with the pin; hold the line high
            Self::Software { pin, output, .. } => {
                if let Err(e) = output.clear_pwm() {
                    warn!(pin = *pin, error = %e, "Can't stop software PWM");
                }
                output.set_high();
            }
        }
    }
}

/// Falling edges on the Hall sensor line
pub struct RpiHallSensor {
    pin: InputPin,
}

impl RpiHallSensor {
    pub fn open(pin: u8, bias: HallBias) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| PifanError::gpio(pin, e))?;
        let raw = gpio.get(pin).map_err(|e| PifanError::gpio(pin, e))?;
        let mut input = match bias {
            HallBias::Disabled => raw.into_input(),
            HallBias::PullDown => raw.into_input_pulldown(),
            HallBias::PullUp => raw.into_input_pullup(),
        };
        input
            .set_interrupt(Trigger::FallingEdge, None)
            .map_err(|e| PifanError::gpio(pin, e))?;

        info!(pin, %bias, "Using Hall sensor");
        Ok(Self { pin: input })
    }
}

impl EdgeSource for RpiHallSensor {
    fn wait_event(&mut self, timeout: Duration) -> Result<Option<u32>> {
        let poll = |pin: &mut InputPin, timeout: Duration| {
            pin.poll_interrupt(false, Some(timeout))
                .map_err(|e| PifanError::HallSensor(e.to_string()))
        };

        if poll(&mut self.pin, timeout)?.is_none() {
            return Ok(None);
        }
        // Drain whatever queued up while we were away
        let mut events = 1;
        while events < hall::MAX_EVENT_BATCH {
            match poll(&mut self.pin, Duration::ZERO)? {
                Some(_) => events += 1,
                None => break,
            }
        }
        Ok(Some(events))
    }
}
