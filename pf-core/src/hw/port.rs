//! Actuator and sensor port
//!
//! The control core only talks to hardware through these traits. Each
//! hardware backend (hardware PWM channel, software PWM, GPIO edge events,
//! sysfs thermal zone) provides one implementation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PifanError, Result};

/// Writes a raw duty value to the fan's PWM pin
#[cfg_attr(test, mockall::automock)]
pub trait PwmOutput: Send {
    /// Apply a raw PWM value in `0..=pwm::MAX_VALUE`
    fn set_pwm(&mut self, value: u16) -> Result<()>;
}

/// Falling-edge events from the Hall sensor pin
pub trait EdgeSource: Send {
    /// Wait up to `timeout` for edges.
    ///
    /// Returns `Ok(None)` on timeout and `Ok(Some(n))` with the number of
    /// edges observed. Errors are not retried by the caller.
    fn wait_event(&mut self, timeout: Duration) -> Result<Option<u32>>;
}

/// Synchronous temperature read in degrees Celsius
pub trait TemperatureSource: Send {
    fn read_celsius(&mut self) -> Result<f32>;
}

impl<T: PwmOutput + ?Sized> PwmOutput for Box<T> {
    fn set_pwm(&mut self, value: u16) -> Result<()> {
        (**self).set_pwm(value)
    }
}

impl<T: EdgeSource + ?Sized> EdgeSource for Box<T> {
    fn wait_event(&mut self, timeout: Duration) -> Result<Option<u32>> {
        (**self).wait_event(timeout)
    }
}

impl<T: TemperatureSource + ?Sized> TemperatureSource for Box<T> {
    fn read_celsius(&mut self) -> Result<f32> {
        (**self).read_celsius()
    }
}

/// Input bias for the Hall sensor pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HallBias {
    #[default]
    Disabled,
    PullDown,
    PullUp,
}

impl FromStr for HallBias {
    type Err = PifanError;

    /// Accepts the numeric form (`0`, `1`, `2`) as well as the names
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "0" | "disabled" => Ok(Self::Disabled),
            "1" | "pull-down" => Ok(Self::PullDown),
            "2" | "pull-up" => Ok(Self::PullUp),
            other => Err(PifanError::out_of_range("hall-bias", other, 0, 2)),
        }
    }
}

impl fmt::Display for HallBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::PullDown => write!(f, "pull-down"),
            Self::PullUp => write!(f, "pull-up"),
        }
    }
}
