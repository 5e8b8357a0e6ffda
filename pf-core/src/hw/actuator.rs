//! Fan actuator: percent to PWM mapping
//!
//! # PWM Values
//!
//! Raw PWM values range from 0 to 1024. Speeds strictly between 0% and 100%
//! are linearly remapped onto the configured `pwm_low..=pwm_high` range and
//! rounded to the nearest unit. The two boundary speeds are handled by
//! [`PwmBoundary`]:
//! - `Raw` (default): 0% writes 0 and 100% writes 1024, so a stopped fan is
//!   really stopped and full speed is really full
//! - `Range`: 0% writes `pwm_low` and 100% writes `pwm_high`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::constants::{pwm, speed};
use crate::engine::remap;
use crate::error::{PifanError, Result};
use crate::hw::port::PwmOutput;

/// What 0% and 100% map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PwmBoundary {
    /// 0% → 0, 100% → 1024
    #[default]
    Raw,
    /// 0% → `pwm_low`, 100% → `pwm_high`
    Range,
}

impl FromStr for PwmBoundary {
    type Err = PifanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "raw" => Ok(Self::Raw),
            "range" => Ok(Self::Range),
            other => Err(PifanError::config(format!(
                "Unknown PWM boundary '{}', expected 'raw' or 'range'",
                other
            ))),
        }
    }
}

impl fmt::Display for PwmBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Range => write!(f, "range"),
        }
    }
}

/// Validated PWM range with boundary semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmRange {
    low: u16,
    high: u16,
    boundary: PwmBoundary,
}

impl PwmRange {
    pub fn new(low: u16, high: u16, boundary: PwmBoundary) -> Result<Self> {
        if high > pwm::MAX_VALUE {
            return Err(PifanError::out_of_range("pwm_high", high, 1, pwm::MAX_VALUE as i64));
        }
        if low >= high {
            return Err(PifanError::InvalidOrdering {
                section: "PWM",
                rule: "low < high",
            });
        }
        Ok(Self { low, high, boundary })
    }

    pub fn low(&self) -> u16 {
        self.low
    }

    pub fn high(&self) -> u16 {
        self.high
    }

    /// PWM value written for 0%
    pub fn floor(&self) -> u16 {
        match self.boundary {
            PwmBoundary::Raw => pwm::MIN_VALUE,
            PwmBoundary::Range => self.low,
        }
    }

    /// PWM value written for 100%
    pub fn ceiling(&self) -> u16 {
        match self.boundary {
            PwmBoundary::Raw => pwm::MAX_VALUE,
            PwmBoundary::Range => self.high,
        }
    }

    /// Map a speed percentage to a raw PWM value
    pub fn pwm_for_percent(&self, percent: f32) -> u16 {
        if !percent.is_finite() {
            return self.ceiling();
        }
        let percent = percent.clamp(speed::MIN_PERCENT, speed::MAX_PERCENT);
        if percent <= speed::MIN_PERCENT {
            self.floor()
        } else if percent >= speed::MAX_PERCENT {
            self.ceiling()
        } else {
            let value = remap(
                percent,
                speed::MIN_PERCENT,
                speed::MAX_PERCENT,
                self.low as f32,
                self.high as f32,
            );
            (value.round() as u16).clamp(self.low, self.high)
        }
    }
}

/// Converts speed commands into PWM writes
///
/// Holds no state beyond its configuration and the output handle. Only the
/// control loop calls it.
pub struct FanActuator<P: PwmOutput> {
    output: P,
    range: PwmRange,
}

impl<P: PwmOutput> FanActuator<P> {
    pub fn new(output: P, range: PwmRange) -> Self {
        Self { output, range }
    }

    pub fn range(&self) -> &PwmRange {
        &self.range
    }

    /// Write the PWM value for `percent` and return what was applied
    ///
    /// Write failures are logged and returned; the caller treats them as fatal.
    pub fn set_speed_percent(&mut self, percent: f32) -> Result<u16> {
        let value = self.range.pwm_for_percent(percent);
        if let Err(e) = self.output.set_pwm(value) {
            error!(percent, pwm = value, error = %e, "Can't write PWM");
            return Err(e);
        }
        Ok(value)
    }
}
