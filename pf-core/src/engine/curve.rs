//! Temperature to speed curve
//!
//! Three bands plus an override:
//!
//! 1. **Idle**: below `temp.low` the fan runs at `speed.idle`.
//! 2. **In range**: between `temp.low` and `temp.high` the speed is linearly
//!    interpolated from `speed.low` to `speed.high`.
//! 3. **Heat**: above `temp.high` the fan runs at `speed.heat`.
//!
//! When `speed.const` is set the curve is bypassed entirely (**Const**).
//!
//! Hysteresis is not applied here; the controller decides when to evaluate.

use std::fmt;

use crate::config::Config;

/// Which band produced the commanded speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    InRange,
    Heat,
    Const,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InRange => write!(f, "in-range"),
            Self::Heat => write!(f, "heat"),
            Self::Const => write!(f, "const"),
        }
    }
}

/// Linear remap of `value` from `[in_min, in_max]` onto `[out_min, out_max]`
///
/// The input is clamped to its range first, so the result never leaves the
/// output range.
pub fn remap(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    if in_max <= in_min {
        return out_min;
    }
    let value = value.clamp(in_min, in_max);
    (value - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Immutable curve built from validated configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedCurve {
    temp_low: f32,
    temp_high: f32,
    speed_idle: f32,
    speed_low: f32,
    speed_high: f32,
    speed_heat: f32,
    speed_const: Option<f32>,
}

impl SpeedCurve {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_low: config.temp.low,
            temp_high: config.temp.high,
            speed_idle: config.speed.idle,
            speed_low: config.speed.low,
            speed_high: config.speed.high,
            speed_heat: config.speed.heat,
            speed_const: config.speed.constant,
        }
    }

    pub fn is_const(&self) -> bool {
        self.speed_const.is_some()
    }

    /// Commanded speed (percent) and the band it came from
    pub fn evaluate(&self, temp: f32) -> (Mode, f32) {
        if let Some(speed) = self.speed_const {
            return (Mode::Const, speed);
        }
        if temp < self.temp_low {
            (Mode::Idle, self.speed_idle)
        } else if temp > self.temp_high {
            (Mode::Heat, self.speed_heat)
        } else {
            let speed = remap(temp, self.temp_low, self.temp_high, self.speed_low, self.speed_high);
            (Mode::InRange, speed)
        }
    }
}
