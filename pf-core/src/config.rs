//! Daemon configuration
//!
//! Stored as JSON with one object per section. Every field is optional in
//! the file; missing fields keep their built-in defaults:
//!
//! ```json
//! {
//!   "main":    { "pwm_pin": 12, "hall_pin": 6, "interval": 2 },
//!   "temp":    { "hyst": 3, "low": 45, "high": 75 },
//!   "speed":   { "idle": 25, "low": 25, "high": 75, "heat": 100, "spin_up": 75 },
//!   "server":  { "unix": "/run/pifan.sock", "unix_rm": true, "unix_mode": "660" },
//!   "logging": { "level": "verbose" }
//! }
//! ```
//!
//! The configuration is built once at startup and never mutated afterwards.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{defaults, hall, pwm, speed, temperature, timing};
use crate::engine::tachometer::SamplerSettings;
use crate::error::{PifanError, Result};
use crate::hw::{HallBias, PwmBoundary, PwmRange};

/// Highest accepted Hall pulses-to-RPM multiplier
const MAX_RPM_SCALE: u32 = 1000;

/// Highest accepted socket permission bits
const MAX_UNIX_MODE: u32 = 0o7777;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub main: MainSettings,
    pub temp: TempSettings,
    pub speed: SpeedSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Pins, PWM range, and loop cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MainSettings {
    pub pwm_pin: u8,
    pub pwm_low: u16,
    pub pwm_high: u16,
    /// Software PWM range; `None` selects the hardware PWM channel
    pub pwm_soft: Option<u16>,
    pub pwm_boundary: PwmBoundary,
    /// Hall sensor input; `None` disables RPM monitoring
    pub hall_pin: Option<u8>,
    pub hall_bias: HallBias,
    pub hall_rpm_scale: u32,
    /// Seconds between control iterations
    pub interval: u64,
}

impl Default for MainSettings {
    fn default() -> Self {
        Self {
            pwm_pin: pwm::DEFAULT_PIN,
            pwm_low: defaults::PWM_LOW,
            pwm_high: defaults::PWM_HIGH,
            pwm_soft: None,
            pwm_boundary: PwmBoundary::default(),
            hall_pin: None,
            hall_bias: HallBias::default(),
            hall_rpm_scale: hall::DEFAULT_RPM_SCALE,
            interval: defaults::INTERVAL_SECS,
        }
    }
}

/// Temperature thresholds (°C)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TempSettings {
    pub hyst: f32,
    pub low: f32,
    pub high: f32,
}

impl Default for TempSettings {
    fn default() -> Self {
        Self {
            hyst: defaults::TEMP_HYSTERESIS,
            low: defaults::TEMP_LOW,
            high: defaults::TEMP_HIGH,
        }
    }
}

/// Speed curve (percent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpeedSettings {
    pub idle: f32,
    pub low: f32,
    pub high: f32,
    pub heat: f32,
    pub spin_up: f32,
    /// Fixed speed that bypasses the curve
    #[serde(rename = "const")]
    pub constant: Option<f32>,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            idle: defaults::SPEED_IDLE,
            low: defaults::SPEED_LOW,
            high: defaults::SPEED_HIGH,
            heat: defaults::SPEED_HEAT,
            spin_up: defaults::SPEED_SPIN_UP,
            constant: None,
        }
    }
}

/// Status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Unix socket path; `None` disables the endpoint
    pub unix: Option<PathBuf>,
    /// Remove an existing socket file before binding
    pub unix_rm: bool,
    /// Permission bits applied after binding, written as an octal string
    #[serde(with = "octal_mode")]
    pub unix_mode: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: LogLevel,
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Verbose,
    Debug,
}

impl LogLevel {
    /// Default filter directive for this level
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Verbose => "debug",
            Self::Debug => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Verbose => write!(f, "verbose"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// Parse permission bits written in octal (`"660"`, `"0o660"`, `"0660"`)
pub fn parse_octal_mode(s: &str) -> Result<u32> {
    let digits = s.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    let mode = u32::from_str_radix(digits, 8).map_err(|_| PifanError::out_of_range("unix_mode", s, 0, MAX_UNIX_MODE as i64))?;
    if mode > MAX_UNIX_MODE {
        return Err(PifanError::out_of_range("unix_mode", format!("{:o}", mode), 0, MAX_UNIX_MODE as i64));
    }
    Ok(mode)
}

mod octal_mode {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match mode {
            Some(mode) => serializer.serialize_str(&format!("{:o}", mode)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| super::parse_octal_mode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

fn check_range<T>(field: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + fmt::Display + Copy + Into<f64>,
{
    if !value.into().is_finite() || value < min || value > max {
        return Err(PifanError::out_of_range(
            field,
            value,
            min.into() as i64,
            max.into() as i64,
        ));
    }
    Ok(())
}

impl Config {
    /// Load a config file.
    ///
    /// A leading `?` marks the file as optional: if it does not exist the
    /// built-in defaults are returned instead.
    pub fn load(source: &str) -> Result<Self> {
        let (path, optional) = match source.strip_prefix('?') {
            Some(rest) => (rest, true),
            None => (source, false),
        };
        let path = Path::new(path);

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Config = serde_json::from_str(&content)?;
                debug!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && optional => {
                debug!(path = %path.display(), "Optional config is missing, using defaults");
                Ok(Self::default())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PifanError::FileNotFound(path.to_path_buf())),
            Err(source) => Err(PifanError::FileRead {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Check per-field ranges and cross-field orderings
    pub fn validate(&self) -> Result<()> {
        let m = &self.main;
        check_range("main.pwm_low", m.pwm_low, pwm::MIN_VALUE, pwm::MAX_VALUE)?;
        check_range("main.pwm_high", m.pwm_high, 1, pwm::MAX_VALUE)?;
        if let Some(soft) = m.pwm_soft {
            check_range("main.pwm_soft", soft, pwm::SOFT_RANGE_MIN, pwm::SOFT_RANGE_MAX)?;
        }
        check_range("main.hall_rpm_scale", m.hall_rpm_scale, 1, MAX_RPM_SCALE)?;
        let interval = u32::try_from(m.interval).unwrap_or(u32::MAX);
        check_range("main.interval", interval, timing::MIN_INTERVAL_SECS as u32, timing::MAX_INTERVAL_SECS as u32)?;
        self.pwm_range()?;

        let t = &self.temp;
        check_range("temp.hyst", t.hyst, temperature::MIN_HYSTERESIS, temperature::MAX_HYSTERESIS)?;
        check_range("temp.low", t.low, 0.0, temperature::MAX_THRESHOLD)?;
        check_range("temp.high", t.high, 0.0, temperature::MAX_THRESHOLD)?;
        if !(t.hyst < t.low && t.low < t.high) {
            return Err(PifanError::InvalidOrdering {
                section: "temp",
                rule: "0 <= hyst < low < high <= 85",
            });
        }

        let s = &self.speed;
        for (field, value) in [
            ("speed.idle", s.idle),
            ("speed.low", s.low),
            ("speed.high", s.high),
            ("speed.heat", s.heat),
            ("speed.spin_up", s.spin_up),
        ] {
            check_range(field, value, speed::MIN_PERCENT, speed::MAX_PERCENT)?;
        }
        if let Some(constant) = s.constant {
            check_range("speed.const", constant, speed::MIN_PERCENT, speed::MAX_PERCENT)?;
        }
        if !(s.idle <= s.low && s.low < s.high && s.high <= s.heat) {
            return Err(PifanError::InvalidOrdering {
                section: "speed",
                rule: "0 <= idle <= low < high <= heat <= 100",
            });
        }

        if let Some(mode) = self.server.unix_mode {
            check_range("server.unix_mode", mode, 0, MAX_UNIX_MODE)?;
        }
        Ok(())
    }

    pub fn pwm_range(&self) -> Result<PwmRange> {
        PwmRange::new(self.main.pwm_low, self.main.pwm_high, self.main.pwm_boundary)
    }

    pub fn has_hall(&self) -> bool {
        self.main.hall_pin.is_some()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.main.interval)
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            rpm_scale: self.main.hall_rpm_scale,
            ..SamplerSettings::default()
        }
    }
}

impl FromStr for LogLevel {
    type Err = PifanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "verbose" => Ok(Self::Verbose),
            "debug" => Ok(Self::Debug),
            other => Err(PifanError::config(format!("Unknown log level '{}'", other))),
        }
    }
}
