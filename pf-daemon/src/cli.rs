//! Command line interface
//!
//! Flags override values from the config file, which override the built-in
//! defaults. Range and ordering checks run once on the merged result.

use std::path::PathBuf;

use clap::Parser;
use pf_core::config::parse_octal_mode;
use pf_core::{Config, HallBias, LogLevel, PifanError, PwmBoundary};

#[derive(Debug, Parser)]
#[command(name = "pifand", version, about = "Temperature-driven PWM fan controller")]
pub struct Cli {
    /// JSON config file; a leading '?' ignores a missing file
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<String>,

    /// GPIO pin driving the fan PWM input
    #[arg(long, value_name = "PIN")]
    pub pwm_pin: Option<u8>,

    /// PWM value for the lowest interpolated speed (0-1024)
    #[arg(long, value_name = "N")]
    pub pwm_low: Option<u16>,

    /// PWM value for the highest interpolated speed (1-1024)
    #[arg(long, value_name = "N")]
    pub pwm_high: Option<u16>,

    /// Use software PWM with this range (50-100)
    #[arg(long, value_name = "N")]
    pub pwm_soft: Option<u16>,

    /// PWM written for 0% and 100%: 'raw' (0/1024) or 'range' (low/high)
    #[arg(long, value_name = "MODE")]
    pub pwm_boundary: Option<PwmBoundary>,

    /// GPIO pin of the Hall sensor; negative disables RPM monitoring
    #[arg(long, value_name = "PIN", allow_negative_numbers = true)]
    pub hall_pin: Option<i32>,

    /// Hall pin bias: 0/disabled, 1/pull-down, 2/pull-up
    #[arg(long, value_name = "BIAS")]
    pub hall_bias: Option<HallBias>,

    /// RPM per pulse counted in one sampling window
    #[arg(long, value_name = "N")]
    pub hall_rpm_scale: Option<u32>,

    /// Temperature change needed to recompute the speed (1-5)
    #[arg(long, value_name = "C")]
    pub temp_hyst: Option<f32>,

    /// Start of the interpolation range (0-85)
    #[arg(long, visible_alias = "temp-min", value_name = "C")]
    pub temp_low: Option<f32>,

    /// End of the interpolation range (0-85)
    #[arg(long, visible_alias = "temp-max", value_name = "C")]
    pub temp_high: Option<f32>,

    /// Speed below temp-low, percent
    #[arg(long, value_name = "PERCENT")]
    pub speed_idle: Option<f32>,

    /// Speed at temp-low, percent
    #[arg(long, visible_alias = "speed-min", value_name = "PERCENT")]
    pub speed_low: Option<f32>,

    /// Speed at temp-high, percent
    #[arg(long, visible_alias = "speed-max", value_name = "PERCENT")]
    pub speed_high: Option<f32>,

    /// Speed above temp-high, percent
    #[arg(long, value_name = "PERCENT")]
    pub speed_heat: Option<f32>,

    /// Speed used briefly to start a stopped fan, percent
    #[arg(long, value_name = "PERCENT")]
    pub speed_spin_up: Option<f32>,

    /// Fixed speed that ignores temperature; negative disables it
    #[arg(long, value_name = "PERCENT", allow_negative_numbers = true)]
    pub speed_const: Option<f32>,

    /// Serve status over this Unix socket
    #[arg(long, value_name = "PATH")]
    pub unix: Option<PathBuf>,

    /// Remove an existing socket file before binding
    #[arg(long)]
    pub unix_rm: bool,

    /// Socket permissions, octal
    #[arg(long, value_name = "MODE", value_parser = parse_mode)]
    pub unix_mode: Option<u32>,

    /// Seconds between control iterations (1-10)
    #[arg(short = 'i', long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Log speed changes and other details
    #[arg(long)]
    pub verbose: bool,

    /// Log every iteration
    #[arg(long)]
    pub debug: bool,
}

fn parse_mode(s: &str) -> Result<u32, String> {
    parse_octal_mode(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Overlay the flags that were given onto `config`
    pub fn apply_to(&self, config: &mut Config) -> Result<(), PifanError> {
        let main = &mut config.main;
        if let Some(v) = self.pwm_pin {
            main.pwm_pin = v;
        }
        if let Some(v) = self.pwm_low {
            main.pwm_low = v;
        }
        if let Some(v) = self.pwm_high {
            main.pwm_high = v;
        }
        if let Some(v) = self.pwm_soft {
            main.pwm_soft = Some(v);
        }
        if let Some(v) = self.pwm_boundary {
            main.pwm_boundary = v;
        }
        if let Some(pin) = self.hall_pin {
            main.hall_pin = match pin {
                p if p < 0 => None,
                p => Some(u8::try_from(p).map_err(|_| PifanError::out_of_range("--hall-pin", p, -1, 255))?),
            };
        }
        if let Some(v) = self.hall_bias {
            main.hall_bias = v;
        }
        if let Some(v) = self.hall_rpm_scale {
            main.hall_rpm_scale = v;
        }
        if let Some(v) = self.interval {
            main.interval = v;
        }

        let temp = &mut config.temp;
        if let Some(v) = self.temp_hyst {
            temp.hyst = v;
        }
        if let Some(v) = self.temp_low {
            temp.low = v;
        }
        if let Some(v) = self.temp_high {
            temp.high = v;
        }

        let speed = &mut config.speed;
        if let Some(v) = self.speed_idle {
            speed.idle = v;
        }
        if let Some(v) = self.speed_low {
            speed.low = v;
        }
        if let Some(v) = self.speed_high {
            speed.high = v;
        }
        if let Some(v) = self.speed_heat {
            speed.heat = v;
        }
        if let Some(v) = self.speed_spin_up {
            speed.spin_up = v;
        }
        if let Some(v) = self.speed_const {
            speed.constant = if v < 0.0 { None } else { Some(v) };
        }

        let server = &mut config.server;
        if let Some(path) = &self.unix {
            server.unix = Some(path.clone());
        }
        if self.unix_rm {
            server.unix_rm = true;
        }
        if let Some(mode) = self.unix_mode {
            server.unix_mode = Some(mode);
        }

        if self.debug {
            config.logging.level = LogLevel::Debug;
        } else if self.verbose {
            config.logging.level = LogLevel::Verbose;
        }
        Ok(())
    }

    /// Defaults, then the config file, then the flags; validated
    pub fn load_config(&self) -> Result<Config, PifanError> {
        let mut config = match &self.config {
            Some(source) => Config::load(source)?,
            None => Config::default(),
        };
        self.apply_to(&mut config)?;
        config.validate()?;
        Ok(config)
    }
}
