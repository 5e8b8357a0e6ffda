//! pifan core library
//!
//! Closed-loop fan control for single-board computers: a temperature drives
//! a PWM fan through a speed curve with hysteresis, while an optional Hall
//! sensor confirms the fan is actually turning.
//!
//! # Module Structure
//!
//! - `hw/` - Hardware ports, PWM mapping, thermal zone
//! - `engine/` - Speed curve, tachometer sampler, control loop
//! - `config` - JSON configuration with validation
//! - `status` - Snapshot shared with the status endpoint
//!
//! # Example
//!
//! ```no_run
//! use pf_core::{Config, Controller, FanActuator, StopSignal, ThermalZone};
//! # use pf_core::hw::PwmOutput;
//! # fn demo<P: PwmOutput>(output: P) -> pf_core::Result<()> {
//! let config = Config::default();
//! let actuator = FanActuator::new(output, config.pwm_range()?);
//! let mut controller = Controller::new(&config, actuator, ThermalZone::default(), StopSignal::new());
//! controller.run()?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod hw;

pub mod config;
pub mod constants;
pub mod error;
pub mod status;
pub mod system;

pub use config::{Config, LogLevel};
pub use engine::{ControlState, Controller, Mode, RpmGauge, RpmReading, RpmSource, SamplerSettings, SpeedCurve, Tachometer};
pub use error::{PifanError, Result};
pub use hw::{EdgeSource, FanActuator, HallBias, PwmBoundary, PwmOutput, PwmRange, TemperatureSource, ThermalZone};
pub use status::{SharedStatus, StatusSnapshot};
pub use system::{monotonic_seconds, StopGuard, StopSignal};
