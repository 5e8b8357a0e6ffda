//! Hardware interaction
//!
//! - `port` - traits the control core drives hardware through
//! - `actuator` - percent to PWM mapping
//! - `thermal` - sysfs thermal zone temperature source

pub mod actuator;
pub mod port;
pub mod thermal;

pub use actuator::{FanActuator, PwmBoundary, PwmRange};
pub use port::{EdgeSource, HallBias, PwmOutput, TemperatureSource};
pub use thermal::ThermalZone;
