//! Control engine
//!
//! - `curve` - temperature to speed mapping
//! - `tachometer` - Hall sensor sampling thread and shared RPM
//! - `control` - the thermostat loop

pub mod control;
pub mod curve;
pub mod tachometer;

pub use control::{ControlState, Controller, Timing};
pub use curve::{remap, Mode, SpeedCurve};
pub use tachometer::{PulseWindow, RpmGauge, RpmReading, RpmSource, SamplerSettings, Tachometer};
