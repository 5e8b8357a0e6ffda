//! File-backed temperature source
//!
//! Linux thermal zones report temperatures in millidegrees Celsius
//! (e.g. 45000 = 45.0°C). The conversion is handled here.

use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{paths, temperature};
use crate::error::{PifanError, Result};
use crate::hw::port::TemperatureSource;

/// Reads a sysfs thermal zone
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ThermalZone {
    fn default() -> Self {
        Self::new(paths::THERMAL_ZONE)
    }
}

impl TemperatureSource for ThermalZone {
    fn read_celsius(&mut self) -> Result<f32> {
        let content = fs::read_to_string(&self.path).map_err(|e| PifanError::TemperatureRead {
            path: self.path.clone(),
            reason: format!("Failed to read: {}", e),
        })?;

        let millidegrees = content.trim().parse::<i32>().map_err(|e| PifanError::TemperatureRead {
            path: self.path.clone(),
            reason: format!("Failed to parse '{}': {}", content.trim(), e),
        })?;

        Ok(millidegrees as f32 / temperature::MILLIDEGREE_DIVISOR)
    }
}
