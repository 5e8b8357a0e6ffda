//! Constants and configuration values for pifan
//!
//! Centralizes the magic numbers, paths, and configuration defaults.
//! Add new values here instead of sprinkling literals through the control code.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Board temperature in millidegrees Celsius
    pub const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

    /// Present when systemd-journald accepts native log records
    pub const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";
}

/// PWM output constants
pub mod pwm {
    /// Lowest raw PWM value
    pub const MIN_VALUE: u16 = 0;

    /// Highest raw PWM value (full speed)
    pub const MAX_VALUE: u16 = 1024;

    /// GPIO 12 carries PWM0 on the Raspberry Pi header
    pub const DEFAULT_PIN: u8 = 12;

    /// Accepted software PWM range (0...N)
    pub const SOFT_RANGE_MIN: u16 = 50;
    pub const SOFT_RANGE_MAX: u16 = 100;

    /// Hardware PWM carrier frequency for 4-pin fans (Hz)
    pub const HARDWARE_FREQUENCY_HZ: f64 = 25_000.0;

    /// Software PWM pulse unit is 100µs, so the period is `range * 100µs`
    pub const SOFT_PULSE_UNIT_HZ: f64 = 10_000.0;
}

/// Temperature constants
pub mod temperature {
    /// Temperature readings are in millidegrees, divide by this to get Celsius
    pub const MILLIDEGREE_DIVISOR: f32 = 1000.0;

    /// Upper bound accepted for any threshold (Celsius)
    pub const MAX_THRESHOLD: f32 = 85.0;

    /// Accepted hysteresis range (Celsius)
    pub const MIN_HYSTERESIS: f32 = 1.0;
    pub const MAX_HYSTERESIS: f32 = 5.0;
}

/// Speed percentage constants
pub mod speed {
    pub const MIN_PERCENT: f32 = 0.0;
    pub const MAX_PERCENT: f32 = 100.0;
}

/// Hall sensor (tachometer) constants
pub mod hall {
    use super::Duration;

    /// Longest wait for an edge before re-checking the stop flag
    pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

    /// Upper bound for `POLL_TIMEOUT` overrides
    pub const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(150);

    /// Pulses are accumulated over this window before conversion to RPM
    pub const WINDOW: Duration = Duration::from_secs(1);

    /// Two pulses per revolution over a 2s effective window
    pub const DEFAULT_RPM_SCALE: u32 = 30;

    /// Stored RPM when the sensor failed and sampling stopped
    pub const RPM_FAILED: i32 = -1;

    /// Stored RPM before the first window has completed
    pub const RPM_PENDING: i32 = -2;

    /// Maximum events drained from the kernel queue in one wait
    pub const MAX_EVENT_BATCH: u32 = 16;
}

/// Control loop timing
pub mod timing {
    use super::Duration;

    /// Granularity of interruptible sleeps
    pub const STOP_POLL: Duration = Duration::from_millis(100);

    /// Hold time at spin-up speed before the steady speed is committed
    pub const SPIN_UP_SETTLE: Duration = Duration::from_secs(2);

    /// Wait between full-throttle retries while the fan is stalled
    pub const STALL_RETRY: Duration = Duration::from_secs(2);

    /// Accepted poll interval range (seconds)
    pub const MIN_INTERVAL_SECS: u64 = 1;
    pub const MAX_INTERVAL_SECS: u64 = 10;
}

/// Built-in configuration defaults
pub mod defaults {
    pub const PWM_LOW: u16 = 0;
    pub const PWM_HIGH: u16 = 1024;
    pub const INTERVAL_SECS: u64 = 1;

    pub const TEMP_HYSTERESIS: f32 = 3.0;
    pub const TEMP_LOW: f32 = 45.0;
    pub const TEMP_HIGH: f32 = 75.0;

    pub const SPEED_IDLE: f32 = 25.0;
    pub const SPEED_LOW: f32 = 25.0;
    pub const SPEED_HIGH: f32 = 75.0;
    pub const SPEED_HEAT: f32 = 100.0;
    pub const SPEED_SPIN_UP: f32 = 75.0;
}
