//! Shared status between the control loop and the status reporter
//!
//! The control loop is the only writer. Readers copy the whole snapshot
//! under a short lock, so they see either the previous or the current
//! publication, never a mix of both.

use parking_lot::Mutex;

use crate::constants::hall;

/// Last published control and measurement values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    pub temp_real: f32,
    pub temp_fixed: f32,
    pub speed: f32,
    pub pwm: u16,
    pub rpm: i32,
    pub ok: bool,
    /// Monotonic seconds of the last transition to not-ok; `None` if never
    pub last_fail_ts: Option<f64>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            temp_real: 0.0,
            temp_fixed: 0.0,
            speed: 0.0,
            pwm: 0,
            rpm: hall::RPM_PENDING,
            ok: true,
            last_fail_ts: None,
        }
    }
}

/// Mutex-guarded snapshot cell
#[derive(Debug, Default)]
pub struct SharedStatus {
    has_hall: bool,
    inner: Mutex<StatusSnapshot>,
}

impl SharedStatus {
    pub fn new(has_hall: bool) -> Self {
        Self {
            has_hall,
            inner: Mutex::new(StatusSnapshot::default()),
        }
    }

    pub fn has_hall(&self) -> bool {
        self.has_hall
    }

    pub fn publish(&self, snapshot: StatusSnapshot) {
        *self.inner.lock() = snapshot;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        *self.inner.lock()
    }
}
