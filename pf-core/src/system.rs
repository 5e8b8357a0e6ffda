//! Process-level helpers: monotonic clock and cooperative stop signal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::timing;

/// Seconds on the system monotonic clock, rounded to milliseconds
///
/// Status timestamps use this clock so they can be compared with other
/// readings of the same clock on the host (e.g. uptime).
pub fn monotonic_seconds() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime only writes into the provided, properly initialized timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0.0;
    }
    let millis = (ts.tv_nsec as f64 / 1.0e6).round();
    ts.tv_sec as f64 + millis / 1000.0
}

/// Process-wide cancellation token
///
/// Cloning shares the flag. A [`StopSignal::child`] observes its parents but
/// can also be stopped on its own, which lets a component wind down a helper
/// thread without stopping the whole process.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    own: Arc<AtomicBool>,
    parents: Vec<Arc<AtomicBool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; observed by every clone and child
    pub fn stop(&self) {
        self.own.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.own.load(Ordering::SeqCst) || self.parents.iter().any(|p| p.load(Ordering::SeqCst))
    }

    /// Derived token stopped by either this signal or its own `stop()`
    pub fn child(&self) -> Self {
        let mut parents = self.parents.clone();
        parents.push(self.own.clone());
        Self {
            own: Arc::new(AtomicBool::new(false)),
            parents,
        }
    }

    /// Guard that stops this signal when dropped, including during unwinding
    pub fn stop_on_drop(&self) -> StopGuard {
        StopGuard {
            signal: self.clone(),
        }
    }

    /// Sleep for `duration` in short slices, waking early on stop.
    ///
    /// Returns `true` if the full duration elapsed, `false` if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(timing::STOP_POLL));
        }
    }
}

/// Returned by [`StopSignal::stop_on_drop`]
#[derive(Debug)]
pub struct StopGuard {
    signal: StopSignal,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.signal.stop();
    }
}
