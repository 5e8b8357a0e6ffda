//! Hall sensor tachometer
//!
//! A background thread waits on falling-edge events from the fan's tach
//! line and turns them into an RPM estimate once per window. The estimate is
//! published through a single atomic so the control loop can read it at any
//! time without locking.
//!
//! The stored value is either a measurement (`>= 0`), [`hall::RPM_PENDING`]
//! before the first window has completed, or [`hall::RPM_FAILED`] once the
//! sensor has failed. A failed sampler does not restart.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::constants::hall;
use crate::error::Result;
use crate::hw::port::EdgeSource;
use crate::system::StopSignal;

/// Decoded view of the shared RPM value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpmReading {
    Measured(u32),
    /// No window has completed yet
    Pending,
    /// Sensor failed; sampling has stopped for good
    Failed,
}

impl RpmReading {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            r if r >= 0 => Self::Measured(r as u32),
            hall::RPM_PENDING => Self::Pending,
            _ => Self::Failed,
        }
    }

    /// Value as reported over the status endpoint
    pub fn as_raw(&self) -> i32 {
        match self {
            Self::Measured(rpm) => i32::try_from(*rpm).unwrap_or(i32::MAX),
            Self::Pending => hall::RPM_PENDING,
            Self::Failed => hall::RPM_FAILED,
        }
    }
}

/// Something the controller can ask for the current fan speed
pub trait RpmSource: Send {
    fn read_rpm(&self) -> RpmReading;
}

/// Single-writer, multi-reader RPM cell
#[derive(Debug, Clone)]
pub struct RpmGauge(Arc<AtomicI32>);

impl RpmGauge {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI32::new(hall::RPM_PENDING)))
    }

    fn store(&self, raw: i32) {
        self.0.store(raw, Ordering::Release);
    }

    pub fn raw(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for RpmGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl RpmSource for RpmGauge {
    fn read_rpm(&self) -> RpmReading {
        RpmReading::from_raw(self.raw())
    }
}

/// Rolling pulse accumulator
#[derive(Debug, Clone)]
pub struct PulseWindow {
    pulses: u32,
    started: Instant,
    length: Duration,
    scale: u32,
}

impl PulseWindow {
    pub fn new(started: Instant, length: Duration, scale: u32) -> Self {
        Self {
            pulses: 0,
            started,
            length,
            scale,
        }
    }

    /// Add `events` seen at `now`.
    ///
    /// Returns the RPM for the window when `now` has crossed its end; the
    /// accumulator is then reset and a new window starts at `now`.
    pub fn record(&mut self, events: u32, now: Instant) -> Option<i32> {
        self.pulses = self.pulses.saturating_add(events);
        if now.saturating_duration_since(self.started) < self.length {
            return None;
        }
        let rpm = i32::try_from(self.pulses.saturating_mul(self.scale)).unwrap_or(i32::MAX);
        self.pulses = 0;
        self.started = now;
        Some(rpm)
    }
}

/// Sampling parameters
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub poll_timeout: Duration,
    pub window: Duration,
    pub rpm_scale: u32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: hall::POLL_TIMEOUT,
            window: hall::WINDOW,
            rpm_scale: hall::DEFAULT_RPM_SCALE,
        }
    }
}

/// Owner of the sampling thread
///
/// Dropping it stops and joins the thread.
pub struct Tachometer {
    gauge: RpmGauge,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl Tachometer {
    /// Start sampling `source` on a dedicated thread.
    ///
    /// The thread stops when `stop` (or this tachometer) is stopped.
    pub fn spawn<E>(source: E, settings: SamplerSettings, stop: &StopSignal) -> Result<Self>
    where
        E: EdgeSource + 'static,
    {
        let gauge = RpmGauge::new();
        let stop = stop.child();
        let handle = thread::Builder::new().name("pf-hall".into()).spawn({
            let gauge = gauge.clone();
            let stop = stop.clone();
            move || sample(source, settings, &gauge, &stop)
        })?;
        Ok(Self {
            gauge,
            stop,
            handle: Some(handle),
        })
    }

    /// Handle for readers of the current RPM
    pub fn gauge(&self) -> RpmGauge {
        self.gauge.clone()
    }

    /// Stop the sampler and wait for the thread to exit
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Hall sampler thread panicked");
            }
        }
    }
}

impl Drop for Tachometer {
    fn drop(&mut self) {
        self.join();
    }
}

fn sample<E: EdgeSource>(mut source: E, settings: SamplerSettings, gauge: &RpmGauge, stop: &StopSignal) {
    let poll_timeout = settings.poll_timeout.min(hall::MAX_POLL_TIMEOUT);
    let mut window = PulseWindow::new(Instant::now(), settings.window, settings.rpm_scale);
    debug!(scale = settings.rpm_scale, "Hall sampler started");

    while !stop.is_stopped() {
        match source.wait_event(poll_timeout) {
            Ok(events) => {
                if let Some(rpm) = window.record(events.unwrap_or(0), Instant::now()) {
                    trace!(rpm, "Hall window closed");
                    gauge.store(rpm);
                }
            }
            Err(e) => {
                error!(error = %e, "Can't wait for Hall sensor events");
                gauge.store(hall::RPM_FAILED);
                break;
            }
        }
    }

    debug!("Hall sampler stopped");
}
