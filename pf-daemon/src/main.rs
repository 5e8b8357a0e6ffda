//! pifan daemon (pifand)
//!
//! Drives a PWM fan from the board temperature and optionally verifies the
//! fan is turning through its Hall sensor. The latest state can be queried
//! over a local Unix socket.
//!
//! # Threads
//! - **main**: tokio current-thread runtime running the status server
//! - **pf-control**: the control loop (blocking sleeps)
//! - **pf-hall**: the tachometer sampler, when a Hall pin is configured
//!
//! # Shutdown
//! SIGINT/SIGTERM set the stop signal. The control loop leaves the fan at
//! full speed, the sampler is joined, then hardware handles are released.

mod cli;
mod rpi;
mod server;

use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use clap::Parser;
use pf_core::constants::{paths, timing};
use pf_core::{Config, Controller, FanActuator, LogLevel, SharedStatus, StopSignal, Tachometer, ThermalZone};
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::rpi::{RpiHallSensor, RpiPwm};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable overriding the configured log filter
const LOG_ENV: &str = "PIFAN_LOG";

/// Install the tracing subscriber; returns whether journald is used
fn init_logging(level: LogLevel) -> bool {
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| level.filter_directive().to_string());

    if Path::new(paths::JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&filter))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(&filter)
        .init();
    false
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        error!(%location, %message, "PANIC");
    }));
}

async fn run(config: Config) -> anyhow::Result<()> {
    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("Received termination signal, stopping");
            stop.stop();
        })
        .context("Can't install signal handler")?;
    }

    let output = RpiPwm::open(&config.main).context("Can't open PWM output")?;
    let actuator = FanActuator::new(output, config.pwm_range()?);

    let tachometer = match config.main.hall_pin {
        Some(pin) => {
            let sensor = RpiHallSensor::open(pin, config.main.hall_bias).context("Can't open Hall sensor")?;
            Some(Tachometer::spawn(sensor, config.sampler_settings(), &stop)?)
        }
        None => None,
    };

    let server = match &config.server.unix {
        Some(path) => {
            let listener = server::bind(path, config.server.unix_rm, config.server.unix_mode)
                .context("Can't start status server")?;
            Some((listener, Arc::new(SharedStatus::new(config.has_hall()))))
        }
        None => None,
    };

    let mut controller = Controller::new(&config, actuator, ThermalZone::default(), stop.clone());
    if let Some(tachometer) = &tachometer {
        controller = controller.with_rpm_source(Box::new(tachometer.gauge()));
    }
    if let Some((_, status)) = &server {
        controller = controller.with_status(status.clone());
    }

    let control = thread::Builder::new()
        .name("pf-control".into())
        .spawn({
            let stop = stop.clone();
            move || {
                let _guard = stop.stop_on_drop();
                let result = controller.run();
                (controller, result)
            }
        })
        .context("Can't start control thread")?;

    match server {
        Some((listener, status)) => server::serve(listener, status, stop.clone()).await,
        None => {
            while !stop.is_stopped() {
                tokio::time::sleep(timing::STOP_POLL).await;
            }
        }
    }

    let joined = control.join();
    if let Some(tachometer) = tachometer {
        tachometer.shutdown();
    }
    // A panicked control thread already dropped the controller while unwinding
    let result = match joined {
        Ok((controller, result)) => {
            drop(controller);
            result.context("Fan control failed")
        }
        Err(_) => Err(anyhow!("Control thread panicked")),
    };

    if let Some(path) = &config.server.unix {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Can't remove socket");
        }
    }

    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let journald = init_logging(config.logging.level);
    install_panic_hook();

    info!(
        version = VERSION,
        log = if journald { "journald" } else { "stderr" },
        level = %config.logging.level,
        "Starting pifand"
    );
    info!(
        pwm_pin = config.main.pwm_pin,
        hall_pin = ?config.main.hall_pin,
        temp_low = config.temp.low,
        temp_high = config.temp.high,
        speed_const = ?config.speed.constant,
        "Configuration"
    );

    let result = run(config).await;
    info!("Bye-bye");

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
