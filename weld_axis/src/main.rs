//! # Weld Axis Daemon
//!
//! Runs one axis controller per configured weld-head axis. Without hardware
//! access the daemon attaches simulated drives (`--simulate`); the real
//! fieldbus master is provided by the host system.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use weld_axis::config::ControllerConfig;
use weld_axis::controller::{AxisController, create_controller};
use weld_axis::observer::LoggingObserver;
use weld_axis::sampling::NullSampleSink;
use weld_common::axis::types::{HeadMode, PositionKind};
use weld_common::config::{ConfigLoader, LogLevel};
use weld_hal::simulation::{SimBus, SimDrive, SimDriveConfig};

/// Weld head axis controller
#[derive(Parser, Debug)]
#[command(name = "weld_axis")]
#[command(version)]
#[command(about = "Per-axis CiA 402 motion controller for the weld head")]
struct Args {
    /// Path to the controller configuration TOML.
    #[arg(long, default_value = "config/weld_axis.toml")]
    config: PathBuf,

    /// Attach simulated drives instead of a fieldbus master.
    #[arg(long)]
    simulate: bool,

    /// Home every axis after start.
    #[arg(long)]
    home: bool,

    /// Drive every axis to this absolute position after start (and homing).
    #[arg(long, value_name = "POS", allow_negative_numbers = true)]
    move_to: Option<i32>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config = ControllerConfig::load(&args.config);
    let log_level = config
        .as_ref()
        .map(|c| c.controller.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);

    info!("Weld axis controller v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = match config {
        Ok(config) => run(&args, config),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Weld axis controller shutdown complete");
}

fn run(args: &Args, config: ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    info!(
        "Config OK: cycle_time={}µs, axes={}",
        config.controller.cycle_time_us,
        config.axes.len()
    );

    if !args.simulate {
        return Err("no fieldbus master available in this build, run with --simulate".into());
    }

    let bus = Arc::new(SimBus::new());
    for entry in &config.axes {
        bus.attach(SimDrive::new(SimDriveConfig::new(entry.address())));
    }

    let mut controllers: Vec<Box<dyn AxisController>> = Vec::with_capacity(config.axes.len());
    for entry in &config.axes {
        let controller = create_controller(
            entry.identity(),
            entry.axis_config(),
            &config.controller,
            bus.clone(),
            Arc::new(LoggingObserver),
            Arc::new(NullSampleSink),
        )?;
        bus.subscribe(entry.address(), controller.input_handler())?;
        controllers.push(controller);
    }
    bus.start()?;
    info!("{} axis controller(s) running", controllers.len());

    // Setup signal handler for graceful shutdown.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    if args.home || args.move_to.is_some() {
        startup_motion(&controllers, args.home, args.move_to);
    }

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    for controller in &controllers {
        if !controller.request_mode(HeadMode::Offline, false, false) {
            warn!(axis = %controller.tag(), "axis did not confirm offline mode");
        }
        controller.shutdown();
    }
    bus.stop();
    Ok(())
}

/// Bring every axis into Position mode (homing if asked) and optionally
/// drive it to `target`. Axes run in parallel.
fn startup_motion(controllers: &[Box<dyn AxisController>], home: bool, target: Option<i32>) {
    thread::scope(|s| {
        for controller in controllers {
            s.spawn(move || {
                let axis = controller.tag();
                if !controller.request_mode(HeadMode::Position, home, false) {
                    error!(%axis, "Axis {axis}: failed to enter positioning mode");
                    return;
                }
                info!(%axis, home, "positioning mode active");
                if let Some(target) = target {
                    if controller.request_position(target, PositionKind::Absolute) {
                        info!(%axis, position = controller.position(), "startup move done");
                    } else {
                        error!(%axis, target, "Axis {axis}: startup move failed");
                    }
                }
            });
        }
    });
}

/// Level used when `RUST_LOG` is unset: `--verbose` wins over the config.
fn default_level(args: &Args, configured: LogLevel) -> Level {
    if args.verbose {
        Level::DEBUG
    } else {
        configured.into()
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level(args, configured).into())
        .from_env_lossy();

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
