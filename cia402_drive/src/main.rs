//! # CiA 402 Drive
//!
//! Runs every configured CiA 402 slave against the simulated fieldbus.
//!
//! Loads the drive TOML, builds the process image from the `[[slaves]]`
//! topology, starts the logging and transport threads plus one periodic
//! thread per drive, and enables each drive into cyclic synchronous velocity
//! at the configured profile velocity. Stops on Ctrl-C or after `--cycles`.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cia402_common::config::{DriveConfig, LogLevel, load_drive_config};
use cia402_drive::control::{ProfileMotionControl, SlopeTorqueControl};
use cia402_drive::cycle::{DriveRunner, spawn_drive, spawn_transport};
use cia402_drive::interfaces::DataLogging;
use cia402_drive::logging::{FileSink, LogQueue, TracingSink};
use cia402_drive::pdo::{ProcessImage, SlavePdoLink};
use cia402_drive::service::{Collaborators, DriveCommand, NetworkDriveService, ServiceOptions};
use cia402_drive::sim::{ImageFeedback, InMemoryObjectDictionary, SimulatedTransport};
use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// CiA 402 network drive service
#[derive(Parser, Debug)]
#[command(name = "cia402_drive")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Cyclic CiA 402 drive service on a simulated fieldbus")]
struct Args {
    /// Path to the drive configuration TOML.
    #[arg(long, value_name = "FILE", default_value = "config/drive.toml")]
    config: PathBuf,

    /// Stop after N cycles (default: run until Ctrl-C).
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,

    /// CPU core to pin the drive threads to.
    #[arg(long)]
    cpu_core: Option<usize>,

    /// SCHED_FIFO priority (used with the `rt` feature).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Append drive log events to this file instead of the console.
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    // Tracing is not up yet; report config errors on stderr.
    let config = match load_drive_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}: {e}", args.config.display());
            process::exit(1);
        }
    };
    setup_tracing(&args, config.shared.log_level);

    info!("CiA 402 drive v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, &config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("CiA 402 drive shutdown complete");
}

fn run(args: &Args, config: &DriveConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cycle_time = Duration::from_micros(u64::from(config.cycle_time_us));
    let profiler = config.profiler();
    info!(
        "Config OK: service={}, log_level={}, cycle_time={}µs, slaves={}",
        config.shared.service_name,
        config.shared.log_level.as_str(),
        config.cycle_time_us,
        config.slaves.len()
    );

    let image = ProcessImage::new(config.topology())?;
    let drives: Vec<u16> = image
        .slaves()
        .iter()
        .filter(|s| s.is_cia402())
        .map(|s| s.id)
        .collect();
    if drives.is_empty() {
        warn!("No CiA 402 slaves configured, only the fieldbus will run");
    }
    let transport = SimulatedTransport::for_image(&image);
    let image = image.into_shared();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let (log, log_service) = LogQueue::bounded(config.log_queue_capacity);
    let log_thread = match &args.log_file {
        Some(path) => log_service.spawn(FileSink::create(path)?)?,
        None => log_service.spawn(TracingSink)?,
    };

    let bus_thread = spawn_transport(
        transport,
        image.clone(),
        cycle_time,
        running.clone(),
        args.cycles,
    )?;

    let mut workers = Vec::with_capacity(drives.len());
    for id in drives {
        let collaborators = Collaborators {
            pdo: Box::new(SlavePdoLink::new(image.clone(), id)),
            od: Box::new(InMemoryObjectDictionary::with_profile(&profiler)),
            torque_control: Box::new(SlopeTorqueControl::new(profiler.max_torque)),
            motion_control: Box::new(ProfileMotionControl::new()),
            feedback_1: Box::new(ImageFeedback::new(image.clone(), id)?),
        };
        let options = ServiceOptions {
            cycle_time,
            ..Default::default()
        };
        let service = NetworkDriveService::production(
            &profiler,
            collaborators,
            None,
            Box::new(log.for_slave(id)),
            options,
        );

        let (runner, handle) = DriveRunner::new(service, cycle_time, running.clone());
        let velocity = i32::try_from(profiler.profile_velocity).unwrap_or(i32::MAX);
        handle.send(DriveCommand::ProfileVelocity(velocity));
        log.for_slave(id).log_user_command("start velocity", 0);

        let thread = spawn_drive(
            runner.with_max_cycles(args.cycles),
            args.cpu_core,
            args.rt_priority,
        )?;
        info!("Drive {id} started");
        workers.push((handle, thread));
    }
    // Drive services hold their own handles.
    drop(log);

    let mut failed = false;
    for (handle, thread) in workers {
        let id = handle.slave_id();
        match thread.join() {
            Ok(Ok(stats)) => info!(
                "Drive {id}: {} cycles, {} overruns, avg {}ns, max {}ns",
                stats.cycle_count,
                stats.overruns,
                stats.avg_cycle_ns(),
                stats.max_cycle_ns
            ),
            Ok(Err(e)) => {
                error!("Drive {id} failed: {e}");
                failed = true;
            }
            Err(_) => {
                error!("Drive {id} thread panicked");
                failed = true;
            }
        }
        if let Some(status) = handle.status() {
            info!(
                "Drive {id}: state={} opmode={:?} errors={:?}",
                status.state, status.opmode, status.errors
            );
        }
    }

    running.store(false, Ordering::SeqCst);
    match bus_thread.join() {
        Ok(frames) => info!("Fieldbus stopped after {frames} frames"),
        Err(_) => error!("Fieldbus thread panicked"),
    }
    match log_thread.join() {
        Ok(written) => info!("Logged {written} events"),
        Err(_) => error!("Logging thread panicked"),
    }

    if failed {
        return Err("one or more drives failed".into());
    }
    Ok(())
}

/// Setup tracing subscriber from the configured level and CLI arguments.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        match configured {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

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
