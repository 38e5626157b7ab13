//! Pump coordinator CLI: config loading, logging setup, and a simulated
//! closed-loop run.

mod cli;
mod sim;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use eyre::{Result, WrapErr};

use crate::cli::{Cli, Commands, FILE_GUARD};
use crate::sim::{ConsoleSinks, InMemoryEngine, SimMonitor, SimPump};
use pumphub_core::coordinator::{Coordinator, CoordinatorCfg, Sinks};
use pumphub_remote::HttpTargetSource;
use pumphub_traits::Clock;
use pumphub_traits::clock::test_clock::TestClock;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let config = load_config(&args.config, matches!(args.cmd, Commands::CheckConfig))?;
    init_logging(args.json, &args.log_level, &config.logging)?;

    match args.cmd {
        Commands::CheckConfig => {
            println!("config ok: {}", args.config.display());
            Ok(())
        }
        Commands::Run {
            duration_secs,
            tick_ms,
            accel,
            bolus,
        } => run(&config, duration_secs, tick_ms, accel, bolus),
    }
}

/// Load and validate the config. A missing file is an error for
/// `check-config` and a warning (with defaults) otherwise.
fn load_config(path: &Path, strict: bool) -> Result<pumphub_config::Config> {
    if !path.exists() {
        if strict {
            eyre::bail!("config file not found: {}", path.display());
        }
        eprintln!("no config at {}; using defaults", path.display());
        return Ok(pumphub_config::Config::default());
    }
    let raw = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    let config = pumphub_config::load_toml(&raw)
        .wrap_err_with(|| format!("failed to parse config {}", path.display()))?;
    config
        .validate()
        .wrap_err_with(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn init_logging(json: bool, level: &str, logging: &pumphub_config::Logging) -> Result<()> {
    let directive = level
        .parse()
        .wrap_err_with(|| format!("invalid log level {level:?}"))?;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(directive);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path.file_name().unwrap_or_else(|| "pumphub.log".as_ref());
            let dir = dir.unwrap_or_else(|| ".".as_ref());
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let builder = builder.with_writer(writer).with_ansi(false);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        None => {
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
    Ok(())
}

fn run(
    config: &pumphub_config::Config,
    duration_secs: Option<u64>,
    tick_ms: u64,
    accel: u64,
    bolus: Option<f64>,
) -> Result<()> {
    // Simulated wall clock: each real tick advances it by `accel` seconds.
    let clock = Arc::new(TestClock::new());

    let mut builder = Coordinator::builder()
        .with_engine(InMemoryEngine::new(clock.clone()))
        .with_clock(clock.clone())
        .with_cfg(CoordinatorCfg::from(config))
        .with_sinks(Sinks {
            notifications: Arc::new(ConsoleSinks),
            analytics: Arc::new(ConsoleSinks),
            alarm: Arc::new(ConsoleSinks),
            upload: Arc::new(ConsoleSinks),
        });
    if config.remote.url.is_some() {
        let source =
            HttpTargetSource::from_config(&config.remote).wrap_err("remote target source")?;
        builder = builder.with_target_source(Arc::new(source));
        tracing::info!("remote temp-target polling enabled");
    }
    let coordinator = builder.build()?;

    coordinator.set_glucose_monitor(Some(Box::new(SimMonitor::new(clock.clone()))));
    let (pump, pump_state) = SimPump::new(180.0);
    coordinator.set_pump(Some(Box::new(pump)));

    if let Some(units) = bolus {
        coordinator.request_bolus(
            units,
            clock.now(),
            Box::new(|outcome| match outcome {
                Ok(()) => tracing::info!("startup bolus delivered"),
                Err(e) => tracing::error!(error = %e, "startup bolus failed"),
            }),
        );
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .wrap_err("failed to install signal handler")?;
    }

    let monitor_delegate = coordinator.monitor_delegate();
    let pump_delegate = coordinator.pump_delegate();
    let mut previous_status = pump_state.snapshot();
    let started = Instant::now();
    let mut tick: u64 = 0;

    tracing::info!(?duration_secs, tick_ms, accel, "simulation started");
    while !shutdown.load(Ordering::SeqCst) {
        if let Some(limit) = duration_secs
            && started.elapsed() >= Duration::from_secs(limit)
        {
            break;
        }
        thread::sleep(Duration::from_millis(tick_ms));
        clock.advance(Duration::from_secs(accel));
        tick += 1;

        monitor_delegate.monitor_heartbeat();
        pump_state.drain(0.02, 0.05);

        if tick % 5 == 0 {
            pump_delegate.pump_recommends_loop();
        }
        if tick % 10 == 0 {
            pump_delegate.pump_reservoir_reading(
                pump_state.reservoir(),
                clock.now(),
                Box::new(|outcome| {
                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "reservoir reading rejected");
                    }
                }),
            );
            let current = pump_state.snapshot();
            if current != previous_status {
                pump_delegate.pump_status_changed(current.clone(), previous_status);
                previous_status = current;
            }
        }
    }

    tracing::info!("shutting down");
    coordinator.set_pump(None);
    coordinator.set_glucose_monitor(None);
    if let Some((at, message)) = coordinator.last_error() {
        tracing::warn!(%at, message, "last recorded device error");
    }
    Ok(())
}
