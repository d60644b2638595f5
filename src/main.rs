use anyhow::{Context, Result};
use clap::Parser;
use solarcharge::clients::{SolarEdgeClient, TeslaFleetClient};
use solarcharge::clock::{Clock, SystemClock, shutdown_channel};
use solarcharge::config::Config;
use solarcharge::daytime::build_window;
use solarcharge::logging::init_logging;
use solarcharge::persistence::PersistenceManager;
use solarcharge::{Collaborators, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "solarcharge", version = env!("APP_VERSION"))]
#[command(about = "Charge an EV from solar surplus", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulate vehicle commands
    #[arg(long)]
    dry_run: bool,

    /// Log at DEBUG level
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    config.apply_env_overrides();
    if cli.dry_run {
        config.dry_run = true;
    }
    if cli.verbose {
        config.logging.level = "DEBUG".to_string();
        config.logging.console_level = Some("DEBUG".to_string());
    }
    config.validate().context("Invalid configuration")?;
    config.require_credentials()?;
    Ok(config)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        "Solarcharge {} starting up (mode={:?}, dry_run={})",
        env!("APP_VERSION"),
        config.control.mode,
        config.dry_run
    );

    let (trigger, shutdown) = shutdown_channel();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let solar = Arc::new(SolarEdgeClient::new(
        &config.solaredge,
        &config.gateway.solar,
        clock.clone(),
        shutdown.clone(),
    )?);
    if !solar.is_configured() {
        warn!("SolarEdge credentials missing; charging will hold for lack of solar data");
    }
    let tesla = Arc::new(TeslaFleetClient::new(
        &config.tesla,
        &config.gateway.vehicle,
        config.dry_run,
        clock.clone(),
        shutdown.clone(),
    )?);

    let collaborators = Collaborators {
        solar,
        vehicle: tesla.clone(),
        commands: tesla,
        daytime: build_window(&config.daytime)?,
        clock,
    };
    let mut scheduler = Scheduler::new(&config, collaborators);

    if config.persistence.enabled {
        let mut persistence = PersistenceManager::new(&config.persistence.state_file);
        match persistence.load() {
            Ok(()) => scheduler = scheduler.with_persistence(persistence),
            Err(e) => {
                warn!("Ignoring unreadable state file: {}", e);
                scheduler = scheduler.with_persistence(PersistenceManager::new(
                    &config.persistence.state_file,
                ));
            }
        }
    }

    // Status lines go to stdout regardless of the log configuration
    let mut status_rx = scheduler.subscribe();
    let status_task = tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(line) => println!("{}", line),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested");
        trigger.trigger();
    });

    let result = scheduler.run(shutdown).await;
    status_task.abort();
    match result {
        Ok(()) => {
            info!("Solarcharge shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Control loop failed: {}", e);
            Err(anyhow::anyhow!("Control loop error: {}", e))
        }
    }
}
