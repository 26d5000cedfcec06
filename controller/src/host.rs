use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tokio::{net::TcpListener, sync::watch, task::JoinSet};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use thermocktat_common::{
    Config, HeatLossSimulator, RegulationLoop, Thermostat, ThermostatService,
};

use crate::{http, modbus, mqtt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "thermocktat", version, about = "Simulated thermostat with HTTP, MQTT and Modbus/TCP front ends")]
struct Cli {
    /// Config file (.yaml, .yml or .json). Missing files fall back to defaults.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

type TaskSet = JoinSet<(&'static str, anyhow::Result<()>)>;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::resolve(&cli.config, std::env::vars())
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    info!(device_id = %config.device_id, "starting thermocktat");

    let thermostat = Arc::new(build_thermostat(&config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = spawn_tasks(&config, thermostat, shutdown_rx).await?;

    tokio::select! {
        _ = shutdown_signal() => info!("shutdown signal received"),
        Some(joined) = tasks.join_next() => {
            log_task_exit(joined);
            warn!("a task exited early, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    drain(&mut tasks).await;
    info!("thermocktat stopped");
    Ok(())
}

fn build_thermostat(config: &Config) -> anyhow::Result<Thermostat> {
    let mut thermostat = Thermostat::new(config.snapshot(), config.regulator_params())
        .context("invalid thermostat config")?;

    if let Some(params) = config.heat_loss_params() {
        let simulator = HeatLossSimulator::new(params).context("invalid heat loss config")?;
        thermostat = thermostat.with_heat_loss(simulator);
    }
    Ok(thermostat)
}

/// Binds every enabled front end before spawning anything, so a bad address
/// fails startup instead of surfacing later as a task error.
async fn spawn_tasks(
    config: &Config,
    thermostat: Arc<Thermostat>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<TaskSet> {
    let regulation = RegulationLoop::new(Arc::clone(&thermostat), config.regulator.interval())
        .context("invalid regulator config")?;
    let service: Arc<dyn ThermostatService> = thermostat;
    let controllers = &config.controllers;

    let http_listener = if controllers.http.enabled {
        Some(bind(&controllers.http.addr, "http").await?)
    } else {
        None
    };
    let modbus_listener = if controllers.modbus.enabled {
        Some(bind(&controllers.modbus.addr, "modbus").await?)
    } else {
        None
    };

    let mut tasks = TaskSet::new();

    let rx = shutdown.clone();
    tasks.spawn(async move {
        regulation.run(rx).await;
        ("regulation", Ok(()))
    });

    if let Some(listener) = http_listener {
        let service = Arc::clone(&service);
        let device_id = config.device_id.clone();
        let rx = shutdown.clone();
        tasks.spawn(async move { ("http", http::serve(listener, service, &device_id, rx).await) });
    }

    if controllers.mqtt.enabled {
        let service = Arc::clone(&service);
        let mqtt_config = controllers.mqtt.clone();
        let rx = shutdown.clone();
        tasks.spawn(async move { ("mqtt", mqtt::run(service, mqtt_config, rx).await) });
    }

    if let Some(listener) = modbus_listener {
        let service = Arc::clone(&service);
        let unit_id = controllers.modbus.unit_id;
        let rx = shutdown.clone();
        tasks.spawn(async move { ("modbus", modbus::serve(listener, service, unit_id, rx).await) });
    }

    Ok(tasks)
}

async fn bind(addr: &str, name: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} controller at {addr}"))
}

async fn drain(tasks: &mut TaskSet) {
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(joined) = tasks.join_next().await {
            log_task_exit(joined);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} task(s) still running after {}s, aborting",
            tasks.len(),
            SHUTDOWN_GRACE.as_secs()
        );
        tasks.abort_all();
    }
}

fn log_task_exit(joined: Result<(&'static str, anyhow::Result<()>), tokio::task::JoinError>) {
    match joined {
        Ok((name, Ok(()))) => info!("{name} task finished"),
        Ok((name, Err(err))) => error!("{name} task failed: {err:#}"),
        Err(err) => error!("task panicked or was cancelled: {err}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
