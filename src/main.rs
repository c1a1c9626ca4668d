//! pfSense Docker alias daemon entry point.
//!
//! Watches Docker for container start/stop events and keeps pfSense DNS
//! resolver host override aliases in line with the containers' labels.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

mod config;
mod dns;
mod error;
mod reconciler;
mod runtime;
mod types;

use config::Config;
use dns::PfSense;
use reconciler::Reconciler;
use runtime::{ContainerRuntime, DockerRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load()?;
    info!("pfsense-docker-alias started with config: {:?}", cfg);

    let dns = PfSense::new(&cfg)?;
    let docker = DockerRuntime::connect()?;

    // Events from this point on are replayed once the startup sync is done.
    let since = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    let (event_tx, event_rx) = mpsc::channel(128);

    // Container Runtime (Docker)
    let monitor = docker.clone();
    let monitor_handle = tokio::spawn(async move {
        if let Err(e) = monitor.monitor(since, event_tx).await {
            error!("Container runtime failed: {}", e);
        }
    });

    // Reconciler
    let add_on_startup = cfg.add_aliases_on_startup;
    let reconciler = Reconciler::new(dns, docker);
    let reconciler_handle = tokio::spawn(async move {
        if add_on_startup {
            if let Err(e) = reconciler.startup_sync().await {
                error!("Startup sync failed: {}", e);
            }
        }
        reconciler.run(event_rx).await;
    });

    // Graceful Shutdown: in-flight API calls run to completion
    let mut terminate = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => match res {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        },
        _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
    }

    if shutdown(monitor_handle, reconciler_handle, cfg.timeout() * 2).await {
        info!("Shutdown complete.");
    }
    Ok(())
}

/// Stop the event monitor, which closes the event channel, then give the
/// reconciler up to `grace` to finish the events already queued.
///
/// Returns `false` if the reconciler failed or was still busy.
async fn shutdown(monitor: JoinHandle<()>, reconciler: JoinHandle<()>, grace: Duration) -> bool {
    monitor.abort();
    let _ = monitor.await;

    match timeout(grace, reconciler).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Reconciler task failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Reconciler still busy after {}s, exiting anyway", grace.as_secs());
            false
        }
    }
}
