//! pingwatch - host and service availability monitor
//!
//! Polls every target on its own schedule over TCP, counts consecutive
//! failures, alerts when a target crosses its threshold, and keeps a
//! bounded log of failures.

mod config;
mod db;
mod probe;
mod registry;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use probe::NetworkProber;
use registry::Registry;
use scheduler::{log_alert, log_status, FailureLog, Scheduler};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pingwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let failure_log = Arc::new(FailureLog::new(store.clone(), cfg.failure_log_capacity));

    // Create scheduler and log its events
    let scheduler = Arc::new(
        Scheduler::new(Arc::new(NetworkProber), failure_log.clone())
            .with_probe_timeout(cfg.probe_timeout()),
    );
    scheduler.on_status_update(|status| log_status(&status));
    scheduler.on_alert(|alert| log_alert(&alert));

    // Load targets; this starts their schedules
    let registry = Arc::new(Registry::load(store, scheduler.clone()).await?);

    // Serve the API until interrupted
    let server = Server::new(cfg, registry, scheduler.clone(), failure_log);
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, shutting down");
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
