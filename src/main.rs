use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use roombook::config::Config;
use roombook::contacts::{CachedContacts, Directory};
use roombook::notify::{self, Outbox};
use roombook::reminder::ReminderScheduler;
use roombook::store::{run_compactor, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(Store::new(config.wal_path())?);
    let directory = match &config.directory_file {
        Some(path) => Directory::load_json(path)?,
        None => Directory::new(),
    };

    info!("roombook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}, bookings: {}", store.room_count(), store.booking_count());
    info!("  employees: {}", directory.len());
    info!(
        "  reminders: every {:?}, lookahead {:?}, max_in_flight {}",
        config.tick_interval, config.lookahead, config.max_in_flight
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let contacts = Arc::new(CachedContacts::new(directory, config.contact_ttl));
    let outbox = Arc::new(Outbox::new());
    let cancel = CancellationToken::new();

    let relay = tokio::spawn(notify::run_log_relay(outbox.subscribe(), cancel.clone()));
    let compactor = tokio::spawn(run_compactor(
        store.clone(),
        config.compact_threshold,
        config.compact_interval,
        cancel.clone(),
    ));
    let scheduler = Arc::new(ReminderScheduler::new(store.clone(), contacts, outbox, config.scheduler()));
    let handle = scheduler.start();

    shutdown_signal().await?;
    info!("shutdown signal received, stopping scheduler");

    handle.stop().await;
    cancel.cancel();
    if let Err(e) = compactor.await {
        tracing::error!("compactor task failed: {e}");
    }
    if let Err(e) = relay.await {
        tracing::error!("mail relay task failed: {e}");
    }

    info!("roombook stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
