use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;

use atelier_notification_service::config::Settings;
use atelier_notification_service::dispatch::Dispatcher;
use atelier_notification_service::scheduler::{ReminderScheduler, ReminderWorker};
use atelier_notification_service::store::create_store;
use atelier_notification_service::telemetry::init_telemetry;
use atelier_notification_service::transport::create_transport;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    // Keep the guard alive until exit
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(
        store = %settings.store.backend,
        transport = %settings.transport.mode,
        "Configuration loaded"
    );

    // Wire the engine: store, transport, dispatcher, scheduler
    let store = create_store(&settings.store).await?;
    let transport = create_transport(&settings.transport)?;
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        transport,
        settings.identity.clone(),
        &settings.transport,
    ));
    let scheduler = Arc::new(ReminderScheduler::new(
        store,
        dispatcher,
        settings.scheduler.batch_size,
    ));

    // Start the reminder worker in background
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = ReminderWorker::new(settings.scheduler.clone(), scheduler, shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());

    tracing::info!("Notification service started");

    // Run until a shutdown signal arrives
    wait_for_shutdown_signal().await;
    let _ = shutdown_tx.send(());

    tracing::info!("Waiting for the reminder worker to finish its sweep");
    let _ = worker_handle.await;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, shutting down");
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }
}
