//! Background worker that drains due scheduled notifications.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::SchedulerConfig;

use super::{ReminderScheduler, SweepBackoff};

/// Periodic sweep task around [`ReminderScheduler::process_due`].
///
/// Runs until the shutdown channel fires. Sweep errors back off
/// exponentially instead of hammering a broken store.
pub struct ReminderWorker {
    config: SchedulerConfig,
    scheduler: Arc<ReminderScheduler>,
    shutdown: broadcast::Receiver<()>,
}

impl ReminderWorker {
    pub fn new(
        config: SchedulerConfig,
        scheduler: Arc<ReminderScheduler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            scheduler,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup does not
        // race the rest of the boot sequence
        ticker.tick().await;

        let mut backoff = SweepBackoff::new();

        tracing::info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            batch_size = self.config.batch_size,
            "Reminder worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Reminder worker received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.scheduler.process_due(Utc::now()).await {
                        Ok(report) => {
                            backoff.reset();
                            if report.total() > 0 {
                                tracing::info!(
                                    sent = report.sent,
                                    cancelled = report.cancelled,
                                    retried = report.retried,
                                    failed = report.failed,
                                    "Scheduled notification sweep finished"
                                );
                            }
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            tracing::warn!(
                                error = %e,
                                consecutive_failures = backoff.failures(),
                                backoff_ms = delay.as_millis() as u64,
                                "Scheduled notification sweep failed, backing off"
                            );
                            tokio::select! {
                                _ = self.shutdown.recv() => {
                                    tracing::info!("Reminder worker received shutdown signal");
                                    break;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }

        tracing::info!("Reminder worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdentityConfig, TransportConfig};
    use crate::dispatch::Dispatcher;
    use crate::store::{
        ChannelSettings, CustomerRecord, MemoryStore, NotificationStore, OrderDetails, OrderStatus,
        PaymentStatus, ScheduleStatus, ScheduledNotification,
    };
    use crate::template::MessageTemplate;
    use crate::transport::DryRunTransport;
    use crate::trigger::{Channel, Trigger};

    fn worker_over(store: Arc<MemoryStore>, poll_interval_seconds: u64) -> (ReminderWorker, broadcast::Sender<()>) {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(DryRunTransport),
            IdentityConfig::default(),
            &TransportConfig::default(),
        ));
        let scheduler = Arc::new(ReminderScheduler::new(store, dispatcher, 50));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let config = SchedulerConfig {
            poll_interval_seconds,
            batch_size: 50,
        };
        (
            ReminderWorker::new(config, scheduler, shutdown_rx),
            shutdown_tx,
        )
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (worker, shutdown_tx) = worker_over(store, 3600);

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_processes_due_rows() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings::default());
        store.upsert_template(MessageTemplate::new(
            Trigger::PaymentReminder1,
            Channel::Sms,
            "Rappel paiement",
            "Votre commande {order_number} attend son règlement.",
        ));
        store.seed_order(OrderDetails {
            id: "ord-1".to_string(),
            number: "CMD-001".to_string(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total: 12000,
            created_at: Utc::now(),
            customer: Some(CustomerRecord {
                id: "cust-1".to_string(),
                name: "Awa Ndiaye".to_string(),
                phone: Some("+221770000001".to_string()),
                whatsapp: None,
                email: None,
                city: None,
                country: None,
                created_at: Utc::now(),
            }),
            lines: Vec::new(),
            shipping_address: None,
            tracking_number: None,
            invoice_number: None,
            invoice_url: None,
        });

        let row = ScheduledNotification::new(
            Trigger::PaymentReminder1,
            "ord-1",
            Utc::now() - chrono::Duration::minutes(5),
        );
        let row_id = row.id;
        store.insert_scheduled(row).await.unwrap();

        let (worker, shutdown_tx) = worker_over(store.clone(), 1);
        let handle = tokio::spawn(worker.run());

        // First sweep lands after the skipped immediate tick, about 1s in
        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop after shutdown")
            .unwrap();

        let row = store.scheduled_by_id(row_id).unwrap();
        assert_eq!(row.status, ScheduleStatus::Sent);
        assert_eq!(row.attempts, 1);
        assert!(!store.log_entries().is_empty());
    }
}
