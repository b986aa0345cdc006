//! Scheduled notifications: payment reminders and review requests.
//!
//! Rows are inserted when the triggering business event happens and
//! drained later by [`ReminderWorker`]. Between those two moments the
//! world moves on, so processing re-validates every row against the
//! current order state and claims it atomically before sending. A row
//! leaves `pending` exactly once no matter how many workers sweep
//! concurrently.

mod backoff;
mod worker;

pub use backoff::SweepBackoff;
pub use worker::ReminderWorker;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::context::NotificationContext;
use crate::dispatch::{DeliveryMode, Dispatcher};
use crate::metrics::{SCHEDULED_CREATED_TOTAL, SCHEDULED_PROCESSED_TOTAL, SCHEDULER_SWEEP_DURATION};
use crate::store::{NotificationStore, ScheduledNotification, StoreResult};
use crate::trigger::Trigger;

/// Claims per scheduled row before it is marked permanently failed.
pub const MAX_ATTEMPTS: u32 = 3;

/// Outcome counts of one `process_due` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Rows dispatched (claim held, dispatch returned)
    pub sent: usize,
    /// Rows cancelled by the stale guard
    pub cancelled: usize,
    /// Rows released back to pending for another try
    pub retried: usize,
    /// Rows marked permanently failed
    pub failed: usize,
}

impl ProcessReport {
    pub fn total(&self) -> usize {
        self.sent + self.cancelled + self.retried + self.failed
    }
}

/// Schedules and processes time-delayed notifications.
pub struct ReminderScheduler {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<Dispatcher>,
    batch_size: usize,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        dispatcher: Arc<Dispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            batch_size,
        }
    }

    /// Insert the payment-reminder sequence for an unpaid order.
    ///
    /// One pending row per enabled reminder rule, offset by that rule's
    /// delay. Nothing is inserted when follow-ups are globally off or
    /// settings were never saved.
    #[tracing::instrument(name = "scheduler.schedule_payment_reminders", skip(self))]
    pub async fn schedule_payment_reminders(
        &self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let Some(settings) = self.store.channel_settings().await? else {
            tracing::warn!("Settings missing, no payment reminders scheduled");
            return Ok(0);
        };
        if !settings.follow_up_enabled {
            tracing::debug!(order_id = %order_id, "Follow-ups disabled, skipping reminders");
            return Ok(0);
        }

        let mut created = 0;
        for (rule, trigger) in settings
            .payment_reminders
            .iter()
            .zip(Trigger::PAYMENT_REMINDERS)
        {
            if !rule.enabled {
                continue;
            }
            let due_at = now + Duration::hours(rule.delay_hours as i64);
            self.store
                .insert_scheduled(ScheduledNotification::new(trigger, order_id, due_at))
                .await?;
            SCHEDULED_CREATED_TOTAL.inc();
            created += 1;
        }

        tracing::info!(order_id = %order_id, created, "Payment reminders scheduled");
        Ok(created)
    }

    /// Insert the review request that follows a delivery.
    #[tracing::instrument(name = "scheduler.schedule_review_request", skip(self))]
    pub async fn schedule_review_request(
        &self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let Some(settings) = self.store.channel_settings().await? else {
            tracing::warn!("Settings missing, no review request scheduled");
            return Ok(());
        };

        let due_at = now + Duration::hours(settings.review_request_delay_hours as i64);
        self.store
            .insert_scheduled(ScheduledNotification::new(
                Trigger::ReviewRequest,
                order_id,
                due_at,
            ))
            .await?;
        SCHEDULED_CREATED_TOTAL.inc();

        tracing::info!(order_id = %order_id, due_at = %due_at, "Review request scheduled");
        Ok(())
    }

    /// Cancel every pending row for an order, optionally restricted to
    /// the given triggers. Idempotent: already-cancelled rows are left
    /// alone.
    pub async fn cancel_pending(
        &self,
        order_id: &str,
        triggers: Option<&[Trigger]>,
    ) -> StoreResult<usize> {
        let cancelled = self.store.cancel_pending(order_id, triggers).await?;
        if cancelled > 0 {
            tracing::info!(order_id = %order_id, cancelled, "Cancelled pending scheduled notifications");
        }
        Ok(cancelled)
    }

    /// One sweep over the due pending rows.
    ///
    /// Per row: stale rows are cancelled without a send; live rows are
    /// claimed atomically (a lost claim means another worker owns the
    /// row) and dispatched in dual mode. A dispatch error releases the
    /// claim, back to pending while attempts remain and permanently
    /// failed after [`MAX_ATTEMPTS`].
    #[tracing::instrument(name = "scheduler.process_due", skip(self), fields(now = %now))]
    pub async fn process_due(&self, now: DateTime<Utc>) -> StoreResult<ProcessReport> {
        let sweep_timer = SCHEDULER_SWEEP_DURATION.start_timer();
        let due_rows = self.store.due_scheduled(now, self.batch_size).await?;
        let mut report = ProcessReport::default();

        for due in due_rows {
            let row = &due.notification;

            if due.is_stale() {
                if self.store.cancel_if_pending(row.id, now).await? {
                    SCHEDULED_PROCESSED_TOTAL
                        .with_label_values(&["cancelled"])
                        .inc();
                    report.cancelled += 1;
                    tracing::info!(
                        id = %row.id,
                        order_id = %row.order_id,
                        trigger = %row.trigger,
                        "Cancelled stale scheduled notification"
                    );
                }
                continue;
            }

            if !self.store.claim_due(row.id, now).await? {
                tracing::debug!(id = %row.id, "Claim lost, row owned by another worker");
                continue;
            }

            let context = NotificationContext::order(row.order_id.clone());
            match self
                .dispatcher
                .send(
                    row.trigger,
                    row.trigger.recipient(),
                    &context,
                    DeliveryMode::Dual,
                )
                .await
            {
                Ok(outcome) => {
                    SCHEDULED_PROCESSED_TOTAL.with_label_values(&["sent"]).inc();
                    report.sent += 1;
                    if !outcome.success {
                        // The attempt is spent; per-channel failures are
                        // already in the notification log
                        tracing::warn!(
                            id = %row.id,
                            order_id = %row.order_id,
                            error = ?outcome.error,
                            "Scheduled dispatch completed without a delivery"
                        );
                    }
                }
                Err(e) => {
                    let permanent = row.attempts + 1 >= MAX_ATTEMPTS;
                    self.store
                        .release_claim(row.id, &e.to_string(), permanent)
                        .await?;
                    if permanent {
                        SCHEDULED_PROCESSED_TOTAL
                            .with_label_values(&["failed"])
                            .inc();
                        report.failed += 1;
                        tracing::error!(
                            id = %row.id,
                            order_id = %row.order_id,
                            error = %e,
                            "Scheduled notification permanently failed"
                        );
                    } else {
                        SCHEDULED_PROCESSED_TOTAL
                            .with_label_values(&["retried"])
                            .inc();
                        report.retried += 1;
                        tracing::warn!(
                            id = %row.id,
                            order_id = %row.order_id,
                            attempts = row.attempts + 1,
                            error = %e,
                            "Scheduled dispatch failed, will retry"
                        );
                    }
                }
            }
        }

        sweep_timer.observe_duration();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdentityConfig, TransportConfig};
    use crate::store::{
        ChannelSettings, CustomerRecord, MemoryStore, OrderDetails, OrderStatus, PaymentStatus,
        ScheduleStatus,
    };
    use crate::template::MessageTemplate;
    use crate::transport::{
        ChannelTransport, DryRunTransport, ProviderReceipt, TransportError,
    };
    use crate::trigger::Channel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that counts calls, optionally failing them all.
    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingTransport {
        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn outcome(&self) -> Result<ProviderReceipt, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TransportError::Provider("gateway down".to_string()))
            } else {
                Ok(ProviderReceipt {
                    message_id: Some("mid-1".to_string()),
                })
            }
        }
    }

    #[async_trait]
    impl ChannelTransport for CountingTransport {
        async fn send_sms(
            &self,
            _to: &str,
            _message: &str,
        ) -> Result<ProviderReceipt, TransportError> {
            self.outcome()
        }

        async fn send_whatsapp(
            &self,
            _to: &str,
            _message: &str,
            _media_url: Option<&str>,
        ) -> Result<ProviderReceipt, TransportError> {
            self.outcome()
        }

        async fn send_whatsapp_cloud_otp(
            &self,
            _to: &str,
            _code: &str,
            _language: &str,
        ) -> Result<ProviderReceipt, TransportError> {
            self.outcome()
        }
    }

    fn unpaid_order(id: &str) -> OrderDetails {
        OrderDetails {
            id: id.to_string(),
            number: format!("CMD-{id}"),
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
        }
    }

    fn reminder_templates(store: &MemoryStore) {
        for trigger in Trigger::PAYMENT_REMINDERS {
            for channel in [Channel::Sms, Channel::WhatsApp] {
                store.upsert_template(MessageTemplate::new(
                    trigger,
                    channel,
                    format!("{trigger} {channel}"),
                    "Rappel: commande {order_number}, {order_total} à régler.",
                ));
            }
        }
    }

    fn scheduler_over(
        store: Arc<MemoryStore>,
        transport: Arc<dyn ChannelTransport>,
    ) -> ReminderScheduler {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            transport,
            IdentityConfig::default(),
            &TransportConfig::default(),
        ));
        ReminderScheduler::new(store, dispatcher, 50)
    }

    #[tokio::test]
    async fn test_schedule_payment_reminders_respects_rules() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = ChannelSettings::default();
        settings.payment_reminders[1].enabled = false;
        store.set_settings(settings);

        let scheduler = scheduler_over(store.clone(), Arc::new(DryRunTransport));
        let now = Utc::now();
        let created = scheduler
            .schedule_payment_reminders("ord-1", now)
            .await
            .unwrap();

        assert_eq!(created, 2);
        let rows = store.scheduled_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trigger, Trigger::PaymentReminder1);
        assert_eq!(rows[0].scheduled_for, now + Duration::hours(24));
        assert_eq!(rows[1].trigger, Trigger::PaymentReminder3);
        assert_eq!(rows[1].scheduled_for, now + Duration::hours(120));
    }

    #[tokio::test]
    async fn test_schedule_payment_reminders_honors_global_gate() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings {
            follow_up_enabled: false,
            ..Default::default()
        });

        let scheduler = scheduler_over(store.clone(), Arc::new(DryRunTransport));
        let created = scheduler
            .schedule_payment_reminders("ord-1", Utc::now())
            .await
            .unwrap();

        assert_eq!(created, 0);
        assert!(store.scheduled_rows().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_review_request_uses_configured_delay() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings {
            review_request_delay_hours: 48,
            ..Default::default()
        });

        let scheduler = scheduler_over(store.clone(), Arc::new(DryRunTransport));
        let now = Utc::now();
        scheduler.schedule_review_request("ord-1", now).await.unwrap();

        let rows = store.scheduled_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trigger, Trigger::ReviewRequest);
        assert_eq!(rows[0].scheduled_for, now + Duration::hours(48));
    }

    #[tokio::test]
    async fn test_cancelled_rows_never_send() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings::default());
        reminder_templates(&store);
        store.seed_order(unpaid_order("ord-1"));

        let transport = Arc::new(CountingTransport::default());
        let scheduler = scheduler_over(store.clone(), transport.clone());

        let now = Utc::now();
        scheduler
            .schedule_payment_reminders("ord-1", now)
            .await
            .unwrap();
        let cancelled = scheduler.cancel_pending("ord-1", None).await.unwrap();
        assert_eq!(cancelled, 3);

        // A second cancellation finds nothing left to do
        assert_eq!(scheduler.cancel_pending("ord-1", None).await.unwrap(), 0);

        // Ten days later nothing fires for that order
        let report = scheduler
            .process_due(now + Duration::days(10))
            .await
            .unwrap();
        assert_eq!(report, ProcessReport::default());
        assert_eq!(transport.calls(), 0);
        for row in store.scheduled_rows() {
            assert_eq!(row.status, ScheduleStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_stale_guard_cancels_paid_orders() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings::default());
        reminder_templates(&store);

        let mut order = unpaid_order("ord-1");
        store.seed_order(order.clone());

        let transport = Arc::new(CountingTransport::default());
        let scheduler = scheduler_over(store.clone(), transport.clone());

        let now = Utc::now();
        scheduler
            .schedule_payment_reminders("ord-1", now)
            .await
            .unwrap();

        // Payment lands after scheduling, without an explicit cancel
        order.payment_status = PaymentStatus::Completed;
        store.seed_order(order);

        let report = scheduler
            .process_due(now + Duration::days(10))
            .await
            .unwrap();
        assert_eq!(report.cancelled, 3);
        assert_eq!(report.sent, 0);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_due_reminder_dispatches_in_dual_mode() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings::default());
        reminder_templates(&store);
        store.seed_order(unpaid_order("ord-1"));

        let transport = Arc::new(CountingTransport::default());
        let scheduler = scheduler_over(store.clone(), transport.clone());

        let now = Utc::now();
        scheduler
            .schedule_payment_reminders("ord-1", now)
            .await
            .unwrap();

        // Only the first reminder is due after 25 hours
        let report = scheduler
            .process_due(now + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        // Both channels attempted for the one due row
        assert_eq!(transport.calls(), 2);

        let rows = store.scheduled_rows();
        assert_eq!(rows[0].status, ScheduleStatus::Sent);
        assert_eq!(rows[0].attempts, 1);
        assert_eq!(rows[1].status, ScheduleStatus::Pending);
        assert_eq!(rows[2].status, ScheduleStatus::Pending);
    }

    #[tokio::test]
    async fn test_dispatch_error_retries_then_fails_permanently() {
        let store = Arc::new(MemoryStore::new());
        // No settings saved: every dispatch errors with Configuration
        store.seed_order(unpaid_order("ord-1"));
        store
            .insert_scheduled(ScheduledNotification::new(
                Trigger::PaymentReminder1,
                "ord-1",
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();

        let transport = Arc::new(CountingTransport::default());
        let scheduler = scheduler_over(store.clone(), transport.clone());
        let now = Utc::now();

        let report = scheduler.process_due(now).await.unwrap();
        assert_eq!(report.retried, 1);
        let rows = store.scheduled_rows();
        assert_eq!(rows[0].status, ScheduleStatus::Pending);
        assert_eq!(rows[0].attempts, 1);
        assert!(rows[0].last_error.is_some());

        let report = scheduler.process_due(now).await.unwrap();
        assert_eq!(report.retried, 1);

        // The third claim is the last one allowed
        let report = scheduler.process_due(now).await.unwrap();
        assert_eq!(report.failed, 1);
        let rows = store.scheduled_rows();
        assert_eq!(rows[0].status, ScheduleStatus::Failed);
        assert_eq!(rows[0].attempts, MAX_ATTEMPTS);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_spends_the_row() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings::default());
        reminder_templates(&store);
        store.seed_order(unpaid_order("ord-1"));
        store
            .insert_scheduled(ScheduledNotification::new(
                Trigger::PaymentReminder1,
                "ord-1",
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();

        let transport = Arc::new(CountingTransport::failing());
        let scheduler = scheduler_over(store.clone(), transport.clone());

        // Dispatch returns Ok with success=false; the row stays sent
        // rather than being retried, the failures live in the log
        let report = scheduler.process_due(Utc::now()).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(store.scheduled_rows()[0].status, ScheduleStatus::Sent);
        assert!(transport.calls() > 0);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_deliver_at_most_once() {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(ChannelSettings::default());
        reminder_templates(&store);
        store.seed_order(unpaid_order("ord-1"));
        store
            .insert_scheduled(ScheduledNotification::new(
                Trigger::PaymentReminder1,
                "ord-1",
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();

        let transport = Arc::new(CountingTransport::default());
        let scheduler = Arc::new(scheduler_over(store.clone(), transport.clone()));
        let now = Utc::now();

        let (left, right) = tokio::join!(scheduler.process_due(now), scheduler.process_due(now));
        let sent = left.unwrap().sent + right.unwrap().sent;

        assert_eq!(sent, 1);
        // One row, two channels, exactly one sweep took it
        assert_eq!(transport.calls(), 2);
        assert_eq!(store.scheduled_rows()[0].status, ScheduleStatus::Sent);
        assert_eq!(store.scheduled_rows()[0].attempts, 1);
    }
}
