//! Business event entry points.
//!
//! One thin wrapper per domain event, called in-process by the
//! surrounding application. Each wrapper picks the trigger(s), builds
//! the minimal context, and hands off to the dispatcher, in dual mode
//! for everything except password resets.
//!
//! Delivery is best-effort relative to the business operation: a failed
//! or unconfigured notification is logged and swallowed, never bubbled
//! up to abort an order creation or a payment confirmation.

use std::sync::Arc;

use chrono::Utc;

use crate::context::NotificationContext;
use crate::dispatch::{DeliveryMode, Dispatcher};
use crate::resolver::format_cfa;
use crate::scheduler::ReminderScheduler;
use crate::store::PaymentStatus;
use crate::trigger::Trigger;

/// Facade the rest of the application calls when something happened.
pub struct EventNotifier {
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<ReminderScheduler>,
}

impl EventNotifier {
    pub fn new(dispatcher: Arc<Dispatcher>, scheduler: Arc<ReminderScheduler>) -> Self {
        Self {
            dispatcher,
            scheduler,
        }
    }

    /// An order was created. Notifies the customer and the admins, and
    /// lines up the payment-reminder sequence while payment is open.
    pub async fn order_placed(&self, order_id: &str, payment_status: PaymentStatus) {
        let context = NotificationContext::order(order_id);
        self.notify(Trigger::OrderPlaced, &context).await;
        self.notify(Trigger::NewOrderAdmin, &context).await;

        if payment_status != PaymentStatus::Completed {
            if let Err(e) = self
                .scheduler
                .schedule_payment_reminders(order_id, Utc::now())
                .await
            {
                tracing::warn!(order_id = %order_id, error = %e, "Failed to schedule payment reminders");
            }
        }
    }

    /// Payment confirmed. The pending payment reminders are obsolete
    /// from this moment and get cancelled.
    pub async fn payment_received(&self, order_id: &str) {
        let context = NotificationContext::order(order_id);
        self.notify(Trigger::PaymentReceived, &context).await;
        self.notify(Trigger::PaymentReceivedAdmin, &context).await;

        if let Err(e) = self
            .scheduler
            .cancel_pending(order_id, Some(&Trigger::PAYMENT_REMINDERS))
            .await
        {
            tracing::warn!(order_id = %order_id, error = %e, "Failed to cancel payment reminders");
        }
    }

    pub async fn payment_failed(&self, order_id: &str) {
        self.notify(Trigger::PaymentFailed, &NotificationContext::order(order_id))
            .await;
    }

    pub async fn order_shipped(&self, order_id: &str) {
        self.notify(Trigger::OrderShipped, &NotificationContext::order(order_id))
            .await;
    }

    /// Delivery confirmed. Asks for a review after the configured delay.
    pub async fn order_delivered(&self, order_id: &str) {
        self.notify(
            Trigger::OrderDelivered,
            &NotificationContext::order(order_id),
        )
        .await;

        if let Err(e) = self
            .scheduler
            .schedule_review_request(order_id, Utc::now())
            .await
        {
            tracing::warn!(order_id = %order_id, error = %e, "Failed to schedule review request");
        }
    }

    /// Order cancelled outright. Every pending scheduled notification
    /// for it is withdrawn.
    pub async fn order_cancelled(&self, order_id: &str) {
        let context = NotificationContext::order(order_id);
        self.notify(Trigger::OrderCancelled, &context).await;
        self.notify(Trigger::OrderCancelledAdmin, &context).await;

        if let Err(e) = self.scheduler.cancel_pending(order_id, None).await {
            tracing::warn!(order_id = %order_id, error = %e, "Failed to cancel scheduled notifications");
        }
    }

    pub async fn order_refunded(&self, order_id: &str) {
        self.notify(
            Trigger::OrderRefunded,
            &NotificationContext::order(order_id),
        )
        .await;
    }

    /// An admin left a note on the order for the customer.
    pub async fn customer_note_added(&self, order_id: &str, note: &str) {
        let context = NotificationContext::order(order_id).with_value("note", note);
        self.notify(Trigger::CustomerNote, &context).await;
    }

    /// An invoice was issued. The context is caller-built because
    /// back-office invoices may have no backing order at all, with
    /// every variable supplied as an override.
    pub async fn invoice_created(&self, context: NotificationContext) {
        self.notify(Trigger::InvoiceCreated, &context).await;
    }

    /// A customer account was registered.
    pub async fn account_created(&self, customer_id: &str) {
        let context = NotificationContext::customer(customer_id);
        self.notify(Trigger::NewAccount, &context).await;
        self.notify(Trigger::NewCustomerAdmin, &context).await;
    }

    /// A password reset was requested. Goes out in failover mode: an
    /// OTP must reach exactly one channel, never fan out.
    pub async fn password_reset_requested(&self, phone: &str, reset_code: &str) {
        let context = NotificationContext::raw()
            .with_recipient_phone(phone)
            .with_value("reset_code", reset_code);
        let result = self
            .dispatcher
            .send(
                Trigger::PasswordReset,
                Trigger::PasswordReset.recipient(),
                &context,
                DeliveryMode::Failover,
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(trigger = %Trigger::PasswordReset, error = %e, "Notification dispatch failed");
        }
    }

    pub async fn loyalty_points_earned(
        &self,
        phone: &str,
        customer_name: &str,
        points_earned: i64,
        points_total: i64,
    ) {
        let context = NotificationContext::raw()
            .with_recipient_phone(phone)
            .with_customer_name(customer_name)
            .with_value("points_earned", points_earned)
            .with_value("points_total", points_total);
        self.notify(Trigger::LoyaltyPointsEarned, &context).await;
    }

    pub async fn cart_abandoned(
        &self,
        phone: &str,
        customer_name: &str,
        cart_items_count: i64,
        cart_total: i64,
    ) {
        let context = NotificationContext::raw()
            .with_recipient_phone(phone)
            .with_customer_name(customer_name)
            .with_value("cart_items_count", cart_items_count)
            .with_value("cart_total", format_cfa(cart_total));
        self.notify(Trigger::AbandonedCart, &context).await;
    }

    /// A watched product came back in stock. The destination is the
    /// customer who asked to be told, not derivable from the product.
    pub async fn product_back_in_stock(&self, product_id: &str, phone: &str) {
        let context = NotificationContext::product(product_id).with_recipient_phone(phone);
        self.notify(Trigger::BackInStock, &context).await;
    }

    pub async fn product_low_stock(&self, product_id: &str) {
        self.notify(
            Trigger::LowStockAdmin,
            &NotificationContext::product(product_id),
        )
        .await;
    }

    pub async fn product_out_of_stock(&self, product_id: &str) {
        self.notify(
            Trigger::OutOfStockAdmin,
            &NotificationContext::product(product_id),
        )
        .await;
    }

    pub async fn review_submitted(&self, review_id: &str) {
        self.notify(
            Trigger::NewReviewAdmin,
            &NotificationContext::review(review_id),
        )
        .await;
    }

    /// Daily aggregate report for the admins. The caller supplies the
    /// day's totals; the low-stock count is computed at resolve time.
    pub async fn daily_report(
        &self,
        orders_count: i64,
        revenue_total: i64,
        new_customers_count: i64,
    ) {
        let context = NotificationContext::raw()
            .with_value("orders_count", orders_count)
            .with_value("revenue_total", format_cfa(revenue_total))
            .with_value("new_customers_count", new_customers_count);
        self.notify(Trigger::DailyReportAdmin, &context).await;
    }

    async fn notify(&self, trigger: Trigger, context: &NotificationContext) {
        let result = self
            .dispatcher
            .send(trigger, trigger.recipient(), context, DeliveryMode::Dual)
            .await;
        match result {
            Ok(outcome) if !outcome.success => {
                tracing::warn!(
                    trigger = %trigger,
                    error = ?outcome.error,
                    "Notification delivered on no channel"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(trigger = %trigger, error = %e, "Notification dispatch failed");
            }
        }
    }
}
