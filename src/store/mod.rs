//! Persistent storage boundary for the notification engine.
//!
//! This module defines the abstraction layer the engine reads and writes
//! through, allowing different storage implementations (memory, PostgreSQL)
//! to be used interchangeably:
//! - channel settings (singleton, admin-mutated, re-read on every send)
//! - message templates by (trigger, channel)
//! - the append-only notification log
//! - read-only projections of orders, products, customers and reviews
//! - scheduled notifications with conditional status transitions
//!
//! The conditional transitions (`claim_due`, `cancel_if_pending`,
//! `release_claim`) are the concurrency primitives of the scheduler: a row
//! moves out of `pending` exactly once no matter how many workers race.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pg_pool, PostgresStore};

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::template::MessageTemplate;
use crate::trigger::{Channel, Trigger};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be interpreted
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    /// A conditional status transition was applied to a row in the wrong state
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Order lifecycle states as the surrounding application records them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(StoreError::Corrupt(format!("order status: {other}"))),
        }
    }
}

/// Payment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(StoreError::Corrupt(format!("payment status: {other}"))),
        }
    }
}

/// Customer account projection, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    /// WhatsApp number when it differs from the main phone
    pub whatsapp: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CustomerRecord {
    /// Number to deliver to: WhatsApp number first, then the main phone.
    pub fn preferred_phone(&self) -> Option<&str> {
        self.whatsapp
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(self.phone.as_deref().filter(|p| !p.is_empty()))
    }
}

/// One line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_name: String,
    pub quantity: u32,
}

/// Order projection with everything variable resolution derives from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub id: String,

    /// Human-facing order number (e.g. CMD-2081)
    pub number: String,

    pub status: OrderStatus,

    pub payment_status: PaymentStatus,

    /// Total in whole CFA francs
    pub total: i64,

    pub created_at: DateTime<Utc>,

    pub customer: Option<CustomerRecord>,

    pub lines: Vec<OrderLine>,

    /// Formatted shipping address
    pub shipping_address: Option<String>,

    pub tracking_number: Option<String>,

    pub invoice_number: Option<String>,

    pub invoice_url: Option<String>,
}

/// Product projection used by stock notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    /// Price in whole CFA francs
    pub price: i64,
    pub stock: i32,
    pub low_stock_threshold: i32,
}

/// Product review projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: String,
    pub rating: i16,
    pub comment: Option<String>,
    pub verified_purchase: bool,
    pub customer: Option<CustomerRecord>,
    pub product: Option<ProductRecord>,
}

/// One payment-reminder slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRule {
    pub enabled: bool,
    /// Hours after order placement
    pub delay_hours: u32,
}

/// Admin-controlled notification settings.
///
/// Singleton record. The dispatcher loads it fresh for every send so that
/// back-office changes apply immediately; nothing in the engine caches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub sms_enabled: bool,
    pub whatsapp_enabled: bool,
    /// Present for forward compatibility, no transport behind it
    pub email_enabled: bool,

    /// Admin destinations, first non-empty number wins
    #[serde(default)]
    pub admin_phones: Vec<String>,
    #[serde(default)]
    pub admin_whatsapp: Option<String>,

    /// When set, failover walks `failover_order` instead of the default
    pub failover_enabled: bool,
    #[serde(default)]
    pub failover_order: Vec<Channel>,

    /// Rehearsal mode: every message goes to `test_phone` instead
    pub test_mode: bool,
    #[serde(default)]
    pub test_phone: Option<String>,

    /// Global gate for the payment-reminder sequence
    pub follow_up_enabled: bool,
    pub payment_reminders: [ReminderRule; 3],

    /// Hours after delivery before the review request goes out
    pub review_request_delay_hours: u32,

    /// Branding image attached to WhatsApp sends when no invoice URL applies
    #[serde(default)]
    pub default_media_url: Option<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            sms_enabled: true,
            whatsapp_enabled: true,
            email_enabled: false,
            admin_phones: Vec::new(),
            admin_whatsapp: None,
            failover_enabled: false,
            failover_order: Vec::new(),
            test_mode: false,
            test_phone: None,
            follow_up_enabled: true,
            payment_reminders: [
                ReminderRule {
                    enabled: true,
                    delay_hours: 24,
                },
                ReminderRule {
                    enabled: true,
                    delay_hours: 72,
                },
                ReminderRule {
                    enabled: true,
                    delay_hours: 120,
                },
            ],
            review_request_delay_hours: 24,
            default_media_url: None,
        }
    }
}

impl ChannelSettings {
    /// Whether a channel is globally switched on.
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => self.sms_enabled,
            // Cloud API rides the WhatsApp switch
            Channel::WhatsApp | Channel::WhatsAppCloud => self.whatsapp_enabled,
            Channel::Email => self.email_enabled,
        }
    }

    /// Admin destination: first non-empty admin phone, then the admin
    /// WhatsApp number.
    pub fn admin_phone(&self) -> Option<&str> {
        self.admin_phones
            .iter()
            .map(String::as_str)
            .find(|p| !p.is_empty())
            .or(self.admin_whatsapp.as_deref().filter(|p| !p.is_empty()))
    }

    /// Channel priority for failover sends.
    pub fn failover_channels(&self) -> Vec<Channel> {
        if self.failover_enabled && !self.failover_order.is_empty() {
            self.failover_order.clone()
        } else {
            Channel::DEFAULT_FAILOVER_ORDER.to_vec()
        }
    }
}

/// Outcome recorded for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Pending,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Pending => "pending",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "pending" => Ok(DeliveryStatus::Pending),
            other => Err(StoreError::Corrupt(format!("delivery status: {other}"))),
        }
    }
}

/// One row of the append-only notification audit trail.
///
/// Every channel attempt writes exactly one row; rows are never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: Uuid,
    pub trigger: Trigger,
    pub channel: Channel,
    /// Destination phone number
    pub recipient: String,
    /// Rendered message body as handed to the transport
    pub content: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationLog {
    /// Row for a successful attempt.
    pub fn sent(
        trigger: Trigger,
        channel: Channel,
        recipient: impl Into<String>,
        content: impl Into<String>,
        provider_message_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            channel,
            recipient: recipient.into(),
            content: content.into(),
            status: DeliveryStatus::Sent,
            provider_message_id,
            error: None,
            order_id: None,
            customer_id: None,
            created_at: Utc::now(),
        }
    }

    /// Row for a failed attempt.
    pub fn failed(
        trigger: Trigger,
        channel: Channel,
        recipient: impl Into<String>,
        content: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            channel,
            recipient: recipient.into(),
            content: content.into(),
            status: DeliveryStatus::Failed,
            provider_message_id: None,
            error: Some(error.into()),
            order_id: None,
            customer_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }
}

/// Status of a scheduled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Cancelled => "cancelled",
            ScheduleStatus::Failed => "failed",
        }
    }
}

impl FromStr for ScheduleStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "sent" => Ok(ScheduleStatus::Sent),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            "failed" => Ok(ScheduleStatus::Failed),
            other => Err(StoreError::Corrupt(format!("schedule status: {other}"))),
        }
    }
}

/// A notification to be dispatched at a future time.
///
/// Rows keep their full history: cancellation and failure are status
/// transitions with timestamps, never deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: Uuid,
    pub trigger: Trigger,
    pub order_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduleStatus,
    /// Number of times a worker has claimed this row
    pub attempts: u32,
    /// 1..=3 for payment reminders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_seq: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl ScheduledNotification {
    /// New pending row. The reminder sequence is derived from the trigger.
    pub fn new(trigger: Trigger, order_id: impl Into<String>, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            order_id: order_id.into(),
            scheduled_for,
            status: ScheduleStatus::Pending,
            attempts: 0,
            reminder_seq: trigger.reminder_seq(),
            last_error: None,
            created_at: Utc::now(),
            processed_at: None,
            cancelled_at: None,
        }
    }
}

/// A due pending row joined with the current state of its order.
#[derive(Debug, Clone)]
pub struct DueScheduled {
    pub notification: ScheduledNotification,
    pub order_status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl DueScheduled {
    /// Whether the scheduled send no longer makes sense.
    ///
    /// An order that disappeared, was cancelled or refunded invalidates any
    /// pending notification; a completed payment additionally invalidates
    /// the payment reminders.
    pub fn is_stale(&self) -> bool {
        let Some(order_status) = self.order_status else {
            return true;
        };
        if matches!(order_status, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return true;
        }
        if self.notification.trigger.reminder_seq().is_some() {
            return matches!(
                self.payment_status,
                Some(PaymentStatus::Completed) | Some(PaymentStatus::Refunded)
            );
        }
        false
    }
}

/// Storage boundary of the notification engine.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the dispatcher and scheduler
/// share one instance across tasks.
///
/// # Error Handling
///
/// All fallible operations return `Result<T, StoreError>`. A `None` from a
/// point lookup is an expected miss, not an error.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Load the settings singleton. `None` means the back office has never
    /// saved settings, which callers treat as a configuration error.
    async fn channel_settings(&self) -> StoreResult<Option<ChannelSettings>>;

    /// Look up the template for one (trigger, channel) pair.
    async fn find_template(
        &self,
        trigger: Trigger,
        channel: Channel,
    ) -> StoreResult<Option<MessageTemplate>>;

    /// Append one delivery-attempt row to the audit trail.
    async fn append_log(&self, entry: NotificationLog) -> StoreResult<()>;

    /// Order projection with customer, lines and invoice joined in.
    async fn fetch_order(&self, id: &str) -> StoreResult<Option<OrderDetails>>;

    async fn fetch_product(&self, id: &str) -> StoreResult<Option<ProductRecord>>;

    async fn fetch_customer(&self, id: &str) -> StoreResult<Option<CustomerRecord>>;

    async fn fetch_review(&self, id: &str) -> StoreResult<Option<ReviewRecord>>;

    /// Total registered customers.
    async fn count_customers(&self) -> StoreResult<i64>;

    /// Products at or below their low-stock threshold.
    async fn count_low_stock_products(&self) -> StoreResult<i64>;

    /// Insert a new pending scheduled notification.
    async fn insert_scheduled(&self, notification: ScheduledNotification) -> StoreResult<()>;

    /// Cancel every pending row for an order, optionally restricted to the
    /// given triggers. Returns how many rows transitioned.
    async fn cancel_pending(
        &self,
        order_id: &str,
        triggers: Option<&[Trigger]>,
    ) -> StoreResult<usize>;

    /// Pending rows due at `now`, oldest first, joined with order state.
    async fn due_scheduled(&self, now: DateTime<Utc>, limit: usize)
        -> StoreResult<Vec<DueScheduled>>;

    /// Atomically claim a due row: `pending -> sent`, attempts incremented,
    /// processed_at stamped. Returns false if the row was no longer
    /// pending, meaning another worker owns it.
    async fn claim_due(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Undo a claim after a dispatch error: back to `pending` for another
    /// try, or `failed` when `permanent`. Records the error either way.
    async fn release_claim(&self, id: Uuid, error: &str, permanent: bool) -> StoreResult<()>;

    /// Conditionally cancel a row that is still pending. Returns whether
    /// this call performed the transition.
    async fn cancel_if_pending(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
}

/// Create the store backend selected by configuration.
///
/// `postgres` connects a pool and runs the schema migration; anything else
/// falls back to the in-memory store with a warning.
pub async fn create_store(config: &StoreConfig) -> StoreResult<Arc<dyn NotificationStore>> {
    match config.backend.as_str() {
        "postgres" => {
            let pool = create_pg_pool(config).await?;
            let store = PostgresStore::new(pool);
            store.migrate().await?;
            tracing::info!("Using PostgreSQL notification store");
            Ok(Arc::new(store))
        }
        "memory" => {
            tracing::info!("Using in-memory notification store");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown store backend, falling back to memory"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
