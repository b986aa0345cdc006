//! In-memory notification store using DashMap.
//!
//! This module provides a memory-based implementation of the
//! `NotificationStore` trait. Data is lost on restart; it backs local
//! development and tests, with the same conditional-transition semantics
//! as the PostgreSQL backend.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::template::MessageTemplate;
use crate::trigger::{Channel, Trigger};

use super::{
    ChannelSettings, CustomerRecord, DueScheduled, NotificationLog, NotificationStore,
    OrderDetails, ProductRecord, ReviewRecord, ScheduleStatus, ScheduledNotification, StoreError,
    StoreResult,
};

/// In-memory notification store.
///
/// `DashMap` gives per-shard locking for concurrent access; scheduled-row
/// transitions go through `get_mut`, whose exclusive entry lock makes the
/// check-and-set atomic just like the SQL conditional update.
#[derive(Default)]
pub struct MemoryStore {
    settings: RwLock<Option<ChannelSettings>>,
    templates: DashMap<(Trigger, Channel), MessageTemplate>,
    logs: RwLock<Vec<NotificationLog>>,
    orders: DashMap<String, OrderDetails>,
    products: DashMap<String, ProductRecord>,
    customers: DashMap<String, CustomerRecord>,
    reviews: DashMap<String, ReviewRecord>,
    scheduled: DashMap<Uuid, ScheduledNotification>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the settings singleton.
    pub fn set_settings(&self, settings: ChannelSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(settings);
    }

    /// Insert or replace the template for its (trigger, channel) pair.
    pub fn upsert_template(&self, template: MessageTemplate) {
        self.templates
            .insert((template.trigger, template.channel), template);
    }

    pub fn seed_order(&self, order: OrderDetails) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn seed_product(&self, product: ProductRecord) {
        self.products.insert(product.id.clone(), product);
    }

    pub fn seed_customer(&self, customer: CustomerRecord) {
        self.customers.insert(customer.id.clone(), customer);
    }

    pub fn seed_review(&self, review: ReviewRecord) {
        self.reviews.insert(review.id.clone(), review);
    }

    /// Snapshot of the audit trail, in append order.
    pub fn log_entries(&self) -> Vec<NotificationLog> {
        self.logs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Snapshot of every scheduled row, oldest first.
    pub fn scheduled_rows(&self) -> Vec<ScheduledNotification> {
        let mut rows: Vec<ScheduledNotification> =
            self.scheduled.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|r| (r.scheduled_for, r.id));
        rows
    }

    /// Look up one scheduled row by id.
    pub fn scheduled_by_id(&self, id: Uuid) -> Option<ScheduledNotification> {
        self.scheduled.get(&id).map(|r| r.clone())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn channel_settings(&self) -> StoreResult<Option<ChannelSettings>> {
        Ok(self
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn find_template(
        &self,
        trigger: Trigger,
        channel: Channel,
    ) -> StoreResult<Option<MessageTemplate>> {
        Ok(self.templates.get(&(trigger, channel)).map(|t| t.clone()))
    }

    async fn append_log(&self, entry: NotificationLog) -> StoreResult<()> {
        self.logs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
        Ok(())
    }

    async fn fetch_order(&self, id: &str) -> StoreResult<Option<OrderDetails>> {
        Ok(self.orders.get(id).map(|o| o.clone()))
    }

    async fn fetch_product(&self, id: &str) -> StoreResult<Option<ProductRecord>> {
        Ok(self.products.get(id).map(|p| p.clone()))
    }

    async fn fetch_customer(&self, id: &str) -> StoreResult<Option<CustomerRecord>> {
        Ok(self.customers.get(id).map(|c| c.clone()))
    }

    async fn fetch_review(&self, id: &str) -> StoreResult<Option<ReviewRecord>> {
        Ok(self.reviews.get(id).map(|r| r.clone()))
    }

    async fn count_customers(&self) -> StoreResult<i64> {
        Ok(self.customers.len() as i64)
    }

    async fn count_low_stock_products(&self) -> StoreResult<i64> {
        Ok(self
            .products
            .iter()
            .filter(|p| p.stock <= p.low_stock_threshold)
            .count() as i64)
    }

    async fn insert_scheduled(&self, notification: ScheduledNotification) -> StoreResult<()> {
        self.scheduled.insert(notification.id, notification);
        Ok(())
    }

    async fn cancel_pending(
        &self,
        order_id: &str,
        triggers: Option<&[Trigger]>,
    ) -> StoreResult<usize> {
        let now = Utc::now();
        let mut cancelled = 0;

        for mut entry in self.scheduled.iter_mut() {
            let row = entry.value_mut();
            if row.order_id != order_id || row.status != ScheduleStatus::Pending {
                continue;
            }
            if let Some(triggers) = triggers {
                if !triggers.contains(&row.trigger) {
                    continue;
                }
            }
            row.status = ScheduleStatus::Cancelled;
            row.cancelled_at = Some(now);
            cancelled += 1;
        }

        Ok(cancelled)
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<DueScheduled>> {
        let mut due: Vec<ScheduledNotification> = self
            .scheduled
            .iter()
            .filter(|r| r.status == ScheduleStatus::Pending && r.scheduled_for <= now)
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|r| (r.scheduled_for, r.id));
        due.truncate(limit);

        Ok(due
            .into_iter()
            .map(|notification| {
                let order = self.orders.get(&notification.order_id);
                DueScheduled {
                    order_status: order.as_ref().map(|o| o.status),
                    payment_status: order.as_ref().map(|o| o.payment_status),
                    notification,
                }
            })
            .collect())
    }

    async fn claim_due(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        // get_mut holds the shard write lock across the check and the write
        if let Some(mut row) = self.scheduled.get_mut(&id) {
            if row.status == ScheduleStatus::Pending {
                row.status = ScheduleStatus::Sent;
                row.attempts += 1;
                row.processed_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn release_claim(&self, id: Uuid, error: &str, permanent: bool) -> StoreResult<()> {
        match self.scheduled.get_mut(&id) {
            Some(mut row) if row.status == ScheduleStatus::Sent => {
                row.status = if permanent {
                    ScheduleStatus::Failed
                } else {
                    ScheduleStatus::Pending
                };
                row.last_error = Some(error.to_string());
                Ok(())
            }
            Some(_) | None => Err(StoreError::InvalidTransition(format!(
                "release of unclaimed scheduled notification {id}"
            ))),
        }
    }

    async fn cancel_if_pending(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        if let Some(mut row) = self.scheduled.get_mut(&id) {
            if row.status == ScheduleStatus::Pending {
                row.status = ScheduleStatus::Cancelled;
                row.cancelled_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
