use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity a notification is about, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    Order(String),
    Product(String),
    Customer(String),
    Review(String),
    #[default]
    None,
}

impl EntityRef {
    /// Order id when the reference is an order.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            EntityRef::Order(id) => Some(id),
            _ => None,
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        match self {
            EntityRef::Customer(id) => Some(id),
            _ => None,
        }
    }
}

/// Caller-supplied values filling in whatever entity lookup leaves
/// unresolved.
///
/// They let callers feed a send without any backing entity, e.g. an
/// invoice issued by hand from the back office.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    /// Amount in whole CFA francs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_total: Option<i64>,
    /// Preformatted date string, passed through as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_phone: Option<String>,
    /// Explicit destination number, strongest link in the recipient chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_phone: Option<String>,
}

impl ContextOverrides {
    pub fn is_empty(&self) -> bool {
        self.customer_name.is_none()
            && self.order_number.is_none()
            && self.invoice_number.is_none()
            && self.order_total.is_none()
            && self.order_date.is_none()
            && self.invoice_url.is_none()
            && self.billing_phone.is_none()
            && self.recipient_phone.is_none()
    }
}

/// Input to variable resolution for one notification.
///
/// Replaces the loose string map the dispatcher used to take: the entity
/// binding is explicit, passthrough overrides are typed, and only
/// trigger-specific scalars (reset codes, report aggregates) ride in the
/// open `values` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationContext {
    pub entity: EntityRef,
    #[serde(default)]
    pub overrides: ContextOverrides,
    /// Raw scalars for triggers without a backing entity.
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl NotificationContext {
    /// Context bound to an order.
    pub fn order(id: impl Into<String>) -> Self {
        Self {
            entity: EntityRef::Order(id.into()),
            ..Default::default()
        }
    }

    /// Context bound to a product.
    pub fn product(id: impl Into<String>) -> Self {
        Self {
            entity: EntityRef::Product(id.into()),
            ..Default::default()
        }
    }

    /// Context bound to a customer account.
    pub fn customer(id: impl Into<String>) -> Self {
        Self {
            entity: EntityRef::Customer(id.into()),
            ..Default::default()
        }
    }

    /// Context bound to a product review.
    pub fn review(id: impl Into<String>) -> Self {
        Self {
            entity: EntityRef::Review(id.into()),
            ..Default::default()
        }
    }

    /// Context with no backing entity.
    pub fn raw() -> Self {
        Self::default()
    }

    /// Add a raw scalar consumed by entity-less triggers.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_customer_name(mut self, name: impl Into<String>) -> Self {
        self.overrides.customer_name = Some(name.into());
        self
    }

    pub fn with_order_number(mut self, number: impl Into<String>) -> Self {
        self.overrides.order_number = Some(number.into());
        self
    }

    pub fn with_invoice_number(mut self, number: impl Into<String>) -> Self {
        self.overrides.invoice_number = Some(number.into());
        self
    }

    pub fn with_order_total(mut self, total: i64) -> Self {
        self.overrides.order_total = Some(total);
        self
    }

    pub fn with_order_date(mut self, date: impl Into<String>) -> Self {
        self.overrides.order_date = Some(date.into());
        self
    }

    pub fn with_invoice_url(mut self, url: impl Into<String>) -> Self {
        self.overrides.invoice_url = Some(url.into());
        self
    }

    pub fn with_billing_phone(mut self, phone: impl Into<String>) -> Self {
        self.overrides.billing_phone = Some(phone.into());
        self
    }

    pub fn with_recipient_phone(mut self, phone: impl Into<String>) -> Self {
        self.overrides.recipient_phone = Some(phone.into());
        self
    }
}
