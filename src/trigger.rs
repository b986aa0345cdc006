use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Business events that can produce a notification.
///
/// The set is closed: adding a trigger means adding a variant here and a
/// template row per channel. Storage and wire form is the stable
/// SCREAMING_SNAKE name (`Trigger::as_str`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    // Customer-facing: order lifecycle
    OrderPlaced,
    PaymentReceived,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
    OrderRefunded,
    PaymentFailed,
    /// First unpaid-order reminder (default 24h after placement).
    #[serde(rename = "PAYMENT_REMINDER_1")]
    PaymentReminder1,
    /// Second unpaid-order reminder (default 72h).
    #[serde(rename = "PAYMENT_REMINDER_2")]
    PaymentReminder2,
    /// Last unpaid-order reminder (default 120h).
    #[serde(rename = "PAYMENT_REMINDER_3")]
    PaymentReminder3,
    /// Review solicitation, scheduled after delivery.
    ReviewRequest,
    CustomerNote,
    InvoiceCreated,
    // Customer-facing: account and engagement
    NewAccount,
    PasswordReset,
    LoyaltyPointsEarned,
    AbandonedCart,
    BackInStock,
    // Admin-facing
    NewOrderAdmin,
    OrderCancelledAdmin,
    PaymentReceivedAdmin,
    LowStockAdmin,
    OutOfStockAdmin,
    NewCustomerAdmin,
    NewReviewAdmin,
    DailyReportAdmin,
}

/// Who a trigger addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    Customer,
    Admin,
}

/// Which entity a trigger's variables are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Order,
    Product,
    Customer,
    Review,
    /// Variables come straight from the caller-supplied context values.
    None,
}

impl Trigger {
    /// Every trigger, in declaration order.
    pub const ALL: [Trigger; 26] = [
        Trigger::OrderPlaced,
        Trigger::PaymentReceived,
        Trigger::OrderShipped,
        Trigger::OrderDelivered,
        Trigger::OrderCancelled,
        Trigger::OrderRefunded,
        Trigger::PaymentFailed,
        Trigger::PaymentReminder1,
        Trigger::PaymentReminder2,
        Trigger::PaymentReminder3,
        Trigger::ReviewRequest,
        Trigger::CustomerNote,
        Trigger::InvoiceCreated,
        Trigger::NewAccount,
        Trigger::PasswordReset,
        Trigger::LoyaltyPointsEarned,
        Trigger::AbandonedCart,
        Trigger::BackInStock,
        Trigger::NewOrderAdmin,
        Trigger::OrderCancelledAdmin,
        Trigger::PaymentReceivedAdmin,
        Trigger::LowStockAdmin,
        Trigger::OutOfStockAdmin,
        Trigger::NewCustomerAdmin,
        Trigger::NewReviewAdmin,
        Trigger::DailyReportAdmin,
    ];

    /// The three unpaid-order reminders, in sequence order.
    pub const PAYMENT_REMINDERS: [Trigger; 3] = [
        Trigger::PaymentReminder1,
        Trigger::PaymentReminder2,
        Trigger::PaymentReminder3,
    ];

    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::OrderPlaced => "ORDER_PLACED",
            Trigger::PaymentReceived => "PAYMENT_RECEIVED",
            Trigger::OrderShipped => "ORDER_SHIPPED",
            Trigger::OrderDelivered => "ORDER_DELIVERED",
            Trigger::OrderCancelled => "ORDER_CANCELLED",
            Trigger::OrderRefunded => "ORDER_REFUNDED",
            Trigger::PaymentFailed => "PAYMENT_FAILED",
            Trigger::PaymentReminder1 => "PAYMENT_REMINDER_1",
            Trigger::PaymentReminder2 => "PAYMENT_REMINDER_2",
            Trigger::PaymentReminder3 => "PAYMENT_REMINDER_3",
            Trigger::ReviewRequest => "REVIEW_REQUEST",
            Trigger::CustomerNote => "CUSTOMER_NOTE",
            Trigger::InvoiceCreated => "INVOICE_CREATED",
            Trigger::NewAccount => "NEW_ACCOUNT",
            Trigger::PasswordReset => "PASSWORD_RESET",
            Trigger::LoyaltyPointsEarned => "LOYALTY_POINTS_EARNED",
            Trigger::AbandonedCart => "ABANDONED_CART",
            Trigger::BackInStock => "BACK_IN_STOCK",
            Trigger::NewOrderAdmin => "NEW_ORDER_ADMIN",
            Trigger::OrderCancelledAdmin => "ORDER_CANCELLED_ADMIN",
            Trigger::PaymentReceivedAdmin => "PAYMENT_RECEIVED_ADMIN",
            Trigger::LowStockAdmin => "LOW_STOCK_ADMIN",
            Trigger::OutOfStockAdmin => "OUT_OF_STOCK_ADMIN",
            Trigger::NewCustomerAdmin => "NEW_CUSTOMER_ADMIN",
            Trigger::NewReviewAdmin => "NEW_REVIEW_ADMIN",
            Trigger::DailyReportAdmin => "DAILY_REPORT_ADMIN",
        }
    }

    /// Whether the notification goes to the customer or to the shop admins.
    pub fn recipient(&self) -> RecipientKind {
        match self {
            Trigger::NewOrderAdmin
            | Trigger::OrderCancelledAdmin
            | Trigger::PaymentReceivedAdmin
            | Trigger::LowStockAdmin
            | Trigger::OutOfStockAdmin
            | Trigger::NewCustomerAdmin
            | Trigger::NewReviewAdmin
            | Trigger::DailyReportAdmin => RecipientKind::Admin,
            _ => RecipientKind::Customer,
        }
    }

    /// Which entity variable resolution loads for this trigger.
    ///
    /// Exhaustive on purpose: a new trigger will not compile until its
    /// entity binding is declared here.
    pub fn entity(&self) -> EntityKind {
        match self {
            Trigger::OrderPlaced
            | Trigger::PaymentReceived
            | Trigger::OrderShipped
            | Trigger::OrderDelivered
            | Trigger::OrderCancelled
            | Trigger::OrderRefunded
            | Trigger::PaymentFailed
            | Trigger::PaymentReminder1
            | Trigger::PaymentReminder2
            | Trigger::PaymentReminder3
            | Trigger::ReviewRequest
            | Trigger::CustomerNote
            | Trigger::InvoiceCreated
            | Trigger::NewOrderAdmin
            | Trigger::OrderCancelledAdmin
            | Trigger::PaymentReceivedAdmin => EntityKind::Order,
            Trigger::LowStockAdmin | Trigger::OutOfStockAdmin | Trigger::BackInStock => {
                EntityKind::Product
            }
            Trigger::NewAccount | Trigger::NewCustomerAdmin => EntityKind::Customer,
            Trigger::NewReviewAdmin => EntityKind::Review,
            Trigger::PasswordReset
            | Trigger::LoyaltyPointsEarned
            | Trigger::AbandonedCart
            | Trigger::DailyReportAdmin => EntityKind::None,
        }
    }

    /// 1-based position for the payment reminders, `None` otherwise.
    pub fn reminder_seq(&self) -> Option<u8> {
        match self {
            Trigger::PaymentReminder1 => Some(1),
            Trigger::PaymentReminder2 => Some(2),
            Trigger::PaymentReminder3 => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for trigger names not in the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown notification trigger: {0}")]
pub struct UnknownTrigger(pub String);

impl FromStr for Trigger {
    type Err = UnknownTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTrigger(s.to_string()))
    }
}

/// Delivery channels.
///
/// `Email` exists in the settings model for forward compatibility but has
/// no transport wired, so it never carries a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Sms,
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    /// Meta Cloud API, template-restricted. Used for OTP delivery only.
    #[serde(rename = "WHATSAPP_CLOUD")]
    WhatsAppCloud,
    Email,
}

impl Channel {
    /// Failover priority used when no explicit order is configured.
    pub const DEFAULT_FAILOVER_ORDER: [Channel; 2] = [Channel::WhatsApp, Channel::Sms];

    /// Channels that take part in dual-mode fan-out.
    pub const DUAL_CANDIDATES: [Channel; 2] = [Channel::Sms, Channel::WhatsApp];

    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::WhatsApp => "WHATSAPP",
            Channel::WhatsAppCloud => "WHATSAPP_CLOUD",
            Channel::Email => "EMAIL",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for channel names outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown delivery channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SMS" => Ok(Channel::Sms),
            "WHATSAPP" => Ok(Channel::WhatsApp),
            "WHATSAPP_CLOUD" => Ok(Channel::WhatsAppCloud),
            "EMAIL" => Ok(Channel::Email),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_names_round_trip() {
        for trigger in Trigger::ALL {
            let parsed: Trigger = trigger.as_str().parse().unwrap();
            assert_eq!(parsed, trigger);
        }
    }

    #[test]
    fn test_unknown_trigger_is_rejected() {
        let err = "ORDER_EXPLODED".parse::<Trigger>().unwrap_err();
        assert_eq!(err.0, "ORDER_EXPLODED");
    }

    #[test]
    fn test_admin_triggers_route_to_admin() {
        assert_eq!(Trigger::NewOrderAdmin.recipient(), RecipientKind::Admin);
        assert_eq!(Trigger::DailyReportAdmin.recipient(), RecipientKind::Admin);
        assert_eq!(Trigger::OrderPlaced.recipient(), RecipientKind::Customer);
        assert_eq!(Trigger::PasswordReset.recipient(), RecipientKind::Customer);
    }

    #[test]
    fn test_entity_bindings() {
        assert_eq!(Trigger::CustomerNote.entity(), EntityKind::Order);
        assert_eq!(Trigger::ReviewRequest.entity(), EntityKind::Order);
        assert_eq!(Trigger::BackInStock.entity(), EntityKind::Product);
        assert_eq!(Trigger::NewCustomerAdmin.entity(), EntityKind::Customer);
        assert_eq!(Trigger::NewReviewAdmin.entity(), EntityKind::Review);
        assert_eq!(Trigger::PasswordReset.entity(), EntityKind::None);
        assert_eq!(Trigger::DailyReportAdmin.entity(), EntityKind::None);
    }

    #[test]
    fn test_reminder_sequence() {
        assert_eq!(Trigger::PaymentReminder1.reminder_seq(), Some(1));
        assert_eq!(Trigger::PaymentReminder3.reminder_seq(), Some(3));
        assert_eq!(Trigger::OrderPlaced.reminder_seq(), None);
        for (i, t) in Trigger::PAYMENT_REMINDERS.iter().enumerate() {
            assert_eq!(t.reminder_seq(), Some(i as u8 + 1));
        }
    }

    #[test]
    fn test_channel_names_round_trip() {
        for channel in [
            Channel::Sms,
            Channel::WhatsApp,
            Channel::WhatsAppCloud,
            Channel::Email,
        ] {
            let parsed: Channel = channel.as_str().parse().unwrap();
            assert_eq!(parsed, channel);
        }
    }

    #[test]
    fn test_default_failover_prefers_whatsapp() {
        assert_eq!(
            Channel::DEFAULT_FAILOVER_ORDER,
            [Channel::WhatsApp, Channel::Sms]
        );
    }

    #[test]
    fn test_serde_wire_names() {
        let json = serde_json::to_string(&Trigger::PaymentReminder2).unwrap();
        assert_eq!(json, "\"PAYMENT_REMINDER_2\"");
        let channel: Channel = serde_json::from_str("\"WHATSAPP_CLOUD\"").unwrap();
        assert_eq!(channel, Channel::WhatsAppCloud);
    }
}
