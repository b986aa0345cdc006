// Domain model
pub mod context;
pub mod template;
pub mod trigger;

// Notification engine
pub mod dispatch;
pub mod events;
pub mod resolver;
pub mod scheduler;

// External collaborators
pub mod store;
pub mod transport;

// Supporting modules
pub mod config;
pub mod metrics;
pub mod telemetry;

pub use context::{ContextOverrides, EntityRef, NotificationContext};
pub use dispatch::{DeliveryMode, DispatchError, DispatchOutcome, Dispatcher};
pub use events::EventNotifier;
pub use scheduler::{ReminderScheduler, ReminderWorker};
pub use trigger::{Channel, RecipientKind, Trigger};
