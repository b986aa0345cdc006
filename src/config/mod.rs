mod settings;

pub use settings::{
    IdentityConfig, OtelConfig, SchedulerConfig, Settings, StoreConfig, TransportConfig,
};
