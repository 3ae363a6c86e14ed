pub mod config;
pub mod errors;
pub mod models;
pub mod routing;
pub mod traits;

pub use self::config::{
    AppConfig, BrokerConfig, DispatcherConfig, JobConfig, ObservabilityConfig, RouteConfig,
    SchedulerConfig,
};
pub use errors::*;
pub use models::{
    Destination, DestinationKind, JobDescriptor, Message, MessageEnvelope, RouteDescriptor,
    TriggerSpec,
};
pub use routing::{RouteRegistry, RouteRegistryBuilder};
pub use traits::*;

/// 统一的Result类型
pub type CourierResult<T> = std::result::Result<T, CourierError>;
