pub mod app_config;
pub mod broker;
pub mod dispatcher_scheduler;
pub mod observability;
pub mod routing;

pub use app_config::AppConfig;
pub use broker::BrokerConfig;
pub use dispatcher_scheduler::{DispatcherConfig, SchedulerConfig};
pub use observability::ObservabilityConfig;
pub use routing::{JobConfig, RouteConfig};
