pub mod in_memory_broker;
pub mod observability;

pub use in_memory_broker::{subscription_path, DeadLetter, InMemoryBroker, QueueStats};
pub use observability::*;
