pub mod broker;
pub mod handler;
pub mod scheduler;

pub use broker::*;
pub use handler::*;
pub use scheduler::*;
