//! # Courier Testing Utils
//!
//! 工作区共享的测试工具：
//!
//! - **Builders**：路由、信封、作业配置的构造器
//! - **Fixtures**：测试用的强类型消息
//! - **Mocks**：记录调用与峰值并发的处理器、可编排的作业
//! - **Helpers**：条件等待与测试日志初始化
//!
//! ```toml
//! [dev-dependencies]
//! courier-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod fixtures;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use fixtures::*;
pub use helpers::*;
pub use mocks::*;
