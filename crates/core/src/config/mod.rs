//! 配置管理
//!
//! TOML 配置文件加环境变量覆盖（`COURIER_` 前缀），反序列化为类型化的
//! [`AppConfig`]。路由与作业在 `validate` 阶段完整构建一次，配置错误在启动时暴露，
//! 而不是等到第一条消息或第一次触发。
//!
//! ```toml
//! [dispatcher]
//! max_attempts = 3
//!
//! [[routes]]
//! message_type = "import-profile-friends"
//! destination = "import-profile-friends"
//! duplicate_window_seconds = 604800
//!
//! [[jobs]]
//! name = "update-profile-inventory-values"
//! cron = "0 45 * * * *"
//! ```

pub mod models;

pub use models::*;
