use thiserror::Error;

/// 消息分发与作业调度的错误类型定义
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("消息类型未注册路由: {type_name}")]
    UnregisteredMessageType { type_name: String },

    #[error("目标 {destination} 的路由配置冲突: {message}")]
    ConflictingRoute {
        destination: String,
        message: String,
    },

    #[error("无效的路由配置: {0}")]
    InvalidRoute(String),

    #[error("消息类型 {type_name} 没有注册处理器")]
    MissingHandler { type_name: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的时区: {0}")]
    InvalidTimeZone(String),

    #[error("无效的触发器配置: {0}")]
    InvalidTrigger(String),

    #[error("作业名称重复: {name}")]
    DuplicateJob { name: String },

    #[error("作业 {name} 没有注册执行体")]
    MissingJobBody { name: String },

    #[error("消息代理错误: {0}")]
    Broker(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("操作已取消")]
    Cancelled,

    #[error("内部错误: {0}")]
    Internal(String),
}

impl CourierError {
    /// 启动阶段校验类错误，出现时应直接终止启动
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            CourierError::UnregisteredMessageType { .. }
                | CourierError::ConflictingRoute { .. }
                | CourierError::InvalidRoute(_)
                | CourierError::MissingHandler { .. }
                | CourierError::InvalidCron { .. }
                | CourierError::InvalidTimeZone(_)
                | CourierError::InvalidTrigger(_)
                | CourierError::DuplicateJob { .. }
                | CourierError::MissingJobBody { .. }
                | CourierError::Configuration(_)
        )
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_fatal_classification() {
        let err = CourierError::UnregisteredMessageType {
            type_name: "PriceUpdate".to_string(),
        };
        assert!(err.is_startup_fatal());
        assert!(err.to_string().contains("PriceUpdate"));

        assert!(!CourierError::Broker("连接断开".to_string()).is_startup_fatal());
        assert!(!CourierError::Cancelled.is_startup_fatal());
    }

    #[test]
    fn test_serialization_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: CourierError = parse_err.into();
        assert!(matches!(err, CourierError::Serialization(_)));
    }
}
