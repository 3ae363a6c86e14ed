use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{
    CourierError, HandlerError, HandlerResult, Message, MessageContext, MessageEnvelope,
    MessageHandler, Result, RouteRegistry,
};

/// 按类型名分发的处理器，负责把消息体解码为具体类型
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn invoke(&self, envelope: &MessageEnvelope, context: MessageContext) -> HandlerResult;
}

struct TypedHandler<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, H> DynHandler for TypedHandler<M, H>
where
    M: Message,
    H: MessageHandler<M> + 'static,
{
    async fn invoke(&self, envelope: &MessageEnvelope, context: MessageContext) -> HandlerResult {
        let message = envelope
            .decode::<M>()
            .map_err(|e| HandlerError::Decode(format!("{}: {e}", M::TYPE_NAME)))?;
        self.handler.handle(message, context).await
    }
}

struct FnHandler<M, F> {
    f: F,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, F, Fut> DynHandler for FnHandler<M, F>
where
    M: Message,
    F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn invoke(&self, envelope: &MessageEnvelope, context: MessageContext) -> HandlerResult {
        let message = envelope
            .decode::<M>()
            .map_err(|e| HandlerError::Decode(format!("{}: {e}", M::TYPE_NAME)))?;
        (self.f)(message, context).await
    }
}

/// 消息类型名 -> 处理器 的分发表，启动时构建
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M, H>(&mut self, handler: H) -> Result<()>
    where
        M: Message,
        H: MessageHandler<M> + 'static,
    {
        self.insert(
            M::TYPE_NAME,
            Arc::new(TypedHandler {
                handler,
                _message: PhantomData,
            }),
        )
    }

    pub fn register_fn<M, F, Fut>(&mut self, f: F) -> Result<()>
    where
        M: Message,
        F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(
            M::TYPE_NAME,
            Arc::new(FnHandler {
                f,
                _message: PhantomData,
            }),
        )
    }

    /// 直接按类型名注册，处理器自己负责解码
    pub fn register_dyn(
        &mut self,
        type_name: impl Into<String>,
        handler: Arc<dyn DynHandler>,
    ) -> Result<()> {
        let type_name: String = type_name.into();
        self.insert(&type_name, handler)
    }

    fn insert(&mut self, type_name: &str, handler: Arc<dyn DynHandler>) -> Result<()> {
        if self.handlers.contains_key(type_name) {
            return Err(CourierError::Configuration(format!(
                "消息类型 {type_name} 已注册处理器"
            )));
        }
        self.handlers.insert(type_name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 启动校验：每个注册了处理器的类型都必须有路由
    pub fn validate(&self, routes: &RouteRegistry) -> Result<()> {
        routes.ensure_registered(self.type_names())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::{Destination, RouteDescriptor};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap as Properties;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Serialize, Deserialize)]
    struct ImportProfileFriends {
        profile_id: u64,
    }

    impl Message for ImportProfileFriends {
        const TYPE_NAME: &'static str = "import-profile-friends";

        fn key(&self) -> String {
            self.profile_id.to_string()
        }
    }

    struct Rejecting;

    #[async_trait]
    impl MessageHandler<ImportProfileFriends> for Rejecting {
        async fn handle(&self, message: ImportProfileFriends, context: MessageContext) -> HandlerResult {
            Err(context.dead_letter(format!("资料 {} 不存在", message.profile_id)))
        }
    }

    fn context() -> MessageContext {
        MessageContext {
            message_id: "1".to_string(),
            type_name: ImportProfileFriends::TYPE_NAME.to_string(),
            destination: Destination::queue("import-profile-friends"),
            enqueued_at: Utc::now(),
            attempt: 1,
            max_attempts: 3,
            properties: Properties::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_closure_handler_receives_decoded_message() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn(|message: ImportProfileFriends, _ctx| async move {
                assert_eq!(message.profile_id, 42);
                Ok(())
            })
            .unwrap();

        let envelope =
            MessageEnvelope::from_message(&ImportProfileFriends { profile_id: 42 }).unwrap();
        let handler = registry.get("import-profile-friends").unwrap();
        assert!(handler.invoke(&envelope, context()).await.is_ok());
    }

    #[tokio::test]
    async fn test_trait_handler_and_decode_failure() {
        let mut registry = HandlerRegistry::new();
        registry.register::<ImportProfileFriends, _>(Rejecting).unwrap();
        let handler = registry.get("import-profile-friends").unwrap();

        let envelope =
            MessageEnvelope::from_message(&ImportProfileFriends { profile_id: 7 }).unwrap();
        let err = handler.invoke(&envelope, context()).await.unwrap_err();
        assert!(matches!(err, HandlerError::DeadLetter { .. }));

        let garbage = MessageEnvelope::new("7", "import-profile-friends", b"not json".to_vec());
        let err = handler.invoke(&garbage, context()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register::<ImportProfileFriends, _>(Rejecting).unwrap();
        assert!(registry
            .register::<ImportProfileFriends, _>(Rejecting)
            .is_err());
        assert_eq!(registry.type_names(), vec!["import-profile-friends"]);
    }

    #[test]
    fn test_validate_requires_routes() {
        let mut registry = HandlerRegistry::new();
        registry.register::<ImportProfileFriends, _>(Rejecting).unwrap();

        let empty = RouteRegistry::default();
        assert!(matches!(
            registry.validate(&empty),
            Err(CourierError::UnregisteredMessageType { .. })
        ));

        let routes = RouteRegistry::builder()
            .route_for::<ImportProfileFriends>(RouteDescriptor::queue("import-profile-friends"))
            .build()
            .unwrap();
        assert!(registry.validate(&routes).is_ok());
    }
}
