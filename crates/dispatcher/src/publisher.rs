use std::sync::Arc;

use courier_core::{
    Destination, Message, MessageBroker, MessageEnvelope, Result, RouteRegistry,
};
use futures::future::try_join_all;
use tracing::debug;

/// 生产者入口：按消息类型解析路由后交给消息代理
#[derive(Clone)]
pub struct MessagePublisher {
    broker: Arc<dyn MessageBroker>,
    routes: Arc<RouteRegistry>,
}

impl MessagePublisher {
    pub fn new(broker: Arc<dyn MessageBroker>, routes: Arc<RouteRegistry>) -> Self {
        Self { broker, routes }
    }

    /// 发送强类型消息，返回信封ID（即去重键）
    pub async fn publish<M: Message>(&self, message: &M) -> Result<String> {
        let envelope = MessageEnvelope::from_message(message)?;
        let id = envelope.id.clone();
        self.publish_envelope(envelope).await?;
        Ok(id)
    }

    pub async fn publish_envelope(&self, envelope: MessageEnvelope) -> Result<()> {
        let route = self.routes.resolve(&envelope.type_name)?;
        let destination = Destination::from(route);

        debug!(
            "Publishing {} message {} to {}",
            envelope.type_name, envelope.id, destination
        );
        self.broker.send(&destination, envelope).await
    }

    /// 批量发送，任意一条失败即返回错误
    pub async fn publish_all<M: Message>(&self, messages: &[M]) -> Result<Vec<String>> {
        try_join_all(messages.iter().map(|message| self.publish(message))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{BrokerConfig, CourierError, RouteDescriptor};
    use courier_infrastructure::InMemoryBroker;
    use futures::StreamExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct AnalyseWorkshopFile {
        app_id: u32,
        published_file_id: u64,
    }

    impl Message for AnalyseWorkshopFile {
        const TYPE_NAME: &'static str = "analyse-workshop-file";

        fn key(&self) -> String {
            format!("{}/{}", self.app_id, self.published_file_id)
        }
    }

    fn publisher(broker: &InMemoryBroker) -> MessagePublisher {
        let routes = RouteRegistry::builder()
            .route_for::<AnalyseWorkshopFile>(RouteDescriptor::queue("workshop-files"))
            .build()
            .unwrap();
        MessagePublisher::new(Arc::new(broker.clone()), Arc::new(routes))
    }

    #[tokio::test]
    async fn test_publish_uses_natural_key_and_route() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let mut deliveries = broker
            .subscribe(&Destination::queue("workshop-files"), "")
            .await
            .unwrap();

        let id = publisher(&broker)
            .publish(&AnalyseWorkshopFile {
                app_id: 730,
                published_file_id: 123,
            })
            .await
            .unwrap();
        assert_eq!(id, "730/123");

        let delivery = deliveries.next().await.unwrap();
        assert_eq!(delivery.envelope.type_name, "analyse-workshop-file");
        assert_eq!(
            delivery.envelope.decode::<AnalyseWorkshopFile>().unwrap(),
            AnalyseWorkshopFile {
                app_id: 730,
                published_file_id: 123
            }
        );
    }

    #[tokio::test]
    async fn test_publish_all() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let ids = publisher(&broker)
            .publish_all(&[
                AnalyseWorkshopFile {
                    app_id: 730,
                    published_file_id: 1,
                },
                AnalyseWorkshopFile {
                    app_id: 730,
                    published_file_id: 2,
                },
            ])
            .await
            .unwrap();

        assert_eq!(ids, vec!["730/1", "730/2"]);
        assert_eq!(broker.queue_depth("workshop-files"), 2);
    }

    #[tokio::test]
    async fn test_unrouted_envelope_rejected() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let result = publisher(&broker)
            .publish_envelope(MessageEnvelope::new("1", "unknown", Vec::new()))
            .await;

        assert!(matches!(
            result,
            Err(CourierError::UnregisteredMessageType { .. })
        ));
    }
}
