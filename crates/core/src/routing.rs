//! 路由元数据解析
//!
//! 启动时由组合根显式构建注册表（不做运行时反射扫描），构建阶段完成全部校验，
//! 之后只读并在所有分发循环之间共享。

use std::collections::{BTreeMap, HashMap};

use crate::{
    config::RouteConfig,
    models::{Destination, Message, RouteDescriptor},
    CourierError, Result,
};

/// 消息类型 -> 路由元数据
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: HashMap<String, RouteDescriptor>,
}

impl RouteRegistry {
    pub fn builder() -> RouteRegistryBuilder {
        RouteRegistryBuilder::default()
    }

    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let mut builder = Self::builder();
        for route in routes {
            builder = builder.route(route.message_type.clone(), route.to_descriptor()?);
        }
        builder.build()
    }

    pub fn resolve(&self, type_name: &str) -> Result<&RouteDescriptor> {
        self.routes
            .get(type_name)
            .ok_or_else(|| CourierError::UnregisteredMessageType {
                type_name: type_name.to_string(),
            })
    }

    pub fn resolve_for<M: Message>(&self) -> Result<&RouteDescriptor> {
        self.resolve(M::TYPE_NAME)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.routes.contains_key(type_name)
    }

    /// 启动校验：给定的类型必须全部已注册
    pub fn ensure_registered<'a, I>(&self, type_names: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for type_name in type_names {
            self.resolve(type_name)?;
        }
        Ok(())
    }

    /// 去重后的目标列表，按名称排序
    pub fn destinations(&self) -> Vec<Destination> {
        let unique: BTreeMap<&str, Destination> = self
            .routes
            .values()
            .map(|route| (route.destination.as_str(), Destination::from(route)))
            .collect();
        unique.into_values().collect()
    }

    /// 路由到同一目标的全部消息类型
    pub fn types_for_destination(&self, destination: &str) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .routes
            .iter()
            .filter(|(_, route)| route.destination == destination)
            .map(|(type_name, _)| type_name.as_str())
            .collect();
        types.sort_unstable();
        types
    }

    /// 目标的并发上限；同一目标上的类型在构建时已保证一致
    pub fn max_concurrency_for(&self, destination: &str) -> Option<usize> {
        self.routes
            .values()
            .find(|route| route.destination == destination)
            .map(|route| route.max_concurrency)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RouteRegistryBuilder {
    entries: Vec<(String, RouteDescriptor)>,
}

impl RouteRegistryBuilder {
    pub fn route(mut self, type_name: impl Into<String>, descriptor: RouteDescriptor) -> Self {
        self.entries.push((type_name.into(), descriptor));
        self
    }

    pub fn route_for<M: Message>(self, descriptor: RouteDescriptor) -> Self {
        self.route(M::TYPE_NAME, descriptor)
    }

    pub fn build(self) -> Result<RouteRegistry> {
        let mut routes: HashMap<String, RouteDescriptor> = HashMap::new();
        let mut by_destination: HashMap<String, (String, RouteDescriptor)> = HashMap::new();

        for (type_name, descriptor) in self.entries {
            if type_name.trim().is_empty() {
                return Err(CourierError::InvalidRoute("消息类型名称不能为空".to_string()));
            }
            if descriptor.destination.trim().is_empty() {
                return Err(CourierError::InvalidRoute(format!(
                    "消息类型 {type_name} 的目标名称不能为空"
                )));
            }
            if descriptor.max_concurrency == 0 {
                return Err(CourierError::InvalidRoute(format!(
                    "消息类型 {type_name} 的最大并发数必须大于0"
                )));
            }
            if routes.contains_key(&type_name) {
                return Err(CourierError::InvalidRoute(format!(
                    "消息类型 {type_name} 重复注册"
                )));
            }

            match by_destination.get(&descriptor.destination) {
                Some((other_type, existing)) => {
                    if existing.kind != descriptor.kind {
                        return Err(CourierError::ConflictingRoute {
                            destination: descriptor.destination.clone(),
                            message: format!(
                                "{other_type} 声明为 {}，{type_name} 声明为 {}",
                                existing.kind, descriptor.kind
                            ),
                        });
                    }
                    if existing.max_concurrency != descriptor.max_concurrency {
                        return Err(CourierError::ConflictingRoute {
                            destination: descriptor.destination.clone(),
                            message: format!(
                                "{other_type} 的最大并发数为 {}，{type_name} 为 {}",
                                existing.max_concurrency, descriptor.max_concurrency
                            ),
                        });
                    }
                }
                None => {
                    by_destination.insert(
                        descriptor.destination.clone(),
                        (type_name.clone(), descriptor.clone()),
                    );
                }
            }

            routes.insert(type_name, descriptor);
        }

        Ok(RouteRegistry { routes })
    }
}
