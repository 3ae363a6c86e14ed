//! 测试用消息类型

use courier_core::Message;
use serde::{Deserialize, Serialize};

/// 市场价格更新，自然键为 `{app_id}/{market_hash_name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub app_id: u32,
    pub market_hash_name: String,
    pub price_cents: u64,
}

impl PriceUpdate {
    pub fn new(app_id: u32, market_hash_name: &str, price_cents: u64) -> Self {
        Self {
            app_id,
            market_hash_name: market_hash_name.to_string(),
            price_cents,
        }
    }
}

impl Message for PriceUpdate {
    const TYPE_NAME: &'static str = "price-update";

    fn key(&self) -> String {
        format!("{}/{}", self.app_id, self.market_hash_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProfileFriends {
    pub profile_id: u64,
}

impl Message for ImportProfileFriends {
    const TYPE_NAME: &'static str = "import-profile-friends";

    fn key(&self) -> String {
        self.profile_id.to_string()
    }
}

/// 通过主题广播的商店事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreItemAdded {
    pub item_id: u64,
    pub name: String,
}

impl Message for StoreItemAdded {
    const TYPE_NAME: &'static str = "store-item-added";

    fn key(&self) -> String {
        self.item_id.to_string()
    }
}
