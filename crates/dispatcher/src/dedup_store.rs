use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;

/// 带时间窗口的去重记录
///
/// 键 -> 过期时间。同一个键的判断与写入在 DashMap 的分片锁内完成，
/// 不同键之间互不阻塞。过期记录在下一次访问时覆盖，或由 [`DedupStore::purge_expired`] 清理。
#[derive(Debug, Default)]
pub struct DedupStore {
    records: DashMap<String, Instant>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 消息类型与消息ID组合成去重键，避免不同类型的自然键互相抑制
    pub fn key_for(type_name: &str, message_id: &str) -> String {
        format!("{type_name}:{message_id}")
    }

    /// 窗口内首次出现返回 true 并记录；已有未过期记录时返回 false。零窗口总是放行且不记录。
    pub fn try_admit(&self, key: &str, window: Duration) -> bool {
        if window.is_zero() {
            return true;
        }

        let now = Instant::now();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(now + window);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + window);
                true
            }
        }
    }

    /// 删除记录，使同一个键可以被再次接纳（重试前调用）
    pub fn forget(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records
            .get(key)
            .map(|expires_at| *expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// 清理过期记录，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_admits_once_within_window() {
        let store = DedupStore::new();
        let key = DedupStore::key_for("price-update", "730/ak-47");

        assert!(store.try_admit(&key, WINDOW));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!store.try_admit(&key, WINDOW));
        assert!(store.contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_record_is_overwritten() {
        let store = DedupStore::new();

        assert!(store.try_admit("k", WINDOW));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.contains("k"));
        assert!(store.try_admit("k", WINDOW));
        assert!(!store.try_admit("k", WINDOW));
    }

    #[test]
    fn test_zero_window_always_admits() {
        let store = DedupStore::new();
        assert!(store.try_admit("k", Duration::ZERO));
        assert!(store.try_admit("k", Duration::ZERO));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_forget_allows_readmission() {
        let store = DedupStore::new();
        assert!(store.try_admit("k", WINDOW));
        assert!(store.forget("k"));
        assert!(store.try_admit("k", WINDOW));
        assert!(!store.forget("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = DedupStore::new();
        store.try_admit("short", Duration::from_secs(5));
        store.try_admit("long", WINDOW);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains("long"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_single_winner() {
        let store = Arc::new(DedupStore::new());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.try_admit("same", WINDOW) }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
