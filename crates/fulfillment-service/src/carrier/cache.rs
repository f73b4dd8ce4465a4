//! 轨迹查询缓存
//!
//! 承运商回调与定时任务经常在几秒内查询同一运单。缓存按查询标识保存结果，
//! 并对同一标识的并发查询加锁，只有第一个调用方真正访问承运商，其余调用方
//! 等待后直接读取缓存结果。错误不缓存。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::TrackingSnapshot;
use crate::error::Result;

#[derive(Clone)]
struct CacheEntry {
    value: Option<TrackingSnapshot>,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct TrackingCache {
    ttl: Duration,
    entries: Arc<DashMap<String, CacheEntry>>,
    in_flight: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TrackingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    fn fresh(&self, key: &str) -> Option<Option<TrackingSnapshot>> {
        let entry = self.entries.get(key)?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| entry.value.clone())
    }

    /// 读取缓存，未命中时调用 `fetch` 并写入缓存
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Option<TrackingSnapshot>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<TrackingSnapshot>>>,
    {
        if let Some(hit) = self.fresh(key) {
            debug!(key, "轨迹缓存命中");
            return Ok(hit);
        }

        let lock = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            // 等锁期间其他调用方可能已经查询完成
            if let Some(hit) = self.fresh(key) {
                debug!(key, "并发查询已完成，复用结果");
                Ok(hit)
            } else {
                let fetched = fetch().await;
                if let Ok(value) = &fetched {
                    self.entries.insert(
                        key.to_string(),
                        CacheEntry {
                            value: value.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                fetched
            }
        };

        // 只剩映射表和当前调用方持有时清理锁
        self.in_flight
            .remove_if(key, |_, l| Arc::strong_count(l) <= 2);
        result
    }

    /// 主动失效（如 webhook 已推送了更新的状态）
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// 清理过期条目
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let fresh = entry.fetched_at.elapsed() < self.ttl;
            if !fresh {
                removed += 1;
            }
            fresh
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
