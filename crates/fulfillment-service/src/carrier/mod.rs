//! 物流承运商接入
//!
//! `CarrierClient` 抽象承运商的轨迹查询与取消接口，`ShiprocketClient` 为生产实现。
//! 同步任务不直接调用客户端，而是通过 `TrackingLookup` 按 AWB、运单号、
//! 承运商订单号依次回退查询，并经 `TrackingCache` 合并重复请求。

mod cache;
pub mod dto;
mod lookup;
mod shiprocket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use cache::TrackingCache;
pub use lookup::{LookupOutcome, LookupVia, TrackingLookup};
pub use shiprocket::ShiprocketClient;

/// 单条轨迹扫描
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingActivity {
    pub occurred_at: DateTime<Utc>,
    /// 承运商状态文本（如 `PICKED UP`）
    pub status_text: String,
    pub status_code: Option<i64>,
    pub activity: Option<String>,
    pub location: Option<String>,
}

/// 一次轨迹查询的结果快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub awb_code: Option<String>,
    /// 当前承运商状态文本
    pub carrier_status: String,
    /// Shiprocket 数字状态码
    pub status_code: Option<i64>,
    pub courier_name: Option<String>,
    pub etd: Option<DateTime<Utc>>,
    /// 扫描记录，顺序不保证
    pub activities: Vec<TrackingActivity>,
}

/// 承运商客户端
///
/// 轨迹查询返回 `Ok(None)` 表示承运商尚无该运单的轨迹数据。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CarrierClient: Send + Sync {
    async fn track_by_awb(&self, awb: &str) -> Result<Option<TrackingSnapshot>>;

    async fn track_by_shipment_id(&self, shipment_id: &str) -> Result<Option<TrackingSnapshot>>;

    async fn track_by_order_id(&self, order_id: &str) -> Result<Option<TrackingSnapshot>>;

    /// 取消承运商侧订单（未揽收前）
    async fn cancel_orders(&self, carrier_order_ids: &[String]) -> Result<()>;
}
