//! 仓储 Trait 定义

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::Order;

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;

    async fn find_by_awb(&self, awb: &str) -> Result<Option<Order>>;

    /// 待同步的在途订单
    ///
    /// 只返回持有承运商标识、上次同步早于 `synced_before`（或从未同步）、
    /// 连续失败次数低于 `max_failures` 的订单，最久未同步的排在前面。
    async fn list_open_shipments(
        &self,
        limit: i64,
        synced_before: DateTime<Utc>,
        max_failures: i32,
    ) -> Result<Vec<Order>>;

    /// 退款处于 Pending、需要向网关查询结果的订单
    async fn list_pending_refunds(&self, limit: i64) -> Result<Vec<Order>>;

    /// 整单覆盖写入，后写入者覆盖先写入者
    async fn update(&self, order: &Order) -> Result<()>;

    async fn insert(&self, order: &Order) -> Result<()>;
}
