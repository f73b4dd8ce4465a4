//! 内存订单仓储
//!
//! 基于 DashMap，语义与 Postgres 实现一致（过滤条件、排序、不存在时报错），
//! 用于本地联调与集成测试。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::traits::OrderRepository;
use crate::error::{FulfillmentError, Result};
use crate::models::{Order, RefundStatus};

#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<DashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置订单
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let repo = Self::new();
        for order in orders {
            repo.orders.insert(order.id, order);
        }
        repo
    }

    pub fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|o| o.clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

fn awb_matches(order: &Order, awb: &str) -> bool {
    order
        .shipment
        .awb_code
        .as_deref()
        .is_some_and(|code| code.trim() == awb.trim())
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.get(id))
    }

    async fn find_by_awb(&self, awb: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| awb_matches(entry.value(), awb))
            .max_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.value().clone()))
    }

    async fn list_open_shipments(
        &self,
        limit: i64,
        synced_before: DateTime<Utc>,
        max_failures: i32,
    ) -> Result<Vec<Order>> {
        let mut due: Vec<Order> = self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|order| {
                order.status.has_open_shipment()
                    && order.shipment.has_reference()
                    && order.sync.consecutive_failures < max_failures
                    && order
                        .sync
                        .last_synced_at
                        .is_none_or(|at| at < synced_before)
            })
            .collect();

        // None 排在最前
        due.sort_by_key(|o| (o.sync.last_synced_at, o.created_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn list_pending_refunds(&self, limit: i64) -> Result<Vec<Order>> {
        let mut pending: Vec<Order> = self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|order| {
                order
                    .refund
                    .as_ref()
                    .is_some_and(|r| r.status == RefundStatus::Pending)
            })
            .collect();

        pending.sort_by_key(|o| o.updated_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn update(&self, order: &Order) -> Result<()> {
        match self.orders.get_mut(&order.id) {
            Some(mut existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(FulfillmentError::OrderNotFound(order.id.to_string())),
        }
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }
}
