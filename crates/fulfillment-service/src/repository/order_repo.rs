//! 订单仓储（Postgres）
//!
//! 订单的嵌套部分（买家、运单、轨迹、退款账本、取消记录）以 JSONB 保存；
//! 同步任务与退款轮询需要过滤的字段（状态、AWB、同步时间、退款状态）
//! 另外冗余为普通列并建索引。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::traits::OrderRepository;
use crate::error::{FulfillmentError, Result};
use crate::models::{
    Cancellation, CustomerContact, Order, OrderStatus, PaymentInfo, PaymentMethod, PaymentStatus,
    RefundLedger, RefundStatus, ShipmentInfo, ShippingEvent, SyncState,
};

const ORDER_COLUMNS: &str = r#"
    id, order_number, vendor_id, customer, status,
    payment_method, payment_status, gateway_payment_id,
    total_amount, currency, shipment, shipping_history,
    refund, cancellation, last_synced_at, sync_failures, last_sync_error,
    created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    vendor_id: String,
    customer: Json<CustomerContact>,
    status: OrderStatus,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    gateway_payment_id: Option<String>,
    total_amount: i64,
    currency: String,
    shipment: Json<ShipmentInfo>,
    shipping_history: Json<Vec<ShippingEvent>>,
    refund: Option<Json<RefundLedger>>,
    cancellation: Option<Json<Cancellation>>,
    last_synced_at: Option<DateTime<Utc>>,
    sync_failures: i32,
    last_sync_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            order_number: row.order_number,
            vendor_id: row.vendor_id,
            customer: row.customer.0,
            status: row.status,
            payment: PaymentInfo {
                method: row.payment_method,
                status: row.payment_status,
                gateway_payment_id: row.gateway_payment_id,
            },
            total_amount: row.total_amount,
            currency: row.currency,
            shipment: row.shipment.0,
            shipping_history: row.shipping_history.0,
            refund: row.refund.map(|r| r.0),
            cancellation: row.cancellation.map(|c| c.0),
            sync: SyncState {
                last_synced_at: row.last_synced_at,
                consecutive_failures: row.sync_failures,
                last_error: row.last_sync_error,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 订单仓储
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn open_statuses() -> Vec<String> {
        OrderStatus::ALL
            .into_iter()
            .filter(OrderStatus::has_open_shipment)
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Order::from))
    }

    async fn find_by_awb(&self, awb: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE awb_code = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(awb.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Order::from))
    }

    async fn list_open_shipments(
        &self,
        limit: i64,
        synced_before: DateTime<Utc>,
        max_failures: i32,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE status = ANY($1)
              AND (last_synced_at IS NULL OR last_synced_at < $2)
              AND sync_failures < $3
              AND (
                    awb_code IS NOT NULL
                 OR NULLIF(shipment->>'carrier_shipment_id', '') IS NOT NULL
                 OR NULLIF(shipment->>'carrier_order_id', '') IS NOT NULL
              )
            ORDER BY last_synced_at ASC NULLS FIRST, created_at ASC
            LIMIT $4
            "#
        ))
        .bind(Self::open_statuses())
        .bind(synced_before)
        .bind(max_failures)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Order::from).collect())
    }

    async fn list_pending_refunds(&self, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE refund_status = $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#
        ))
        .bind(RefundStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Order::from).collect())
    }

    async fn update(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                payment_status = $3,
                gateway_payment_id = $4,
                awb_code = $5,
                shipment = $6,
                shipping_history = $7,
                refund = $8,
                refund_status = $9,
                cancellation = $10,
                last_synced_at = $11,
                sync_failures = $12,
                last_sync_error = $13,
                updated_at = $14
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status)
        .bind(order.payment.status)
        .bind(&order.payment.gateway_payment_id)
        .bind(order.shipment.awb_code.as_deref().map(str::trim))
        .bind(Json(&order.shipment))
        .bind(Json(&order.shipping_history))
        .bind(order.refund.as_ref().map(Json))
        .bind(order.refund.as_ref().map(|r| r.status.as_str()))
        .bind(order.cancellation.as_ref().map(Json))
        .bind(order.sync.last_synced_at)
        .bind(order.sync.consecutive_failures)
        .bind(&order.sync.last_error)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FulfillmentError::OrderNotFound(order.id.to_string()));
        }
        Ok(())
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, vendor_id, customer, status,
                payment_method, payment_status, gateway_payment_id,
                total_amount, currency, awb_code, shipment, shipping_history,
                refund, refund_status, cancellation,
                last_synced_at, sync_failures, last_sync_error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(&order.vendor_id)
        .bind(Json(&order.customer))
        .bind(order.status)
        .bind(order.payment.method)
        .bind(order.payment.status)
        .bind(&order.payment.gateway_payment_id)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(order.shipment.awb_code.as_deref().map(str::trim))
        .bind(Json(&order.shipment))
        .bind(Json(&order.shipping_history))
        .bind(order.refund.as_ref().map(Json))
        .bind(order.refund.as_ref().map(|r| r.status.as_str()))
        .bind(order.cancellation.as_ref().map(Json))
        .bind(order.sync.last_synced_at)
        .bind(order.sync.consecutive_failures)
        .bind(&order.sync.last_error)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
