//! 订单模型
//!
//! 订单来自店铺的文档库，运单、物流轨迹、退款账本等嵌套部分在 Postgres 中
//! 以 JSONB 列保存。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    CancelActor, EventSource, OrderStatus, PaymentMethod, PaymentStatus, RefundStatus,
};

/// 买家联系信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// 支付信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// 支付网关侧的支付单号（如 Razorpay 的 pay_xxx）
    pub gateway_payment_id: Option<String>,
}

/// 承运商运单信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentInfo {
    pub awb_code: Option<String>,
    pub carrier_shipment_id: Option<String>,
    pub carrier_order_id: Option<String>,
    pub courier_name: Option<String>,
    /// 承运商最近一次上报的原始状态文本
    pub last_carrier_status: Option<String>,
    /// 预计送达时间
    pub etd: Option<DateTime<Utc>>,
}

impl ShipmentInfo {
    /// 是否持有任一可用于查询轨迹的承运商标识
    pub fn has_reference(&self) -> bool {
        [&self.awb_code, &self.carrier_shipment_id, &self.carrier_order_id]
            .iter()
            .any(|id| id.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// 物流轨迹条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingEvent {
    /// 映射后的内部状态，无法识别的承运商状态为 None
    pub status: Option<OrderStatus>,
    pub carrier_status: String,
    pub activity: Option<String>,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub source: EventSource,
}

impl ShippingEvent {
    /// 去重键：同一时刻的同一承运商状态只记录一次
    fn same_scan(&self, other: &ShippingEvent) -> bool {
        self.occurred_at == other.occurred_at
            && self.carrier_status.eq_ignore_ascii_case(&other.carrier_status)
    }
}

/// 退款账本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundLedger {
    /// 网关退款单号（如 rfnd_xxx）
    pub refund_id: Option<String>,
    /// 退款金额（最小货币单位）
    pub amount: i64,
    pub currency: String,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// 已向网关发起的次数
    pub attempts: u32,
    /// 网关幂等键；结果未知的失败保留原键，重发时网关不会重复退款
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// 取消记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub actor: CancelActor,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// 同步任务簿记
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_synced_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub last_error: Option<String>,
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub vendor_id: String,
    pub customer: CustomerContact,
    pub status: OrderStatus,
    pub payment: PaymentInfo,
    /// 订单总额（最小货币单位，如 paise）
    pub total_amount: i64,
    pub currency: String,
    pub shipment: ShipmentInfo,
    pub shipping_history: Vec<ShippingEvent>,
    pub refund: Option<RefundLedger>,
    pub cancellation: Option<Cancellation>,
    pub sync: SyncState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        order_number: impl Into<String>,
        vendor_id: impl Into<String>,
        customer: CustomerContact,
        method: PaymentMethod,
        total_amount: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_number: order_number.into(),
            vendor_id: vendor_id.into(),
            customer,
            status: OrderStatus::Confirmed,
            payment: PaymentInfo {
                method,
                status: PaymentStatus::Pending,
                gateway_payment_id: None,
            },
            total_amount,
            currency: "INR".to_string(),
            shipment: ShipmentInfo::default(),
            shipping_history: Vec::new(),
            refund: None,
            cancellation: None,
            sync: SyncState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    /// 标记为已通过网关支付
    pub fn paid_via(mut self, gateway_payment_id: impl Into<String>) -> Self {
        self.payment.status = PaymentStatus::Paid;
        self.payment.gateway_payment_id = Some(gateway_payment_id.into());
        self
    }

    pub fn with_shipment(mut self, shipment: ShipmentInfo) -> Self {
        self.shipment = shipment;
        self
    }

    /// 追加物流轨迹，已存在相同扫描记录时返回 false
    ///
    /// 轨迹按发生时间保持升序，承运商乱序推送时也能正确插入。
    pub fn append_event(&mut self, event: ShippingEvent) -> bool {
        if self.shipping_history.iter().any(|e| e.same_scan(&event)) {
            return false;
        }
        let pos = self
            .shipping_history
            .partition_point(|e| e.occurred_at <= event.occurred_at);
        self.shipping_history.insert(pos, event);
        true
    }

    /// 是否曾经离开商家（用于判断退款是否扣除逆向运费）
    pub fn was_shipped(&self) -> bool {
        self.status.is_past_pickup()
            || self
                .shipping_history
                .iter()
                .any(|e| e.status.is_some_and(|s| s.is_past_pickup()))
    }

    /// 尚未退还的金额
    pub fn refundable_balance(&self) -> i64 {
        let refunded = self
            .refund
            .as_ref()
            .filter(|l| l.status == RefundStatus::Processed)
            .map(|l| l.amount)
            .unwrap_or(0);
        (self.total_amount - refunded).max(0)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
