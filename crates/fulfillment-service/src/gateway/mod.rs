//! 支付网关接入
//!
//! 只覆盖退款相关的两个接口：发起退款、查询退款状态。

mod razorpay;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use razorpay::RazorpayGateway;

/// 退款请求
#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    /// 网关侧支付单号
    pub payment_id: String,
    /// 退款金额（最小货币单位）
    pub amount: i64,
    /// 商户侧退款凭据，用订单号，便于对账
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
    /// 同一键的重复请求网关只退款一次
    pub idempotency_key: String,
}

/// 网关侧退款状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayRefundStatus {
    Pending,
    Processed,
    Failed,
}

/// 网关返回的退款单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: Option<String>,
    pub amount: i64,
    pub status: GatewayRefundStatus,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_refund(&self, request: RefundRequest) -> Result<GatewayRefund>;

    async fn fetch_refund(&self, refund_id: &str) -> Result<GatewayRefund>;
}
