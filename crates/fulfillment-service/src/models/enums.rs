//! 订单域枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 订单状态（内部）
///
/// 与承运商上报的状态文本相互独立，承运商状态经 status_mapper 映射后才会写入。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 待支付 / 待确认
    #[default]
    Pending,
    /// 已确认
    Confirmed,
    /// 商家备货中（可能已分配运单号，尚未揽收）
    Processing,
    /// 已揽收发出
    Shipped,
    /// 运输中
    InTransit,
    /// 派送中
    OutForDelivery,
    /// 已签收
    Delivered,
    /// 派送失败，等待再次派送
    Undelivered,
    /// 拒收/无法派送，退回发件人（RTO）
    RtoInitiated,
    /// 已退回商家
    Returned,
    /// 已取消
    Cancelled,
    /// 承运商确认丢件
    Lost,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        Self::Pending,
        Self::Confirmed,
        Self::Processing,
        Self::Shipped,
        Self::InTransit,
        Self::OutForDelivery,
        Self::Delivered,
        Self::Undelivered,
        Self::RtoInitiated,
        Self::Returned,
        Self::Cancelled,
        Self::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::InTransit => "IN_TRANSIT",
            Self::OutForDelivery => "OUT_FOR_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::Undelivered => "UNDELIVERED",
            Self::RtoInitiated => "RTO_INITIATED",
            Self::Returned => "RETURNED",
            Self::Cancelled => "CANCELLED",
            Self::Lost => "LOST",
        }
    }

    /// 终态订单不再接受物流状态更新
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::Returned | Self::Cancelled | Self::Lost
        )
    }

    /// 是否存在需要跟踪的在途运单
    pub fn has_open_shipment(&self) -> bool {
        matches!(
            self,
            Self::Confirmed
                | Self::Processing
                | Self::Shipped
                | Self::InTransit
                | Self::OutForDelivery
                | Self::Undelivered
                | Self::RtoInitiated
        )
    }

    /// 正向履约链路上的进度，用于拒绝过期的轨迹回放
    ///
    /// 覆盖 Pending..=Delivered 整条正向链路，逆向和异常状态返回 None。
    pub fn progress_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Processing => Some(2),
            Self::Shipped => Some(3),
            Self::InTransit => Some(4),
            Self::OutForDelivery => Some(5),
            Self::Delivered => Some(6),
            Self::Undelivered | Self::RtoInitiated | Self::Returned | Self::Cancelled | Self::Lost => {
                None
            }
        }
    }

    /// 包裹是否已离开商家
    pub fn is_past_pickup(&self) -> bool {
        matches!(
            self,
            Self::Shipped
                | Self::InTransit
                | Self::OutForDelivery
                | Self::Delivered
                | Self::Undelivered
                | Self::RtoInitiated
                | Self::Returned
                | Self::Lost
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析失败的状态名
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("未知的订单状态: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    /// 大小写、`-`、空格不敏感：`in-transit`、`In Transit`、`IN_TRANSIT` 等价
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// 支付方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// 货到付款
    Cod,
    /// 在线支付（经支付网关）
    Prepaid,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cod => "cod",
            Self::Prepaid => "prepaid",
        }
    }
}

/// 支付状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    /// 退款已提交网关，等待到账
    RefundPending,
    Refunded,
    PartiallyRefunded,
}

/// 退款账本状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    /// 已提交网关，等待处理结果
    Pending,
    /// 网关确认已退款
    Processed,
    /// 网关调用失败或网关拒绝
    Failed,
    /// 无需退款（如未付款的货到付款订单）
    NotRequired,
    /// 需人工线下退款（货到付款已收款）
    ManualRequired,
}

impl RefundStatus {
    /// 已发起且不应重复发起
    pub fn is_settled_or_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Processed | Self::ManualRequired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::NotRequired => "not_required",
            Self::ManualRequired => "manual_required",
        }
    }
}

/// 取消操作发起方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelActor {
    Customer,
    Vendor,
    Admin,
    /// 系统自动取消（如支付超时）
    System,
}

impl CancelActor {
    /// 商家和平台可以在揽收后、运输前取消
    pub fn can_cancel_shipped(&self) -> bool {
        matches!(self, Self::Vendor | Self::Admin)
    }
}

/// 物流轨迹来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    /// 定时同步任务主动拉取
    Sync,
    /// 承运商回调推送
    Webhook,
    /// 后台人工操作（取消等）
    Manual,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Webhook => "webhook",
            Self::Manual => "manual",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str_is_lenient() {
        assert_eq!("in-transit".parse::<OrderStatus>(), Ok(OrderStatus::InTransit));
        assert_eq!("Out For Delivery".parse::<OrderStatus>(), Ok(OrderStatus::OutForDelivery));
        assert_eq!("RTO_INITIATED".parse::<OrderStatus>(), Ok(OrderStatus::RtoInitiated));
        assert!("teleported".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_as_str() {
        for status in OrderStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::Value::String(status.as_str().to_string()));
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_open_shipment() {
        for status in OrderStatus::ALL {
            if status.is_terminal() {
                assert!(!status.has_open_shipment(), "{status} 不应再被跟踪");
            }
        }
    }

    #[test]
    fn test_progress_rank_spans_forward_chain() {
        let chain = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::InTransit,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ];
        let ranks: Vec<u8> = chain.iter().filter_map(|s| s.progress_rank()).collect();
        assert_eq!(ranks.len(), chain.len());
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));

        for status in [
            OrderStatus::Undelivered,
            OrderStatus::RtoInitiated,
            OrderStatus::Returned,
            OrderStatus::Cancelled,
            OrderStatus::Lost,
        ] {
            assert_eq!(status.progress_rank(), None);
        }
    }

    #[test]
    fn test_refund_in_flight() {
        assert!(RefundStatus::Pending.is_settled_or_in_flight());
        assert!(RefundStatus::Processed.is_settled_or_in_flight());
        assert!(!RefundStatus::Failed.is_settled_or_in_flight());
        assert!(!RefundStatus::NotRequired.is_settled_or_in_flight());
    }
}
