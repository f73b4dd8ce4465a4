//! 买家通知
//!
//! 订单状态变化和退款结果通过邮件告知买家。发送通过 `EmailSender` trait 抽象，
//! 生产环境调用邮件服务商的 HTTP API，开发环境只记录日志。

mod dispatcher;
mod sender;
pub mod templates;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::OrderStatus;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use sender::{HttpEmailSender, LogEmailSender};
pub use templates::EmailContent;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderShipped,
    OutForDelivery,
    Delivered,
    DeliveryAttemptFailed,
    ReturnInitiated,
    Returned,
    Cancelled,
    ShipmentLost,
    RefundInitiated,
    RefundProcessed,
    RefundFailed,
}

impl NotificationKind {
    /// 物流状态变化对应的通知类型
    pub fn from_transition(to: OrderStatus) -> Option<Self> {
        match to {
            OrderStatus::Shipped => Some(Self::OrderShipped),
            OrderStatus::OutForDelivery => Some(Self::OutForDelivery),
            OrderStatus::Delivered => Some(Self::Delivered),
            OrderStatus::Undelivered => Some(Self::DeliveryAttemptFailed),
            OrderStatus::RtoInitiated => Some(Self::ReturnInitiated),
            OrderStatus::Returned => Some(Self::Returned),
            OrderStatus::Cancelled => Some(Self::Cancelled),
            OrderStatus::Lost => Some(Self::ShipmentLost),
            OrderStatus::Pending
            | OrderStatus::Confirmed
            | OrderStatus::Processing
            | OrderStatus::InTransit => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderShipped => "order_shipped",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::DeliveryAttemptFailed => "delivery_attempt_failed",
            Self::ReturnInitiated => "return_initiated",
            Self::Returned => "returned",
            Self::Cancelled => "cancelled",
            Self::ShipmentLost => "shipment_lost",
            Self::RefundInitiated => "refund_initiated",
            Self::RefundProcessed => "refund_processed",
            Self::RefundFailed => "refund_failed",
        }
    }
}

/// 待发送的邮件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    /// 业务标签，便于在服务商后台检索
    pub tags: Vec<(String, String)>,
}

/// 发送回执
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub provider: &'static str,
    /// 服务商返回的消息标识
    pub message_id: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt>;

    fn provider(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_notified_status_has_a_kind() {
        for status in OrderStatus::ALL {
            assert_eq!(
                crate::status_mapper::should_notify(status),
                NotificationKind::from_transition(status).is_some(),
                "{status}"
            );
        }
    }
}
