//! 通知分发
//!
//! 通知是尽力而为的旁路：失败只记录日志和指标，不向同步任务或退款流程
//! 传播错误，订单状态的写入不会因为邮件发不出去而回滚。

use std::sync::Arc;

use storefront_shared::config::EmailConfig;
use storefront_shared::observability::metrics::record_notification;
use tracing::{info, instrument, warn};

use super::{EmailMessage, EmailSender, NotificationKind, templates};
use crate::models::Order;

/// 分发结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent { message_id: Option<String> },
    /// 买家没有可用的邮箱
    Skipped,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: Arc<dyn EmailSender>,
    from: String,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn EmailSender>, config: &EmailConfig) -> Self {
        Self {
            sender,
            from: format!("{} <{}>", config.from_name, config.from_address),
        }
    }

    fn compose(&self, kind: NotificationKind, order: &Order, to: &str) -> EmailMessage {
        let content = templates::render(kind, order);
        EmailMessage {
            from: self.from.clone(),
            to: to.to_string(),
            subject: content.subject,
            text: content.text,
            html: content.html,
            tags: vec![
                ("kind".to_string(), kind.as_str().to_string()),
                ("order_number".to_string(), order.order_number.clone()),
            ],
        }
    }

    /// 发送一条通知，永不返回错误
    #[instrument(skip(self, order), fields(order_id = %order.id, kind = kind.as_str()))]
    pub async fn notify(&self, kind: NotificationKind, order: &Order) -> DispatchOutcome {
        let recipient = order
            .customer
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| e.contains('@'));

        let outcome = match recipient {
            None => {
                info!("买家没有有效邮箱，跳过通知");
                DispatchOutcome::Skipped
            }
            Some(to) => {
                let message = self.compose(kind, order, to);
                match self.sender.send(&message).await {
                    Ok(receipt) => {
                        info!(
                            provider = receipt.provider,
                            message_id = ?receipt.message_id,
                            "通知已发送"
                        );
                        DispatchOutcome::Sent {
                            message_id: receipt.message_id,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "通知发送失败");
                        DispatchOutcome::Failed(e.to_string())
                    }
                }
            }
        };

        record_notification(kind.as_str(), outcome.as_str());
        outcome
    }
}
