//! 订单取消与退款服务
//!
//! ## 取消流程
//!
//! 1. 参数校验 -> 2. 查询订单 -> 3. 可取消性检查 -> 4. 取消承运商订单
//! -> 5. 写入取消状态 -> 6. 退款 -> 7. 通知买家
//!
//! ## 退款流程
//!
//! 资格判定后按支付方式分支：货到付款记录为线下退款，在线支付调用网关。
//! 网关失败不向上传播，而是记为 Failed 账本等待重试。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use storefront_shared::observability::metrics::{record_refund, record_status_transition};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::eligibility::{self, RefundDecision, RefundPolicy};
use crate::carrier::CarrierClient;
use crate::error::{FulfillmentError, Result};
use crate::gateway::{GatewayRefundStatus, PaymentGateway, RefundRequest};
use crate::models::{
    CancelActor, Cancellation, EventSource, Order, OrderStatus, PaymentStatus, RefundLedger,
    RefundStatus, ShippingEvent,
};
use crate::notification::{NotificationDispatcher, NotificationKind};
use crate::repository::OrderRepository;

/// Razorpay receipt 字段上限
const RECEIPT_MAX_LEN: usize = 40;

/// 取消请求
#[derive(Debug, Clone, PartialEq)]
pub struct CancelRequest {
    pub actor: CancelActor,
    pub reason: String,
}

/// 退款处理结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum RefundOutcome {
    NotRequired,
    NotEligible(String),
    ManualRequired(RefundLedger),
    /// 网关已受理，等待到账
    Initiated(RefundLedger),
    Processed(RefundLedger),
    Failed(RefundLedger),
    AlreadyInitiated(RefundLedger),
}

impl RefundOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::NotEligible(_) => "not_eligible",
            Self::ManualRequired(_) => "manual_required",
            Self::Initiated(_) => "initiated",
            Self::Processed(_) => "processed",
            Self::Failed(_) => "failed",
            Self::AlreadyInitiated(_) => "already_initiated",
        }
    }
}

/// 取消结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub refund: RefundOutcome,
}

/// 取消是否被允许
///
/// 备货阶段任何人可取消；已揽收但尚未进入运输的订单只允许商家和平台取消。
pub fn can_cancel(status: OrderStatus, actor: CancelActor) -> bool {
    match status {
        OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing => true,
        OrderStatus::Shipped => actor.can_cancel_shipped(),
        _ => false,
    }
}

fn receipt_for(order: &Order) -> String {
    order.order_number.chars().take(RECEIPT_MAX_LEN).collect()
}

/// 网关退款成功后的支付状态
fn settled_payment_status(order: &Order, refunded: i64) -> PaymentStatus {
    if refunded >= order.total_amount {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartiallyRefunded
    }
}

pub struct RefundService {
    repo: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    carrier: Arc<dyn CarrierClient>,
    notifier: NotificationDispatcher,
    policy: RefundPolicy,
}

impl RefundService {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        carrier: Arc<dyn CarrierClient>,
        notifier: NotificationDispatcher,
        policy: RefundPolicy,
    ) -> Self {
        Self {
            repo,
            gateway,
            carrier,
            notifier,
            policy,
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order> {
        self.repo
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.to_string()))
    }

    /// 取消订单并处理退款
    #[instrument(skip(self, order_id, request), fields(order_id = %order_id, actor = ?request.actor))]
    pub async fn cancel_order(&self, order_id: Uuid, request: CancelRequest) -> Result<CancelOutcome> {
        // 1. 参数校验
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(FulfillmentError::Validation("取消原因不能为空".to_string()));
        }

        // 2-3. 查询订单并检查是否可取消
        let mut order = self.load(order_id).await?;
        let from = order.status;
        if !can_cancel(from, request.actor) {
            return Err(FulfillmentError::InvalidOrderState {
                order_id: order_id.to_string(),
                current_status: from,
                operation: "cancel",
            });
        }

        // 4. 先取消承运商订单，失败则整体中止，避免包裹继续被揽收
        if let Some(carrier_order_id) = order
            .shipment
            .carrier_order_id
            .clone()
            .filter(|id| !id.trim().is_empty())
        {
            self.carrier
                .cancel_orders(&[carrier_order_id])
                .await
                .inspect_err(|e| warn!(error = %e, "承运商订单取消失败，订单取消中止"))?;
        }

        // 5. 写入取消状态
        let now = Utc::now();
        order.status = OrderStatus::Cancelled;
        order.cancellation = Some(Cancellation {
            actor: request.actor,
            reason: reason.to_string(),
            cancelled_at: now,
        });
        order.append_event(ShippingEvent {
            status: Some(OrderStatus::Cancelled),
            carrier_status: OrderStatus::Cancelled.as_str().to_string(),
            activity: Some(reason.to_string()),
            location: None,
            occurred_at: now,
            source: EventSource::Manual,
        });
        order.touch();
        self.repo.update(&order).await?;
        record_status_transition(from.as_str(), OrderStatus::Cancelled.as_str(), EventSource::Manual.as_str());
        info!(from = %from, "订单已取消");

        // 6. 退款
        let refund = self.process_refund(&mut order).await?;

        // 7. 通知
        self.notifier.notify(NotificationKind::Cancelled, &order).await;

        Ok(CancelOutcome {
            order_id,
            status: order.status,
            refund,
        })
    }

    /// 按资格判定结果处理退款，并把账本写回订单
    ///
    /// 幂等：已有进行中或已完成的退款时直接返回现有账本。
    #[instrument(skip(self, order), fields(order_id = %order.id, method = order.payment.method.as_str()))]
    pub async fn process_refund(&self, order: &mut Order) -> Result<RefundOutcome> {
        let outcome = match eligibility::evaluate(order, &self.policy) {
            RefundDecision::AlreadyInitiated => {
                let ledger = order.refund.clone().ok_or_else(|| {
                    FulfillmentError::Internal("退款账本缺失".to_string())
                })?;
                return Ok(RefundOutcome::AlreadyInitiated(ledger));
            }
            RefundDecision::NotEligible(reason) => {
                warn!(reason = %reason, "订单不满足退款条件");
                RefundOutcome::NotEligible(reason)
            }
            RefundDecision::NotRequired => {
                if order.refund.is_none() {
                    order.refund = Some(self.new_ledger(order, 0, RefundStatus::NotRequired));
                    order.touch();
                    self.repo.update(order).await?;
                }
                RefundOutcome::NotRequired
            }
            RefundDecision::ManualRequired(amount) => {
                let ledger = self.new_ledger(order, amount, RefundStatus::ManualRequired);
                order.refund = Some(ledger.clone());
                order.touch();
                self.repo.update(order).await?;
                warn!(amount, "货到付款订单需要商家线下退款");
                RefundOutcome::ManualRequired(ledger)
            }
            RefundDecision::Gateway { amount } => self.refund_via_gateway(order, amount).await?,
        };

        record_refund(order.payment.method.as_str(), outcome.metric_label());
        Ok(outcome)
    }

    fn new_ledger(&self, order: &Order, amount: i64, status: RefundStatus) -> RefundLedger {
        RefundLedger {
            refund_id: None,
            amount,
            currency: order.currency.clone(),
            status,
            reason: order.cancellation.as_ref().map(|c| c.reason.clone()),
            initiated_at: Utc::now(),
            processed_at: None,
            failure_reason: None,
            attempts: 0,
            idempotency_key: None,
        }
    }

    async fn refund_via_gateway(&self, order: &mut Order, amount: i64) -> Result<RefundOutcome> {
        let previous_attempts = order.refund.as_ref().map(|l| l.attempts).unwrap_or(0);
        if previous_attempts >= self.policy.max_attempts {
            warn!(attempts = previous_attempts, "已达最大退款尝试次数，等待人工处理");
            let ledger = order.refund.clone().ok_or_else(|| {
                FulfillmentError::Internal("退款账本缺失".to_string())
            })?;
            return Ok(RefundOutcome::Failed(ledger));
        }

        // 上面的判定保证支付单号存在
        let payment_id = order.payment.gateway_payment_id.clone().unwrap_or_default();
        let mut notes = BTreeMap::from([("order_id".to_string(), order.id.to_string())]);
        if let Some(cancellation) = &order.cancellation {
            notes.insert("reason".to_string(), cancellation.reason.clone());
        }

        let mut ledger = order
            .refund
            .clone()
            .filter(|l| l.status == RefundStatus::Failed)
            .unwrap_or_else(|| self.new_ledger(order, amount, RefundStatus::Pending));
        ledger.amount = amount;
        ledger.attempts = previous_attempts + 1;
        let attempt = ledger.attempts;
        let idempotency_key = ledger
            .idempotency_key
            .get_or_insert_with(|| format!("{}-{attempt}", order.id))
            .clone();

        let request = RefundRequest {
            payment_id,
            amount,
            receipt: receipt_for(order),
            notes,
            idempotency_key,
        };

        let (outcome, kind) = match self.gateway.create_refund(request).await {
            Ok(refund) => {
                ledger.refund_id = Some(refund.id.clone());
                ledger.amount = refund.amount;
                ledger.failure_reason = None;
                match refund.status {
                    GatewayRefundStatus::Processed => {
                        ledger.status = RefundStatus::Processed;
                        ledger.processed_at = Some(Utc::now());
                        order.payment.status = settled_payment_status(order, refund.amount);
                        info!(refund_id = %refund.id, amount = refund.amount, "退款已完成");
                        (RefundOutcome::Processed(ledger.clone()), NotificationKind::RefundProcessed)
                    }
                    GatewayRefundStatus::Pending => {
                        ledger.status = RefundStatus::Pending;
                        order.payment.status = PaymentStatus::RefundPending;
                        info!(refund_id = %refund.id, amount = refund.amount, "退款已提交网关");
                        (RefundOutcome::Initiated(ledger.clone()), NotificationKind::RefundInitiated)
                    }
                    GatewayRefundStatus::Failed => {
                        ledger.status = RefundStatus::Failed;
                        ledger.failure_reason = Some("网关拒绝退款".to_string());
                        ledger.idempotency_key = None;
                        warn!(refund_id = %refund.id, "网关返回退款失败");
                        (RefundOutcome::Failed(ledger.clone()), NotificationKind::RefundFailed)
                    }
                }
            }
            Err(e) => {
                error!(error = %e, attempts = ledger.attempts, "网关退款调用失败");
                ledger.status = RefundStatus::Failed;
                ledger.failure_reason = Some(e.to_string());
                // 网关明确拒绝才换新键；超时等结果未知的失败沿用原键重发
                if matches!(e, FulfillmentError::Gateway { status: Some(_), .. }) && !e.is_retryable() {
                    ledger.idempotency_key = None;
                }
                (RefundOutcome::Failed(ledger.clone()), NotificationKind::RefundFailed)
            }
        };

        order.refund = Some(ledger);
        order.touch();
        self.repo.update(order).await?;
        self.notifier.notify(kind, order).await;

        Ok(outcome)
    }

    /// 重新发起失败的退款
    #[instrument(skip(self))]
    pub async fn retry_refund(&self, order_id: Uuid) -> Result<RefundOutcome> {
        let mut order = self.load(order_id).await?;

        let Some(ledger) = order.refund.as_ref() else {
            return Err(FulfillmentError::RefundNotEligible("订单没有退款记录".to_string()));
        };
        if ledger.status != RefundStatus::Failed {
            return Err(FulfillmentError::RefundNotEligible(format!(
                "只有失败的退款可以重试，当前状态: {}",
                ledger.status.as_str()
            )));
        }
        if ledger.attempts >= self.policy.max_attempts {
            return Err(FulfillmentError::RefundNotEligible(format!(
                "已达最大退款尝试次数: {}",
                ledger.attempts
            )));
        }

        self.process_refund(&mut order).await
    }

    /// 向网关查询 Pending 退款的结果
    ///
    /// 返回更新后的账本状态；仍在处理中时返回 None。
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn reconcile_refund(&self, order: &mut Order) -> Result<Option<RefundStatus>> {
        let Some(refund_id) = order
            .refund
            .as_ref()
            .filter(|l| l.status == RefundStatus::Pending)
            .and_then(|l| l.refund_id.clone())
        else {
            return Ok(None);
        };

        let refund = self.gateway.fetch_refund(&refund_id).await?;
        let kind = match refund.status {
            GatewayRefundStatus::Pending => return Ok(None),
            GatewayRefundStatus::Processed => NotificationKind::RefundProcessed,
            GatewayRefundStatus::Failed => NotificationKind::RefundFailed,
        };

        let new_status = {
            let payment_status = settled_payment_status(order, refund.amount);
            let Some(ledger) = order.refund.as_mut() else {
                return Ok(None);
            };
            if refund.status == GatewayRefundStatus::Processed {
                ledger.status = RefundStatus::Processed;
                ledger.processed_at = Some(Utc::now());
                ledger.amount = refund.amount;
                order.payment.status = payment_status;
            } else {
                ledger.status = RefundStatus::Failed;
                ledger.failure_reason = Some("网关处理退款失败".to_string());
                order.payment.status = PaymentStatus::Paid;
            }
            ledger.status
        };

        order.touch();
        self.repo.update(order).await?;
        record_refund(order.payment.method.as_str(), new_status.as_str());
        info!(refund_id = %refund_id, status = new_status.as_str(), "退款状态已更新");
        self.notifier.notify(kind, order).await;

        Ok(Some(new_status))
    }
}
