//! 退款资格判定
//!
//! 纯函数，根据订单与支付状态决定退款路径，不做任何 IO。

use storefront_shared::config::RefundConfig;

use crate::models::{Order, OrderStatus, PaymentMethod, PaymentStatus};

/// 退款策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    /// 发货后退回的订单扣除的逆向运费
    pub return_shipping_fee: i64,
    /// 向网关发起退款的最大次数
    pub max_attempts: u32,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::from(&RefundConfig::default())
    }
}

impl From<&RefundConfig> for RefundPolicy {
    fn from(config: &RefundConfig) -> Self {
        Self {
            return_shipping_fee: config.return_shipping_fee.max(0),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundDecision {
    /// 已有进行中或已完成的退款
    AlreadyInitiated,
    /// 无需退款
    NotRequired,
    /// 货到付款已收款，需商家线下退款
    ManualRequired(i64),
    /// 不满足退款条件
    NotEligible(String),
    /// 通过支付网关退款
    Gateway { amount: i64 },
}

/// 应退金额：未退余额，发货后被退回的订单扣除逆向运费
fn refund_amount(order: &Order, policy: &RefundPolicy) -> i64 {
    let balance = order.refundable_balance();
    if order.status == OrderStatus::Returned && order.was_shipped() {
        (balance - policy.return_shipping_fee).max(0)
    } else {
        balance
    }
}

pub fn evaluate(order: &Order, policy: &RefundPolicy) -> RefundDecision {
    if order
        .refund
        .as_ref()
        .is_some_and(|ledger| ledger.status.is_settled_or_in_flight())
    {
        return RefundDecision::AlreadyInitiated;
    }

    match order.payment.method {
        PaymentMethod::Cod => {
            if order.payment.status == PaymentStatus::Paid {
                match refund_amount(order, policy) {
                    0 => RefundDecision::NotRequired,
                    amount => RefundDecision::ManualRequired(amount),
                }
            } else {
                RefundDecision::NotRequired
            }
        }
        PaymentMethod::Prepaid => {
            if !matches!(
                order.payment.status,
                PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
            ) {
                return RefundDecision::NotEligible(format!(
                    "支付状态为 {:?}，没有可退的款项",
                    order.payment.status
                ));
            }
            if order
                .payment
                .gateway_payment_id
                .as_deref()
                .is_none_or(|id| id.trim().is_empty())
            {
                return RefundDecision::NotEligible("缺少网关支付单号".to_string());
            }

            match refund_amount(order, policy) {
                0 => RefundDecision::NotRequired,
                amount => RefundDecision::Gateway { amount },
            }
        }
    }
}
