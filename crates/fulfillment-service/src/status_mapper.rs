//! 承运商状态映射
//!
//! 把 Shiprocket 上报的状态（数字状态码或状态文本）翻译为内部订单状态，
//! 并判断一次状态变化是否合法、是否需要通知买家。这里全部是纯函数，
//! 不做任何 IO。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::models::{OrderStatus, UnknownStatus};

/// 按 Shiprocket 数字状态码映射
///
/// 仓内作业类状态（装箱、拣货等）统一视为备货中。
fn map_status_code(code: i64) -> Option<OrderStatus> {
    use OrderStatus::*;

    let status = match code {
        1..=5 | 11 | 13 | 15 | 19 | 20 | 52 | 59..=63 | 67 | 68 | 71 | 72 => Processing,
        6 | 42 | 51 => Shipped,
        18 | 22 | 38 | 39 | 48..=50 | 54..=57 => InTransit,
        17 => OutForDelivery,
        7 | 23 | 26 | 43 => Delivered,
        21 | 77 => Undelivered,
        9 | 14 | 40 | 41 | 46 | 75 | 78 => RtoInitiated,
        10 => Returned,
        8 | 45 => Cancelled,
        12 | 24 | 44 => Lost,
        _ => return None,
    };
    Some(status)
}

/// 状态文本归一化：大写，非字母数字字符折叠为单个空格
///
/// `Out-For-Delivery`、`out_for_delivery`、` OUT FOR  DELIVERY ` 归一化结果相同。
pub fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn map_status_text(normalized: &str) -> Option<OrderStatus> {
    use OrderStatus::*;

    let status = match normalized {
        "NEW" | "AWB ASSIGNED" | "LABEL GENERATED" | "PICKUP SCHEDULED" | "PICKUP GENERATED"
        | "PICKUP QUEUED" | "MANIFEST GENERATED" | "OUT FOR PICKUP" | "PICKUP RESCHEDULED"
        | "PICKUP EXCEPTION" | "PICKUP ERROR" | "READY TO SHIP" => Processing,
        "SHIPPED" | "PICKED UP" | "HANDOVER TO COURIER" | "DISPATCHED" => Shipped,
        "IN TRANSIT" | "REACHED AT DESTINATION HUB" | "REACHED DESTINATION HUB" | "DELAYED"
        | "MISROUTED" | "IN FLIGHT" | "REACHED WAREHOUSE" => InTransit,
        "OUT FOR DELIVERY" => OutForDelivery,
        "DELIVERED" | "PARTIAL DELIVERED" | "FULFILLED" => Delivered,
        "UNDELIVERED" | "NDR" | "FAILED DELIVERY" | "DELIVERY FAILED" => Undelivered,
        "RTO INITIATED" | "RTO IN TRANSIT" | "RTO NDR" | "RTO OFD" | "RTO ACKNOWLEDGED" => {
            RtoInitiated
        }
        "RTO DELIVERED" | "RTO RECEIVED" | "RETURNED" => Returned,
        "CANCELED" | "CANCELLED" | "CANCELLED BEFORE DISPATCHED" => Cancelled,
        "LOST" | "DESTROYED" | "DISPOSED OFF" => Lost,
        // 内部状态名本身也接受（如手工推送的 OUT_FOR_DELIVERY）
        other => return OrderStatus::from_str(other).ok(),
    };
    Some(status)
}

/// 承运商状态映射为内部状态
///
/// 优先使用数字状态码，状态码缺失或未知时再按文本匹配。无法识别返回 None，
/// 调用方应只记录轨迹而不改变订单状态。
pub fn map_carrier_status(code: Option<i64>, text: &str) -> Option<OrderStatus> {
    code.and_then(map_status_code)
        .or_else(|| map_status_text(&normalize(text)))
}

/// 带配置覆盖的状态映射器
///
/// 覆盖规则按归一化后的状态文本匹配，优先级高于内置映射表，
/// 用于承运商新增状态文本时无需发版即可修正。
#[derive(Debug, Clone, Default)]
pub struct StatusMapper {
    overrides: HashMap<String, OrderStatus>,
}

impl StatusMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置加载覆盖规则，目标状态名非法时报错
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self, UnknownStatus> {
        let overrides = overrides
            .iter()
            .map(|(carrier_text, target)| Ok((normalize(carrier_text), target.parse()?)))
            .collect::<Result<HashMap<_, _>, UnknownStatus>>()?;
        Ok(Self { overrides })
    }

    pub fn map(&self, code: Option<i64>, text: &str) -> Option<OrderStatus> {
        self.overrides
            .get(&normalize(text))
            .copied()
            .or_else(|| map_carrier_status(code, text))
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

/// 拒绝状态变化的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 订单已处于终态
    Terminal,
    /// 过期的轨迹回放（状态倒退）
    Stale,
    /// 状态机不允许的跳转
    NotAllowed,
}

impl Serialize for RejectReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Terminal => "terminal_state",
            Self::Stale => "stale_update",
            Self::NotAllowed => "transition_not_allowed",
        })
    }
}

/// 状态变化评估结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply {
        from: OrderStatus,
        to: OrderStatus,
        notify: bool,
    },
    Unchanged,
    Rejected(RejectReason),
}

/// 评估从 current 变为 mapped 是否合法
///
/// 规则：
/// - 终态不再被物流状态改变；
/// - 正向链路 Shipped < InTransit < OutForDelivery < Delivered 只进不退；
/// - 派送失败后可以重新进入运输或派送；
/// - 逆向链路只能走向 Returned；
/// - Returned / Lost / Cancelled 可以从任意非终态进入。
pub fn evaluate_transition(current: OrderStatus, mapped: OrderStatus) -> Transition {
    use OrderStatus::*;

    if current == mapped {
        return Transition::Unchanged;
    }
    if current.is_terminal() {
        return Transition::Rejected(RejectReason::Terminal);
    }

    let allowed = match (current, mapped) {
        (_, Returned | Lost | Cancelled) => Ok(()),
        // 承运商不会把订单推回待支付 / 待确认
        (_, Pending | Confirmed) => Err(RejectReason::NotAllowed),
        // 退回途中的正向扫描是噪音
        (RtoInitiated, _) => Err(RejectReason::Stale),
        (Undelivered, InTransit | OutForDelivery | Delivered | RtoInitiated) => Ok(()),
        (Undelivered, _) => Err(RejectReason::Stale),
        (from, Undelivered | RtoInitiated) => {
            if from.is_past_pickup() {
                Ok(())
            } else {
                Err(RejectReason::NotAllowed)
            }
        }
        (from, to) => match (from.progress_rank(), to.progress_rank()) {
            (Some(a), Some(b)) if b > a => Ok(()),
            (Some(_), Some(_)) => Err(RejectReason::Stale),
            _ => Err(RejectReason::NotAllowed),
        },
    };

    match allowed {
        Ok(()) => Transition::Apply {
            from: current,
            to: mapped,
            notify: should_notify(mapped),
        },
        Err(reason) => Transition::Rejected(reason),
    }
}

/// 进入该状态时是否需要通知买家
pub fn should_notify(to: OrderStatus) -> bool {
    matches!(
        to,
        OrderStatus::Shipped
            | OrderStatus::OutForDelivery
            | OrderStatus::Delivered
            | OrderStatus::Undelivered
            | OrderStatus::RtoInitiated
            | OrderStatus::Returned
            | OrderStatus::Cancelled
            | OrderStatus::Lost
    )
}
