//! 退款
//!
//! 资格判定为纯函数（`eligibility`），网关交互与账本写入在 `RefundService`。

pub mod eligibility;
mod service;

pub use eligibility::{RefundDecision, RefundPolicy};
pub use service::{CancelOutcome, CancelRequest, RefundOutcome, RefundService, can_cancel};
