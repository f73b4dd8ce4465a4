//! 订单取消与退款 API

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::dto::{ApiResponse, CancelOrderRequest, CancelOrderResponse};
use crate::error::Result;
use crate::refund::RefundOutcome;
use crate::state::AppState;

/// 取消订单
///
/// POST /api/orders/{id}/cancel
///
/// 已分配承运商订单的先取消承运商侧订单，再写入取消状态并按支付方式退款。
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<ApiResponse<CancelOrderResponse>>> {
    req.validate()?;

    let actor = req.actor;
    let outcome = state.refunds.cancel_order(order_id, req.into()).await?;
    info!(order_id = %order_id, actor = ?actor, "订单取消请求已处理");

    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 重试失败的退款
///
/// POST /api/orders/{id}/refund/retry
pub async fn retry_refund(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<RefundOutcome>>> {
    let outcome = state.refunds.retry_refund(order_id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
