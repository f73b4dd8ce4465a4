//! 承运商推送
//!
//! Shiprocket 通过 `x-api-key` 头携带共享令牌推送运单状态。
//! 找不到对应订单时仍返回 200，否则承运商会无限重试。

use axum::{Json, extract::State, http::HeaderMap};
use tracing::{info, warn};

use crate::carrier::dto::WebhookPayload;
use crate::dto::{ApiResponse, WebhookAck};
use crate::error::{FulfillmentError, Result};
use crate::models::EventSource;
use crate::state::AppState;

const TOKEN_HEADER: &str = "x-api-key";

fn verify_token(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = state.webhook_token.as_deref() else {
        warn!("未配置 Webhook 令牌，拒绝推送");
        return Err(FulfillmentError::Unauthorized("Webhook 未启用".to_string()));
    };

    let provided = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| FulfillmentError::Unauthorized("缺少 Webhook 令牌".to_string()))?;

    if provided != expected {
        warn!("Webhook 令牌不匹配");
        return Err(FulfillmentError::Unauthorized("Webhook 令牌无效".to_string()));
    }
    Ok(())
}

/// 接收 Shiprocket 状态推送
///
/// POST /api/webhooks/shiprocket
pub async fn shiprocket_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<ApiResponse<WebhookAck>>> {
    verify_token(&state, &headers)?;

    let Some(awb) = payload.awb() else {
        return Ok(Json(ApiResponse::success(WebhookAck::ignored("missing_awb"))));
    };

    let Some(mut order) = state.repo.find_by_awb(&awb).await? else {
        info!(awb = %awb, "推送的 AWB 没有对应订单，忽略");
        return Ok(Json(ApiResponse::success(WebhookAck::ignored("unknown_awb"))));
    };

    let Some(snapshot) = payload.into_snapshot() else {
        return Ok(Json(ApiResponse::success(WebhookAck::ignored("empty_status"))));
    };

    let result = state
        .sync_job
        .reconciler()
        .apply_snapshot(&mut order, snapshot, EventSource::Webhook)
        .await?;

    Ok(Json(ApiResponse::success(WebhookAck {
        status: "applied",
        order_id: Some(order.id),
        detail: Some(serde_json::to_value(&result)?),
    })))
}
