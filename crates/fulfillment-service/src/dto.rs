//! HTTP 请求与响应 DTO

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{CancelActor, OrderStatus};
use crate::refund::{CancelOutcome, CancelRequest, RefundOutcome};

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

/// 取消订单请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub actor: CancelActor,
    #[validate(length(min = 1, max = 500, message = "取消原因长度必须在 1-500 之间"))]
    pub reason: String,
}

impl From<CancelOrderRequest> for CancelRequest {
    fn from(req: CancelOrderRequest) -> Self {
        Self {
            actor: req.actor,
            reason: req.reason,
        }
    }
}

/// 取消订单响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub refund: RefundOutcome,
}

impl From<CancelOutcome> for CancelOrderResponse {
    fn from(outcome: CancelOutcome) -> Self {
        Self {
            order_id: outcome.order_id,
            status: outcome.status,
            refund: outcome.refund,
        }
    }
}

/// Webhook 处理结果
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    /// applied / ignored
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl WebhookAck {
    pub fn ignored(reason: &str) -> Self {
        Self {
            status: "ignored",
            order_id: None,
            detail: Some(serde_json::json!({ "reason": reason })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_request_validation() {
        let ok: CancelOrderRequest =
            serde_json::from_str(r#"{"actor":"CUSTOMER","reason":"ordered twice"}"#).unwrap();
        assert!(ok.validate().is_ok());

        let empty: CancelOrderRequest =
            serde_json::from_str(r#"{"actor":"VENDOR","reason":""}"#).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_api_response_shape() {
        let json = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["code"], "SUCCESS");
        assert_eq!(json["data"], 1);
    }
}
