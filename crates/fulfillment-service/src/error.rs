//! 履约服务错误类型
//!
//! 业务错误、外部服务错误与系统错误的统一分类。外部服务错误携带 HTTP 状态码，
//! 重试执行器和熔断器据此判断是否为瞬时故障。

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use storefront_shared::circuit_breaker::CircuitBreakerError;
use storefront_shared::error::SharedError;
use thiserror::Error;

use crate::models::OrderStatus;

#[derive(Debug, Error)]
pub enum FulfillmentError {
    // === 订单 ===
    #[error("订单不存在: {0}")]
    OrderNotFound(String),

    #[error("订单状态不允许此操作: order_id={order_id}, current_status={current_status}, operation={operation}")]
    InvalidOrderState {
        order_id: String,
        current_status: OrderStatus,
        operation: &'static str,
    },

    #[error("订单不满足退款条件: {0}")]
    RefundNotEligible(String),

    #[error("状态同步正在进行中")]
    SyncInProgress,

    // === 外部服务 ===
    #[error("承运商接口错误: status={status:?}, {message}")]
    Carrier { status: Option<u16>, message: String },

    #[error("支付网关错误: status={status:?}, code={code:?}, {message}")]
    Gateway {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("外部服务限流: {service}, {retry_after:?} 后重试")]
    RateLimited {
        service: String,
        retry_after: Duration,
    },

    #[error("熔断器已打开: {service}")]
    CircuitOpen { service: String },

    #[error("通知发送失败: {0}")]
    Notification(String),

    // === 请求 ===
    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 系统 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(#[from] SharedError),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;

/// 5xx、429 与网络层错误（无状态码）视为瞬时故障
fn transient_status(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(code) => code == 429 || code >= 500,
    }
}

impl FulfillmentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::InvalidOrderState { .. } => "INVALID_ORDER_STATE",
            Self::RefundNotEligible(_) => "REFUND_NOT_ELIGIBLE",
            Self::SyncInProgress => "SYNC_IN_PROGRESS",
            Self::Carrier { .. } => "CARRIER_ERROR",
            Self::Gateway { .. } => "GATEWAY_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Notification(_) => "NOTIFICATION_FAILED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试的瞬时故障
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Carrier { status, .. } | Self::Gateway { status, .. } => {
                transient_status(*status)
            }
            Self::RateLimited { .. } | Self::Database(_) => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 是否说明对端服务不可用（计入熔断失败次数）
    ///
    /// 4xx 说明对端正常工作只是拒绝了请求，不应触发跳闸。
    pub fn indicates_outage(&self) -> bool {
        match self {
            Self::Carrier { status, .. } | Self::Gateway { status, .. } => {
                status.is_none_or(|code| code >= 500)
            }
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidOrderState { .. } | Self::RefundNotEligible(_) | Self::SyncInProgress => {
                StatusCode::CONFLICT
            }
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Carrier { .. } | Self::Gateway { .. } | Self::Notification(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Serialization(_) | Self::Shared(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<CircuitBreakerError<FulfillmentError>> for FulfillmentError {
    fn from(err: CircuitBreakerError<FulfillmentError>) -> Self {
        match err {
            CircuitBreakerError::Open { name } => Self::CircuitOpen { service: name },
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

impl From<validator::ValidationErrors> for FulfillmentError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl IntoResponse for FulfillmentError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Database(_) | Self::Serialization(_) | Self::Shared(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}
