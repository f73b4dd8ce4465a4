//! 路由配置

use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use storefront_shared::observability::middleware as obs_middleware;
use tower_http::timeout::TimeoutLayer;

use crate::{handlers, state::AppState};

/// 手动触发整轮同步可能较慢，超时放宽到两分钟
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// 订单与同步管理 API
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/cancel", post(handlers::orders::cancel_order))
        .route(
            "/orders/{id}/refund/retry",
            post(handlers::orders::retry_refund),
        )
        .route("/orders/{id}/sync", post(handlers::sync::sync_order))
        .route("/sync/run", post(handlers::sync::run_sync))
        .route(
            "/webhooks/shiprocket",
            post(handlers::webhook::shiprocket_webhook),
        )
}

/// 超时返回 408
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// 构建完整应用路由
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(timeout_layer(REQUEST_TIMEOUT))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
