//! axum 中间件：请求 ID 与访问日志/指标

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};

use super::metrics;

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// 当前请求的 ID，放在 request extensions 里供下游读取
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 透传上游的 x-request-id（承运商回调、网关都可能带），缺失时生成一个，并写回响应头
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let header = HeaderValue::from_str(&id).ok();

    request.extensions_mut().insert(RequestId(id));
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

/// 每个请求一个 span，结束时记录状态码、耗时和 HTTP 指标
///
/// 指标按路由模板打标签（`/api/orders/{id}/cancel`），不会因订单 ID 膨胀。
pub async fn http_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let span = info_span!(
        "http_request",
        %method,
        %route,
        %request_id,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let started = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let elapsed = started.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", elapsed.as_millis() as u64);
    metrics::record_http_request(method.as_str(), &route, status, elapsed.as_secs_f64());

    response
}
