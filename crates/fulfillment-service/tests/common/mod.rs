//! 集成测试公共设施
//!
//! 用 axum 在本地随机端口上启动 Shiprocket / Razorpay 桩服务，
//! 让真实的 HTTP 客户端走完整的请求链路。

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use fulfillment::FulfillmentError;
use fulfillment::models::{CustomerContact, Order, OrderStatus, PaymentMethod, ShipmentInfo};
use fulfillment::notification::{EmailMessage, EmailSender, SendReceipt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use storefront_shared::config::{CarrierConfig, GatewayConfig};
use tokio::net::TcpListener;

// ==================== 桩服务 ====================

/// 在随机端口启动路由，返回 base url
pub async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("绑定测试端口失败");
    let addr = listener.local_addr().expect("读取测试端口失败");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("桩服务异常退出");
    });
    format!("http://{addr}")
}

/// Shiprocket 桩服务状态
#[derive(Default)]
pub struct CarrierStub {
    pub logins: AtomicUsize,
    pub track_calls: AtomicUsize,
    /// 下一次轨迹查询返回 401（模拟 token 被吊销）
    pub revoke_next_token: AtomicBool,
    /// 下一次轨迹查询返回 429
    pub throttle_next: AtomicBool,
    /// 轨迹查询一律返回 503
    pub outage: AtomicBool,
    /// AWB -> 完整响应体
    pub tracking: Mutex<HashMap<String, Value>>,
    pub cancelled: Mutex<Vec<i64>>,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl CarrierStub {
    pub fn set_tracking(&self, awb: &str, body: Value) {
        self.tracking.lock().insert(awb.to_string(), body);
    }

    fn current_token(&self) -> String {
        format!("token-{}", self.logins.load(Ordering::SeqCst))
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn carrier_login(State(stub): State<Arc<CarrierStub>>, Json(body): Json<Value>) -> Response {
    if body["email"] != "ops@storefront.test" || body["password"] != "secret" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Invalid email and password combination"})),
        )
            .into_response();
    }
    let n = stub.logins.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"token": format!("token-{n}")})).into_response()
}

/// 轨迹查询类接口的公共前置检查
fn guard(stub: &CarrierStub, headers: &HeaderMap) -> Option<Response> {
    stub.track_calls.fetch_add(1, Ordering::SeqCst);
    let token = bearer(headers).unwrap_or_default();
    stub.seen_tokens.lock().push(token.clone());

    if stub.revoke_next_token.swap(false, Ordering::SeqCst) || token != stub.current_token() {
        return Some((StatusCode::UNAUTHORIZED, Json(json!({"message": "Token has expired"}))).into_response());
    }
    if stub.throttle_next.swap(false, Ordering::SeqCst) {
        return Some(
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "2")],
                Json(json!({"message": "Too Many Attempts."})),
            )
                .into_response(),
        );
    }
    if stub.outage.load(Ordering::SeqCst) {
        return Some(
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "upstream down"})))
                .into_response(),
        );
    }
    None
}

async fn carrier_track_awb(
    State(stub): State<Arc<CarrierStub>>,
    Path(awb): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = guard(&stub, &headers) {
        return rejection;
    }
    match stub.tracking.lock().get(&awb) {
        Some(body) => Json(body.clone()).into_response(),
        None => Json(no_activity_body()).into_response(),
    }
}

async fn carrier_track_shipment(
    State(stub): State<Arc<CarrierStub>>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = guard(&stub, &headers) {
        return rejection;
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn carrier_track_order(
    State(stub): State<Arc<CarrierStub>>,
    Query(_query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = guard(&stub, &headers) {
        return rejection;
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn carrier_cancel(
    State(stub): State<Arc<CarrierStub>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if bearer(&headers).as_deref() != Some(stub.current_token().as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let ids: Vec<i64> = body["ids"]
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    stub.cancelled.lock().extend(ids);
    Json(json!({"status": 200, "message": "Order cancelled successfully."})).into_response()
}

/// 启动 Shiprocket 桩服务
pub async fn spawn_carrier() -> (Arc<CarrierStub>, String) {
    let stub = Arc::new(CarrierStub::default());
    let router = Router::new()
        .route("/v1/external/auth/login", post(carrier_login))
        .route("/v1/external/courier/track/awb/{awb}", get(carrier_track_awb))
        .route(
            "/v1/external/courier/track/shipment/{id}",
            get(carrier_track_shipment),
        )
        .route("/v1/external/courier/track", get(carrier_track_order))
        .route("/v1/external/orders/cancel", post(carrier_cancel))
        .with_state(stub.clone());
    let base_url = spawn_stub(router).await;
    (stub, base_url)
}

pub fn carrier_config(base_url: &str) -> CarrierConfig {
    CarrierConfig {
        base_url: base_url.to_string(),
        email: "ops@storefront.test".to_string(),
        password: "secret".to_string(),
        timeout_seconds: 5,
        requests_per_window: 100,
        window_seconds: 1,
        ..CarrierConfig::default()
    }
}

/// 承运商尚无轨迹时的响应
pub fn no_activity_body() -> Value {
    json!({
        "tracking_data": {
            "track_status": 0,
            "shipment_status": 0,
            "shipment_track": [],
            "shipment_track_activities": null,
            "error": "Aahh! There is no activities found in our DB. Please have some patience it will be updated soon."
        }
    })
}

/// 按 AWB 查询的轨迹响应
///
/// scans 为 (时间, 状态标签, 状态码)，时间按 IST 书写。
pub fn tracking_body(awb: &str, current_status: &str, code: i64, scans: &[(&str, &str, i64)]) -> Value {
    let activities: Vec<Value> = scans
        .iter()
        .map(|(date, label, sr_status)| {
            json!({
                "date": date,
                "status": "X",
                "activity": label,
                "location": "Bhiwandi",
                "sr-status": sr_status.to_string(),
                "sr-status-label": label
            })
        })
        .collect();

    json!({
        "tracking_data": {
            "track_status": 1,
            "shipment_status": code,
            "shipment_track": [{
                "awb_code": awb,
                "courier_name": "Delhivery Surface",
                "current_status": current_status,
                "edd": null
            }],
            "shipment_track_activities": activities,
            "etd": "2026-05-08 18:00:00"
        }
    })
}

/// Razorpay 桩服务状态
#[derive(Default)]
pub struct GatewayStub {
    /// 创建退款的请求体
    pub created: Mutex<Vec<Value>>,
    pub authorizations: Mutex<Vec<String>>,
    /// 创建退款时返回的状态
    pub create_status: Mutex<Option<String>>,
    /// 查询退款时返回的状态
    pub fetch_status: Mutex<Option<String>>,
    /// 创建退款时返回的业务错误
    pub reject_with: Mutex<Option<(StatusCode, Value)>>,
    /// 每次创建请求携带的幂等键
    pub idempotency_keys: Mutex<Vec<String>>,
    /// 幂等键 -> 已创建的退款单
    pub refunds_by_key: Mutex<HashMap<String, Value>>,
    /// 下一次创建退款落库后延迟响应，模拟客户端超时
    pub stall_next_create: Mutex<Option<Duration>>,
}

async fn gateway_create_refund(
    State(stub): State<Arc<GatewayStub>>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    stub.authorizations.lock().push(auth);
    let key = headers
        .get("x-refund-idempotency")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    stub.idempotency_keys.lock().push(key.clone());

    if let Some((status, error)) = stub.reject_with.lock().clone() {
        return (status, Json(error)).into_response();
    }
    // 同一幂等键重复提交，返回已有退款单
    if let Some(existing) = stub.refunds_by_key.lock().get(&key).cloned() {
        return Json(existing).into_response();
    }

    let amount = body["amount"].as_i64().unwrap_or_default();
    stub.created.lock().push(body);
    let status = stub
        .create_status
        .lock()
        .clone()
        .unwrap_or_else(|| "pending".to_string());

    let refund = json!({
        "id": "rfnd_stub_1",
        "entity": "refund",
        "amount": amount,
        "currency": "INR",
        "payment_id": payment_id,
        "status": status,
        "speed_requested": "normal"
    });
    if !key.is_empty() {
        stub.refunds_by_key.lock().insert(key, refund.clone());
    }

    let stall = stub.stall_next_create.lock().take();
    if let Some(delay) = stall {
        tokio::time::sleep(delay).await;
    }
    Json(refund).into_response()
}

async fn gateway_fetch_refund(
    State(stub): State<Arc<GatewayStub>>,
    Path(refund_id): Path<String>,
) -> Response {
    let Some(created) = stub.created.lock().last().cloned() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "BAD_REQUEST_ERROR", "description": "The id provided does not exist"}})),
        )
            .into_response();
    };
    let status = stub
        .fetch_status
        .lock()
        .clone()
        .unwrap_or_else(|| "processed".to_string());

    Json(json!({
        "id": refund_id,
        "amount": created["amount"],
        "payment_id": null,
        "status": status
    }))
    .into_response()
}

/// 启动 Razorpay 桩服务
pub async fn spawn_gateway() -> (Arc<GatewayStub>, String) {
    let stub = Arc::new(GatewayStub::default());
    let router = Router::new()
        .route("/v1/payments/{id}/refund", post(gateway_create_refund))
        .route("/v1/refunds/{id}", get(gateway_fetch_refund))
        .with_state(stub.clone());
    let base_url = spawn_stub(router).await;
    (stub, base_url)
}

pub fn gateway_config(base_url: &str) -> GatewayConfig {
    GatewayConfig {
        base_url: base_url.to_string(),
        key_id: "rzp_test_key".to_string(),
        key_secret: "rzp_test_secret".to_string(),
        timeout_seconds: 5,
        ..GatewayConfig::default()
    }
}

// ==================== 测试替身 ====================

/// 记录所有邮件的发送器
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingSender {
    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.subject.clone()).collect()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, FulfillmentError> {
        self.sent.lock().push(message.clone());
        Ok(SendReceipt {
            provider: "recording",
            message_id: Some(format!("msg-{}", self.sent.lock().len())),
        })
    }

    fn provider(&self) -> &'static str {
        "recording"
    }
}

// ==================== 辅助函数 ====================

pub fn customer() -> CustomerContact {
    CustomerContact {
        id: "cust-42".to_string(),
        name: "Meera Iyer".to_string(),
        email: Some("meera@example.com".to_string()),
    }
}

/// 在途的预付订单
pub fn prepaid_in_transit(order_number: &str, awb: &str) -> Order {
    Order::new(order_number, "vendor-7", customer(), PaymentMethod::Prepaid, 129_900)
        .with_status(OrderStatus::InTransit)
        .paid_via(format!("pay_{order_number}"))
        .with_shipment(ShipmentInfo {
            awb_code: Some(awb.to_string()),
            carrier_shipment_id: Some("16104408".to_string()),
            carrier_order_id: Some("237157589".to_string()),
            courier_name: Some("Delhivery Surface".to_string()),
            ..ShipmentInfo::default()
        })
}

/// 已确认未揽收的货到付款订单
pub fn cod_confirmed(order_number: &str) -> Order {
    Order::new(order_number, "vendor-7", customer(), PaymentMethod::Cod, 59_900).with_shipment(
        ShipmentInfo {
            carrier_order_id: Some("900001".to_string()),
            ..ShipmentInfo::default()
        },
    )
}
