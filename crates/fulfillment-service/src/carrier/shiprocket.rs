//! Shiprocket 客户端
//!
//! 所有调用依次经过：熔断器 -> 重试执行器 -> 滚动窗口限流器 -> HTTP。
//! 登录 token 缓存在内存中，过期或收到 401 时重新登录。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use storefront_shared::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use storefront_shared::config::CarrierConfig;
use storefront_shared::observability::metrics::record_external_request;
use storefront_shared::rate_limiter::RateLimiter;
use storefront_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::dto::{CancelRequest, LoginRequest, LoginResponse, TrackingData, find_tracking_data};
use super::{CarrierClient, TrackingSnapshot};
use crate::error::{FulfillmentError, Result};

const PROVIDER: &str = "shiprocket";

/// 对端 429 未给出 Retry-After 时的默认冷却时间
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct ShiprocketClient {
    http: Client,
    base_url: String,
    email: String,
    password: String,
    token_ttl: Duration,
    token: Mutex<Option<CachedToken>>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
}

fn transport_error(err: reqwest::Error) -> FulfillmentError {
    FulfillmentError::Carrier {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

/// Retry-After 只支持秒数格式
fn parse_retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// 从错误响应体中提取可读信息
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

impl ShiprocketClient {
    pub fn new(config: &CarrierConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| FulfillmentError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            password: config.password.clone(),
            token_ttl: Duration::from_secs(config.token_ttl_hours * 3600),
            token: Mutex::new(None),
            limiter: RateLimiter::new(PROVIDER, config.requests_per_window, config.window()),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::new(PROVIDER)),
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    /// 限流器句柄（与客户端共享额度）
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/external{}", self.base_url, path)
    }

    /// 末尾拼接调用方传入的标识，逐段百分号编码
    fn url_with_segments(&self, path: &str, segments: &[&str]) -> Result<Url> {
        let invalid = |detail: String| FulfillmentError::Internal(format!("承运商地址无效: {detail}"));
        let mut url = Url::parse(&self.url(path)).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn login(&self) -> Result<CachedToken> {
        self.limiter.acquire().await;
        let started = Instant::now();

        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginRequest {
                email: &self.email,
                password: &self.password,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let outcome = if status.is_success() { "success" } else { "error" };
        record_external_request(PROVIDER, "login", outcome, started.elapsed().as_secs_f64());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FulfillmentError::Carrier {
                status: Some(status.as_u16()),
                message: format!("登录失败: {}", error_message(&body)),
            });
        }

        let login: LoginResponse = response.json().await.map_err(transport_error)?;
        info!("Shiprocket 登录成功，token 已缓存");

        Ok(CachedToken {
            token: login.token,
            expires_at: Instant::now() + self.token_ttl,
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.token.clone());
        }

        let fresh = self.login().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate_token(&self) {
        self.token.lock().await.take();
    }

    /// 单次请求：限流 + 鉴权，401 时重新登录并重发一次
    async fn send_once<B>(&self, endpoint: &'static str, build: &B) -> Result<Option<Value>>
    where
        B: Fn(&Client, &str) -> RequestBuilder + Sync,
    {
        let token = self.access_token().await?;
        self.limiter.acquire().await;
        let started = Instant::now();

        let mut response = build(&self.http, &token).send().await.map_err(transport_error)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(endpoint, "Shiprocket token 失效，重新登录");
            self.invalidate_token().await;
            let token = self.access_token().await?;
            self.limiter.acquire().await;
            response = build(&self.http, &token).send().await.map_err(transport_error)?;
        }

        let result = self.read_response(response).await;
        let outcome = match &result {
            Ok(Some(_)) => "success",
            Ok(None) => "not_found",
            Err(FulfillmentError::RateLimited { .. }) => "rate_limited",
            Err(_) => "error",
        };
        record_external_request(PROVIDER, endpoint, outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn read_response(&self, response: Response) -> Result<Option<Value>> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            self.limiter.penalize(retry_after);
            return Err(FulfillmentError::RateLimited {
                service: PROVIDER.to_string(),
                retry_after,
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FulfillmentError::Carrier {
                status: Some(status.as_u16()),
                message: error_message(&body),
            });
        }

        let value = response.json::<Value>().await.map_err(|e| FulfillmentError::Carrier {
            status: Some(status.as_u16()),
            message: format!("响应解析失败: {e}"),
        })?;
        Ok(Some(value))
    }

    /// 带重试与熔断的请求执行
    async fn execute<B>(&self, endpoint: &'static str, build: B) -> Result<Option<Value>>
    where
        B: Fn(&Client, &str) -> RequestBuilder + Sync,
    {
        let build = &build;
        // 熔断在外层，一整轮重试只计一次结果
        self.breaker
            .call(FulfillmentError::indicates_outage, || {
                retry_with_policy(
                    &self.retry_policy,
                    endpoint,
                    FulfillmentError::is_retryable,
                    move || self.send_once(endpoint, build),
                )
            })
            .await
            .map_err(FulfillmentError::from)
    }

    /// 轨迹查询：404 与缺少 tracking_data 都视为暂无轨迹
    async fn track<B>(&self, endpoint: &'static str, build: B) -> Result<Option<TrackingSnapshot>>
    where
        B: Fn(&Client, &str) -> RequestBuilder + Sync,
    {
        let Some(body) = self.execute(endpoint, build).await? else {
            return Ok(None);
        };

        let Some(raw) = find_tracking_data(&body) else {
            debug!(endpoint, "响应中没有 tracking_data");
            return Ok(None);
        };
        let data: TrackingData = serde_json::from_value(raw.clone())?;
        Ok(data.into_snapshot())
    }
}

#[async_trait]
impl CarrierClient for ShiprocketClient {
    #[instrument(skip(self))]
    async fn track_by_awb(&self, awb: &str) -> Result<Option<TrackingSnapshot>> {
        let url = self.url_with_segments("/courier/track/awb", &[awb])?;
        self.track("track_awb", |http, token| http.get(url.clone()).bearer_auth(token))
            .await
    }

    #[instrument(skip(self))]
    async fn track_by_shipment_id(&self, shipment_id: &str) -> Result<Option<TrackingSnapshot>> {
        let url = self.url_with_segments("/courier/track/shipment", &[shipment_id])?;
        self.track("track_shipment", |http, token| http.get(url.clone()).bearer_auth(token))
            .await
    }

    #[instrument(skip(self))]
    async fn track_by_order_id(&self, order_id: &str) -> Result<Option<TrackingSnapshot>> {
        let url = self.url("/courier/track");
        self.track("track_order", |http, token| {
            http.get(&url).query(&[("order_id", order_id)]).bearer_auth(token)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn cancel_orders(&self, carrier_order_ids: &[String]) -> Result<()> {
        let ids = carrier_order_ids
            .iter()
            .map(|id| {
                id.trim().parse::<i64>().map_err(|_| {
                    FulfillmentError::Validation(format!("承运商订单号不是数字: {id}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let request = CancelRequest { ids };
        let url = self.url("/orders/cancel");

        let response = self
            .execute("cancel_orders", |http, token| {
                http.post(&url).json(&request).bearer_auth(token)
            })
            .await?;

        if response.is_none() {
            return Err(FulfillmentError::Carrier {
                status: Some(StatusCode::NOT_FOUND.as_u16()),
                message: format!("承运商订单不存在: {carrier_order_ids:?}"),
            });
        }

        info!(ids = ?carrier_order_ids, "承运商订单已取消");
        Ok(())
    }
}
