//! Razorpay 退款接口
//!
//! Basic 认证（key_id / key_secret）。5xx 与网络错误由重试执行器重试，
//! 网关的业务拒绝（4xx）原样返回给调用方。创建退款带幂等键，重试不会重复退款。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use storefront_shared::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use storefront_shared::config::GatewayConfig;
use storefront_shared::observability::metrics::record_external_request;
use storefront_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::time::Instant;
use tracing::{info, instrument};

use super::{GatewayRefund, PaymentGateway, RefundRequest};
use crate::error::{FulfillmentError, Result};

const PROVIDER: &str = "razorpay";
const IDEMPOTENCY_HEADER: &str = "X-Refund-Idempotency";

#[derive(Debug, Serialize)]
struct CreateRefundBody<'a> {
    amount: i64,
    speed: &'a str,
    receipt: &'a str,
    notes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorDetail {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

pub struct RazorpayGateway {
    http: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    speed: String,
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
}

fn transport_error(err: reqwest::Error) -> FulfillmentError {
    FulfillmentError::Gateway {
        status: err.status().map(|s| s.as_u16()),
        code: None,
        message: err.to_string(),
    }
}

impl RazorpayGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| FulfillmentError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            speed: config.refund_speed.clone(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::new(PROVIDER)),
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.key_id, Some(&self.key_secret))
    }

    async fn parse(response: Response) -> Result<GatewayRefund> {
        let status = response.status();
        if status.is_success() {
            return response.json::<GatewayRefund>().await.map_err(|e| {
                FulfillmentError::Gateway {
                    status: Some(status.as_u16()),
                    code: None,
                    message: format!("响应解析失败: {e}"),
                }
            });
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_default();

        Err(FulfillmentError::Gateway {
            status: Some(status.as_u16()),
            code: detail.code,
            message: detail
                .description
                .unwrap_or_else(|| body.chars().take(200).collect()),
        })
    }

    async fn execute<B>(&self, endpoint: &'static str, build: B) -> Result<GatewayRefund>
    where
        B: Fn() -> RequestBuilder + Sync,
    {
        let build = &build;
        let attempt = move || async move {
            let started = Instant::now();
            let result = match build().send().await {
                Ok(response) => Self::parse(response).await,
                Err(e) => Err(transport_error(e)),
            };
            let outcome = if result.is_ok() { "success" } else { "error" };
            record_external_request(PROVIDER, endpoint, outcome, started.elapsed().as_secs_f64());
            result
        };

        // 熔断在外层，一整轮重试只计一次结果
        self.breaker
            .call(FulfillmentError::indicates_outage, || {
                retry_with_policy(
                    &self.retry_policy,
                    endpoint,
                    FulfillmentError::is_retryable,
                    attempt,
                )
            })
            .await
            .map_err(FulfillmentError::from)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    #[instrument(skip(self, request), fields(payment_id = %request.payment_id, amount = request.amount))]
    async fn create_refund(&self, request: RefundRequest) -> Result<GatewayRefund> {
        let url = format!("{}/v1/payments/{}/refund", self.base_url, request.payment_id);
        let body = CreateRefundBody {
            amount: request.amount,
            speed: &self.speed,
            receipt: &request.receipt,
            notes: &request.notes,
        };

        let refund = self
            .execute("create_refund", || {
                self.authorized(self.http.post(&url))
                    .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
                    .json(&body)
            })
            .await?;

        info!(refund_id = %refund.id, status = ?refund.status, "网关退款已创建");
        Ok(refund)
    }

    #[instrument(skip(self))]
    async fn fetch_refund(&self, refund_id: &str) -> Result<GatewayRefund> {
        let url = format!("{}/v1/refunds/{}", self.base_url, refund_id);
        self.execute("fetch_refund", || self.authorized(self.http.get(&url)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_body_shape() {
        let notes = BTreeMap::from([("order_id".to_string(), "ORD-1".to_string())]);
        let body = CreateRefundBody {
            amount: 49_900,
            speed: "normal",
            receipt: "ORD-1",
            notes: &notes,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["amount"], 49_900);
        assert_eq!(json["speed"], "normal");
        assert_eq!(json["notes"]["order_id"], "ORD-1");
    }

    #[test]
    fn test_error_body_parsing() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"The refund amount provided is greater than amount captured","source":"business"}}"#,
        )
        .unwrap();
        assert_eq!(body.error.code.as_deref(), Some("BAD_REQUEST_ERROR"));
        assert!(body.error.description.unwrap().contains("greater than"));
    }
}
