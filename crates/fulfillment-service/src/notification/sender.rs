//! 邮件发送器
//!
//! `HttpEmailSender` 调用邮件服务商的 JSON API（Bearer 认证），
//! `LogEmailSender` 只记录日志，用于开发环境与本地联调。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use storefront_shared::config::EmailConfig;
use storefront_shared::observability::metrics::record_external_request;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use super::{EmailMessage, EmailSender, SendReceipt};
use crate::error::{FulfillmentError, Result};

#[derive(Debug, Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    html: &'a str,
    tags: Vec<Tag<'a>>,
}

#[derive(Debug, Serialize)]
struct Tag<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SendEmailResponse {
    id: Option<String>,
}

pub struct HttpEmailSender {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl HttpEmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FulfillmentError::Validation("邮件服务 api_key 未配置".to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| FulfillmentError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt> {
        let body = SendEmailBody {
            from: &message.from,
            to: [message.to.as_str()],
            subject: &message.subject,
            text: &message.text,
            html: &message.html,
            tags: message
                .tags
                .iter()
                .map(|(name, value)| Tag {
                    name: name.as_str(),
                    value: value.as_str(),
                })
                .collect(),
        };

        let started = Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FulfillmentError::Notification(format!("邮件服务请求失败: {e}")));

        let result = match response {
            Ok(response) if response.status().is_success() => {
                let parsed: SendEmailResponse = response.json().await.unwrap_or_default();
                Ok(SendReceipt {
                    provider: self.provider(),
                    message_id: parsed.id,
                })
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                Err(FulfillmentError::Notification(format!(
                    "邮件服务返回 HTTP {status}: {}",
                    text.chars().take(200).collect::<String>()
                )))
            }
            Err(e) => Err(e),
        };

        let outcome = if result.is_ok() { "success" } else { "error" };
        record_external_request(
            self.provider(),
            "send_email",
            outcome,
            started.elapsed().as_secs_f64(),
        );
        result
    }

    fn provider(&self) -> &'static str {
        "http"
    }
}

/// 仅记录日志的发送器
#[derive(Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt> {
        let message_id = Uuid::now_v7().to_string();
        info!(
            to = %message.to,
            subject = %message.subject,
            message_id = %message_id,
            "模拟发送邮件"
        );
        Ok(SendReceipt {
            provider: self.provider(),
            message_id: Some(message_id),
        })
    }

    fn provider(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            from: "Storefront <orders@storefront.local>".to_string(),
            to: "asha@example.com".to_string(),
            subject: "Your order has shipped".to_string(),
            text: "Hi".to_string(),
            html: "<p>Hi</p>".to_string(),
            tags: vec![("kind".to_string(), "order_shipped".to_string())],
        }
    }

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        let receipt = LogEmailSender.send(&message()).await.unwrap();
        assert_eq!(receipt.provider, "log");
        assert!(receipt.message_id.is_some());
    }

    #[test]
    fn test_http_sender_requires_api_key() {
        let config = EmailConfig {
            provider: "http".to_string(),
            api_key: None,
            ..Default::default()
        };
        assert!(matches!(
            HttpEmailSender::new(&config),
            Err(FulfillmentError::Validation(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let message = message();
        let body = SendEmailBody {
            from: &message.from,
            to: [message.to.as_str()],
            subject: &message.subject,
            text: &message.text,
            html: &message.html,
            tags: vec![Tag { name: "kind", value: "order_shipped" }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["to"][0], "asha@example.com");
        assert_eq!(json["tags"][0]["name"], "kind");
    }
}
