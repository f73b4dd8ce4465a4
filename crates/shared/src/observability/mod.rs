//! 日志与指标
//!
//! 服务启动时调用一次 [`init`]，返回的 guard 需要一直持有到进程退出。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，由 AppConfig 加载时注入
    pub service_name: String,

    /// 日志级别（如 "info", "debug"），RUST_LOG 优先
    pub log_level: String,

    /// json（结构化）或 pretty（人类可读）
    pub log_format: String,

    pub metrics_enabled: bool,

    /// Prometheus 指标导出端口
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 持有指标端点，main 返回时随之停止
pub struct ObservabilityGuard {
    _metrics: Option<metrics::MetricsServer>,
}

impl ObservabilityGuard {
    /// 空 Guard（测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self { _metrics: None }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("可观测性组件已关闭");
    }
}

/// 先装日志订阅器，再装指标 recorder
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let server = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };
    info!(
        service = %config.service_name,
        metrics_enabled = config.metrics_enabled,
        "日志与指标初始化完成"
    );

    Ok(ObservabilityGuard { _metrics: server })
}
