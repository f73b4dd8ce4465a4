//! 日志订阅器

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 噪音较大的依赖默认只保留 warn
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn"];

fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directives = std::iter::once(config.log_level.as_str())
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局订阅器：生产环境用 JSON 并在 span 关闭时输出耗时，本地用 pretty
///
/// RUST_LOG 优先于配置的日志级别。重复安装返回错误。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let output: Box<dyn Layer<Registry> + Send + Sync> = if config.json_logs() {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().pretty().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(build_filter(config))
        .try_init()
        .context("日志订阅器已安装")
}
