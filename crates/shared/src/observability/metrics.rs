//! Prometheus 指标
//!
//! 业务代码只调用下面的 `record_*` 函数，指标名和标签集中在这里维护。
//! 未安装 recorder（测试、禁用指标）时这些调用都是空操作。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ObservabilityConfig;

/// `/metrics` 抓取端点的后台任务，drop 时停止
pub struct MetricsServer {
    task: JoinHandle<()>,
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 安装全局 recorder，并在独立端口上提供 `/metrics`
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsServer> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("安装 Prometheus recorder 失败")?;
    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("指标端口 {addr} 绑定失败"))?;
    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));

    info!(%addr, "指标端点已启动");
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标端点异常退出");
        }
    });

    Ok(MetricsServer { task })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    metrics::describe_counter!(
        "external_requests_total",
        "Outbound calls to carrier / payment / email providers"
    );
    metrics::describe_histogram!(
        "external_request_duration_seconds",
        "Outbound call duration in seconds"
    );
    metrics::describe_counter!("shipment_sync_runs_total", "Completed status sync runs");
    metrics::describe_histogram!(
        "shipment_sync_duration_seconds",
        "Status sync run duration in seconds"
    );
    metrics::describe_counter!(
        "shipment_sync_orders_total",
        "Per-order outcomes of status synchronization"
    );
    metrics::describe_counter!(
        "order_status_transitions_total",
        "Applied order status transitions"
    );
    metrics::describe_counter!("notifications_total", "Customer notifications by outcome");
    metrics::describe_counter!("refunds_total", "Refund attempts by outcome");
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last completed worker iteration"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次对外部服务的调用
///
/// `provider` 如 shiprocket / razorpay / email，`outcome` 如 ok / http_4xx / timeout
#[inline]
pub fn record_external_request(provider: &str, endpoint: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "external_requests_total",
        "provider" => provider.to_string(),
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "external_request_duration_seconds",
        "provider" => provider.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

/// 记录一次同步任务的执行
#[inline]
pub fn record_sync_run(trigger: &str, duration_secs: f64) {
    metrics::counter!("shipment_sync_runs_total", "trigger" => trigger.to_string()).increment(1);
    metrics::histogram!("shipment_sync_duration_seconds").record(duration_secs);
}

/// 记录单个订单的同步结果
#[inline]
pub fn record_sync_order(outcome: &str) {
    metrics::counter!("shipment_sync_orders_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// 记录订单状态变更
#[inline]
pub fn record_status_transition(from: &str, to: &str, source: &str) {
    metrics::counter!(
        "order_status_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// 记录通知发送结果
#[inline]
pub fn record_notification(kind: &str, outcome: &str) {
    metrics::counter!(
        "notifications_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录退款处理结果
#[inline]
pub fn record_refund(method: &str, outcome: &str) {
    metrics::counter!(
        "refunds_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录 Worker 最近一次完成迭代的时间，供告警判断 Worker 是否存活
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}
