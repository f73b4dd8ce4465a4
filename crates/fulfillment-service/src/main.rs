//! 订单履约服务
//!
//! 定时同步承运商物流状态、通知买家、处理取消与退款，并对外提供管理 API
//! 与承运商 Webhook 入口。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fulfillment::{
    carrier::{CarrierClient, ShiprocketClient, TrackingCache, TrackingLookup},
    gateway::{PaymentGateway, RazorpayGateway},
    notification::{EmailSender, HttpEmailSender, LogEmailSender, NotificationDispatcher},
    refund::{RefundPolicy, RefundService},
    repository::{OrderRepository, PgOrderRepository},
    routes,
    state::AppState,
    status_mapper::StatusMapper,
    sync::{ShipmentReconciler, StatusSyncJob, SyncWorker},
};
use storefront_shared::{config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("fulfillment-service").context("加载配置失败")?;

    let _guard = observability::init(&config.observability).await?;
    info!(
        environment = %config.environment,
        "Starting fulfillment-service on {}",
        config.server_addr()
    );

    // 基础设施
    let db = Database::connect(&config.database).await?;
    sqlx::migrate!("./migrations")
        .run(db.pool())
        .await
        .context("数据库迁移失败")?;
    let repo: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(db.pool().clone()));

    // 外部服务客户端
    let carrier: Arc<dyn CarrierClient> = Arc::new(ShiprocketClient::new(&config.carrier)?);
    let gateway: Arc<dyn PaymentGateway> = Arc::new(RazorpayGateway::new(&config.gateway)?);
    let sender: Arc<dyn EmailSender> = match config.email.provider.as_str() {
        "http" => Arc::new(HttpEmailSender::new(&config.email)?),
        "log" => Arc::new(LogEmailSender),
        other => {
            warn!(provider = other, "未知的邮件服务类型，回退为日志发送");
            Arc::new(LogEmailSender)
        }
    };
    if config.is_production() && sender.provider() == "log" {
        warn!("生产环境使用日志邮件发送器，买家不会收到通知");
    }

    let mapper = StatusMapper::with_overrides(&config.status_mapping)?;
    info!(overrides = mapper.override_count(), "状态映射已加载");

    // 业务服务
    let notifier = NotificationDispatcher::new(sender, &config.email);
    let refunds = Arc::new(RefundService::new(
        repo.clone(),
        gateway,
        carrier.clone(),
        notifier.clone(),
        RefundPolicy::from(&config.refund),
    ));
    let reconciler = Arc::new(ShipmentReconciler::new(
        repo.clone(),
        mapper,
        notifier,
        refunds.clone(),
    ));
    let lookup = TrackingLookup::new(
        carrier,
        TrackingCache::new(Duration::from_secs(config.carrier.tracking_cache_seconds)),
    );
    let sync_job = Arc::new(StatusSyncJob::new(
        repo.clone(),
        lookup,
        reconciler,
        refunds.clone(),
        config.sync.clone(),
    ));

    // 定时同步 Worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if config.sync.enabled {
        let worker = SyncWorker::new(sync_job.clone(), &config.sync.cron)?;
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        info!("定时同步已关闭");
        None
    };

    let state = AppState::new(repo, refunds, sync_job)
        .with_database(db.clone())
        .with_webhook_token(config.carrier.webhook_token.clone());
    let app = routes::app(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接，等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 通知 Worker 退出，并等待进行中的一轮同步结束
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "SyncWorker 异常退出");
        }
    }

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
