//! 应用状态定义

use std::sync::Arc;

use storefront_shared::database::Database;

use crate::refund::RefundService;
use crate::repository::OrderRepository;
use crate::sync::StatusSyncJob;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 就绪探针使用；内存仓储模式下为 None
    pub database: Option<Database>,
    pub repo: Arc<dyn OrderRepository>,
    pub refunds: Arc<RefundService>,
    pub sync_job: Arc<StatusSyncJob>,
    /// 承运商 Webhook 共享令牌，未配置时拒绝所有推送
    pub webhook_token: Option<String>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        refunds: Arc<RefundService>,
        sync_job: Arc<StatusSyncJob>,
    ) -> Self {
        Self {
            database: None,
            repo,
            refunds,
            sync_job,
            webhook_token: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_webhook_token(mut self, token: Option<String>) -> Self {
        self.webhook_token = token.filter(|t| !t.trim().is_empty());
        self
    }
}
