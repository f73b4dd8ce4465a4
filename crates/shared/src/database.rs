//! PostgreSQL 连接池

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};

/// 就绪探针等待数据库的上限，避免探针本身卡住
const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// 订单库连接池，Clone 共享同一个池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;
        info!("订单库连接池已建立");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 就绪探针：限时执行一条空查询
    pub async fn health_check(&self) -> Result<()> {
        let ping = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool);
        match tokio::time::timeout(PING_TIMEOUT, ping).await {
            Ok(result) => result.map(|_| ()).map_err(SharedError::from),
            Err(_) => Err(SharedError::DatabaseUnresponsive(PING_TIMEOUT)),
        }
    }

    /// 等待在途查询结束后关闭，停机流程最后调用
    pub async fn close(&self) {
        self.pool.close().await;
        info!("订单库连接池已关闭");
    }
}
