//! 基础设施层错误
//!
//! 业务错误由各服务自行定义，这里只覆盖配置加载与数据库连接。

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("数据库在 {0:?} 内未响应")]
    DatabaseUnresponsive(Duration),
}

pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::DatabaseUnresponsive(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// 连接池耗尽、连接中断和超时可以稍后再试，语句本身出错则不行
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            Self::DatabaseUnresponsive(_) => true,
            Self::Config(_) => false,
        }
    }
}
