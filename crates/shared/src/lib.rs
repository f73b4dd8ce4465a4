//! 共享库
//!
//! 包含各服务共用的配置、错误处理、数据库连接、重试、熔断、限流与可观测性代码。

pub mod circuit_breaker;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod rate_limiter;
pub mod retry;
