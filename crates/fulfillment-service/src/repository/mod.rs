//! 订单仓储层
//!
//! 服务层只依赖 `OrderRepository` trait。生产环境使用 Postgres 实现，
//! 本地联调和集成测试使用内存实现。

mod memory;
mod order_repo;
mod traits;

pub use memory::InMemoryOrderRepository;
pub use order_repo::PgOrderRepository;
pub use traits::*;
