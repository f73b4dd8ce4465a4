//! 物流状态同步
//!
//! - `ShipmentReconciler`：把承运商轨迹快照写入订单（同步与 Webhook 共用）
//! - `StatusSyncJob`：批量同步在途订单并轮询待确认退款
//! - `SyncWorker`：按 cron 周期触发同步任务

mod job;
mod reconciler;
mod worker;

pub use job::{OrderSyncResult, StatusSyncJob, SyncReport, SyncTrigger};
pub use reconciler::{ApplyOutcome, ApplyResult, ShipmentReconciler};
pub use worker::SyncWorker;
