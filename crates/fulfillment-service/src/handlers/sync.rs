//! 手动触发状态同步

use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::dto::ApiResponse;
use crate::error::Result;
use crate::state::AppState;
use crate::sync::{OrderSyncResult, SyncReport, SyncTrigger};

/// 同步单个订单
///
/// POST /api/orders/{id}/sync
pub async fn sync_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderSyncResult>>> {
    let result = state.sync_job.sync_order(order_id).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// 立即执行一轮同步
///
/// POST /api/sync/run
///
/// 与定时任务共用互斥锁，已有同步在执行时返回 409。
pub async fn run_sync(State(state): State<AppState>) -> Result<Json<ApiResponse<SyncReport>>> {
    let report = state.sync_job.run(SyncTrigger::Manual).await?;
    Ok(Json(ApiResponse::success(report)))
}
