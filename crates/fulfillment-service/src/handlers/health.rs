//! 健康检查

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

const SERVICE_NAME: &str = "fulfillment-service";

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：检查数据库连接是否可用
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let database = match &state.database {
        Some(db) => {
            if db.health_check().await.is_ok() {
                "ok"
            } else {
                "fail"
            }
        }
        None => "skipped",
    };

    Json(json!({
        "status": if database == "fail" { "degraded" } else { "ok" },
        "service": SERVICE_NAME,
        "checks": {
            "database": database
        }
    }))
}
