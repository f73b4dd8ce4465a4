//! 状态同步定时 Worker
//!
//! 按 cron 表达式周期触发 `StatusSyncJob`，收到 shutdown 信号后退出。
//! 正在执行的一轮同步会自然完成，不会被中途打断。

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use storefront_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::job::StatusSyncJob;
use crate::error::{FulfillmentError, Result};

const WORKER_NAME: &str = "status_sync_worker";

pub struct SyncWorker {
    job: Arc<StatusSyncJob>,
    schedule: Schedule,
    expression: String,
}

impl SyncWorker {
    /// 创建 Worker，cron 表达式非法时报错
    pub fn new(job: Arc<StatusSyncJob>, cron_expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            FulfillmentError::Validation(format!("无效的 cron 表达式 {cron_expression}: {e}"))
        })?;
        Ok(Self {
            job,
            schedule,
            expression: cron_expression.to_string(),
        })
    }

    /// after 之后的下一次触发时间
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// 主循环：等待下一个触发点执行同步，直到 shutdown 变为 true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(cron = %self.expression, "SyncWorker 已启动");

        // 以上一个触发点为游标，避免提前醒来时同一触发点执行两次
        let mut cursor = Utc::now();
        loop {
            let Some(next) = self.next_run_after(cursor) else {
                warn!("cron 表达式没有后续触发时间，SyncWorker 退出");
                break;
            };
            cursor = next;
            let delay = (next - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，SyncWorker 退出");
                        break;
                    }
                }

                _ = tokio::time::sleep(delay) => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        match self.job.run_once().await {
            Ok(report) => info!(
                scanned = report.scanned,
                updated = report.updated,
                failed = report.failed,
                "定时同步完成"
            ),
            Err(FulfillmentError::SyncInProgress) => {
                warn!("上一轮同步尚未结束，跳过本次触发");
            }
            Err(e) => error!(error = %e, "定时同步失败"),
        }

        // 记录 Worker 健康状态，供告警判断 Worker 是否存活
        metrics::set_worker_last_run(WORKER_NAME);
    }
}
