//! 状态同步任务
//!
//! 一轮同步：
//! 1. 取出到期的在途订单（超过最小同步间隔且连续失败次数未超限）
//! 2. 以有限并发查询承运商轨迹并落库
//! 3. 记录单个订单的同步失败
//! 4. 轮询网关侧仍在处理中的退款

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use storefront_shared::config::SyncConfig;
use storefront_shared::observability::metrics::{record_sync_order, record_sync_run};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::reconciler::{ApplyOutcome, ApplyResult, ShipmentReconciler};
use crate::carrier::{LookupOutcome, TrackingLookup};
use crate::error::{FulfillmentError, Result};
use crate::models::{EventSource, Order};
use crate::refund::RefundService;
use crate::repository::OrderRepository;

/// 触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Scheduled,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

/// 单个订单的同步结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderSyncResult {
    Applied(ApplyResult),
    /// 承运商没有任何标识对应的轨迹
    NotFound,
    Failed { error: String },
}

impl OrderSyncResult {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Applied(r) => match r.outcome {
                ApplyOutcome::Updated { .. } => "updated",
                ApplyOutcome::Unchanged => "unchanged",
                ApplyOutcome::Rejected { .. } => "rejected",
                ApplyOutcome::Unmapped { .. } => "unmapped",
            },
            Self::NotFound => "not_found",
            Self::Failed { .. } => "failed",
        }
    }
}

/// 一轮同步的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub updated: usize,
    /// 状态未变化（含无法识别的承运商状态）
    pub unchanged: usize,
    pub rejected: usize,
    pub not_found: usize,
    pub failed: usize,
    pub notified: usize,
    pub refunds_reconciled: usize,
}

impl SyncReport {
    fn record(&mut self, result: &OrderSyncResult) {
        self.scanned += 1;
        match result {
            OrderSyncResult::Applied(applied) => {
                match applied.outcome {
                    ApplyOutcome::Updated { .. } => self.updated += 1,
                    ApplyOutcome::Unchanged | ApplyOutcome::Unmapped { .. } => self.unchanged += 1,
                    ApplyOutcome::Rejected { .. } => self.rejected += 1,
                }
                if applied.notified {
                    self.notified += 1;
                }
            }
            OrderSyncResult::NotFound => self.not_found += 1,
            OrderSyncResult::Failed { .. } => self.failed += 1,
        }
    }
}

pub struct StatusSyncJob {
    repo: Arc<dyn OrderRepository>,
    lookup: TrackingLookup,
    reconciler: Arc<ShipmentReconciler>,
    refunds: Arc<RefundService>,
    config: SyncConfig,
    running: Mutex<()>,
}

impl StatusSyncJob {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        lookup: TrackingLookup,
        reconciler: Arc<ShipmentReconciler>,
        refunds: Arc<RefundService>,
        config: SyncConfig,
    ) -> Self {
        Self {
            repo,
            lookup,
            reconciler,
            refunds,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn reconciler(&self) -> &Arc<ShipmentReconciler> {
        &self.reconciler
    }

    /// 定时触发的一轮同步
    pub async fn run_once(&self) -> Result<SyncReport> {
        self.run(SyncTrigger::Scheduled).await
    }

    /// 执行一轮同步，上一轮未结束时返回 `SyncInProgress`
    #[instrument(skip(self, trigger), fields(trigger = trigger.as_str()))]
    pub async fn run(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| FulfillmentError::SyncInProgress)?;
        let started = Instant::now();

        let synced_before = Utc::now() - Duration::seconds(self.config.min_resync_interval_seconds);
        let orders = self
            .repo
            .list_open_shipments(
                self.config.batch_size,
                synced_before,
                self.config.max_consecutive_failures,
            )
            .await?;
        info!(count = orders.len(), "开始同步在途订单");

        let results: Vec<OrderSyncResult> = stream::iter(orders)
            .map(|order| self.sync_one(order))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = SyncReport::default();
        for result in &results {
            report.record(result);
        }

        let purged = self.lookup.cache().purge_expired();
        if purged > 0 {
            info!(purged, "清理过期轨迹缓存");
        }

        report.refunds_reconciled = self.reconcile_pending_refunds().await;

        record_sync_run(trigger.as_str(), started.elapsed().as_secs_f64());
        info!(
            scanned = report.scanned,
            updated = report.updated,
            unchanged = report.unchanged,
            rejected = report.rejected,
            not_found = report.not_found,
            failed = report.failed,
            notified = report.notified,
            refunds_reconciled = report.refunds_reconciled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "状态同步完成"
        );
        Ok(report)
    }

    /// 单独同步一个订单，绕过轨迹缓存
    #[instrument(skip(self))]
    pub async fn sync_order(&self, order_id: Uuid) -> Result<OrderSyncResult> {
        let order = self
            .repo
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.to_string()))?;

        if !order.shipment.has_reference() {
            return Err(FulfillmentError::Validation(
                "订单尚未分配承运商运单".to_string(),
            ));
        }

        self.lookup.invalidate(&order.shipment);
        Ok(self.sync_one(order).await)
    }

    async fn sync_one(&self, mut order: Order) -> OrderSyncResult {
        let result = match self.lookup.lookup(&order.shipment).await {
            Ok(LookupOutcome::Found { snapshot, via }) => {
                match self
                    .reconciler
                    .apply_snapshot(&mut order, snapshot, EventSource::Sync)
                    .await
                {
                    Ok(applied) => OrderSyncResult::Applied(applied),
                    Err(e) => {
                        error!(order_id = %order.id, via = %via, error = %e, "轨迹落库失败");
                        OrderSyncResult::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            }
            Ok(LookupOutcome::NotFound) => {
                self.record_failure(&mut order, "承运商暂无轨迹数据", true).await;
                OrderSyncResult::NotFound
            }
            Err(e) => {
                // 承运商整体不可用时不计入订单的连续失败次数
                let counts = !(e.is_retryable() || matches!(e, FulfillmentError::CircuitOpen { .. }));
                warn!(order_id = %order.id, error = %e, "查询轨迹失败");
                self.record_failure(&mut order, &e.to_string(), counts).await;
                OrderSyncResult::Failed {
                    error: e.to_string(),
                }
            }
        };

        record_sync_order(result.metric_label());
        result
    }

    /// 记录同步失败
    ///
    /// 计入失败的订单刷新同步时间，下一轮按最小间隔再尝试；
    /// 不计入的（承运商故障）保留原同步时间，下一轮优先重试。
    async fn record_failure(&self, order: &mut Order, reason: &str, counts: bool) {
        order.sync.last_error = Some(reason.to_string());
        if counts {
            order.sync.consecutive_failures += 1;
            order.sync.last_synced_at = Some(Utc::now());
            if order.sync.consecutive_failures >= self.config.max_consecutive_failures {
                warn!(
                    order_id = %order.id,
                    failures = order.sync.consecutive_failures,
                    "订单连续同步失败次数已达上限，停止自动同步"
                );
            }
        }
        order.touch();

        if let Err(e) = self.repo.update(order).await {
            error!(order_id = %order.id, error = %e, "记录同步失败状态出错");
        }
    }

    async fn reconcile_pending_refunds(&self) -> usize {
        let orders = match self.repo.list_pending_refunds(self.config.batch_size).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "查询待确认退款失败");
                return 0;
            }
        };

        let mut reconciled = 0;
        for mut order in orders {
            match self.refunds.reconcile_refund(&mut order).await {
                Ok(Some(_)) => reconciled += 1,
                Ok(None) => {}
                Err(e) => warn!(order_id = %order.id, error = %e, "查询退款状态失败"),
            }
        }
        reconciled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{MockCarrierClient, TrackingCache, TrackingSnapshot};
    use crate::gateway::MockPaymentGateway;
    use crate::models::{CustomerContact, OrderStatus, PaymentMethod, ShipmentInfo};
    use crate::notification::{LogEmailSender, NotificationDispatcher};
    use crate::refund::RefundPolicy;
    use crate::repository::InMemoryOrderRepository;
    use crate::status_mapper::StatusMapper;
    use storefront_shared::config::EmailConfig;

    fn order(awb: &str, status: OrderStatus) -> Order {
        Order::new(
            format!("ORD-{awb}"),
            "vendor-1",
            CustomerContact {
                id: "c".to_string(),
                name: "Kiran".to_string(),
                email: None,
            },
            PaymentMethod::Cod,
            1_000,
        )
        .with_status(status)
        .with_shipment(ShipmentInfo {
            awb_code: Some(awb.to_string()),
            ..Default::default()
        })
    }

    fn snapshot(status: &str, code: i64) -> TrackingSnapshot {
        TrackingSnapshot {
            awb_code: None,
            carrier_status: status.to_string(),
            status_code: Some(code),
            courier_name: None,
            etd: None,
            activities: vec![],
        }
    }

    fn job(repo: &InMemoryOrderRepository, carrier: MockCarrierClient) -> StatusSyncJob {
        let repo: Arc<dyn OrderRepository> = Arc::new(repo.clone());
        let carrier = Arc::new(carrier);
        let notifier =
            NotificationDispatcher::new(Arc::new(LogEmailSender), &EmailConfig::default());
        let refunds = Arc::new(RefundService::new(
            repo.clone(),
            Arc::new(MockPaymentGateway::new()),
            carrier.clone(),
            notifier.clone(),
            RefundPolicy::default(),
        ));
        let reconciler = Arc::new(ShipmentReconciler::new(
            repo.clone(),
            StatusMapper::new(),
            notifier,
            refunds.clone(),
        ));
        StatusSyncJob::new(
            repo,
            TrackingLookup::new(carrier, TrackingCache::new(std::time::Duration::from_secs(60))),
            reconciler,
            refunds,
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_run_tallies_each_outcome() {
        let delivered = order("A1", OrderStatus::OutForDelivery);
        let same = order("A2", OrderStatus::InTransit);
        let missing = order("A3", OrderStatus::Shipped);
        let broken = order("A4", OrderStatus::Shipped);
        let repo = InMemoryOrderRepository::with_orders([
            delivered.clone(),
            same.clone(),
            missing.clone(),
            broken.clone(),
        ]);

        let mut carrier = MockCarrierClient::new();
        carrier.expect_track_by_awb().returning(|awb| match awb {
            "A1" => Ok(Some(snapshot("DELIVERED", 7))),
            "A2" => Ok(Some(snapshot("IN TRANSIT", 18))),
            "A3" => Ok(None),
            _ => Err(FulfillmentError::Carrier {
                status: Some(503),
                message: "upstream unavailable".to_string(),
            }),
        });

        let report = job(&repo, carrier).run_once().await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                scanned: 4,
                updated: 1,
                unchanged: 1,
                rejected: 0,
                not_found: 1,
                failed: 1,
                notified: 0,
                refunds_reconciled: 0,
            }
        );

        assert_eq!(repo.get(delivered.id).unwrap().status, OrderStatus::Delivered);
        let missing = repo.get(missing.id).unwrap();
        assert_eq!(missing.sync.consecutive_failures, 1);
        assert!(missing.sync.last_error.is_some());
        let broken = repo.get(broken.id).unwrap();
        assert_eq!(broken.sync.consecutive_failures, 0);
        assert!(broken.sync.last_error.is_some());
        assert_eq!(repo.get(same.id).unwrap().sync.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_recently_synced_orders_are_skipped_on_next_run() {
        let order = order("B1", OrderStatus::InTransit);
        let repo = InMemoryOrderRepository::with_orders([order]);

        let mut carrier = MockCarrierClient::new();
        carrier
            .expect_track_by_awb()
            .times(1)
            .returning(|_| Ok(Some(snapshot("IN TRANSIT", 18))));

        let job = job(&repo, carrier);
        assert_eq!(job.run_once().await.unwrap().scanned, 1);
        assert_eq!(job.run_once().await.unwrap().scanned, 0);
    }

    #[tokio::test]
    async fn test_carrier_outage_does_not_count_against_order() {
        let order = order("C1", OrderStatus::Shipped);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);

        let mut carrier = MockCarrierClient::new();
        carrier.expect_track_by_awb().returning(|_| {
            Err(FulfillmentError::CircuitOpen {
                service: "shiprocket".to_string(),
            })
        });

        let report = job(&repo, carrier).run_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = repo.get(order.id).unwrap();
        assert_eq!(stored.sync.consecutive_failures, 0);
        assert!(stored.sync.last_synced_at.is_none());
        assert!(stored.sync.last_error.unwrap().contains("熔断"));
    }

    #[tokio::test]
    async fn test_sync_order_bypasses_cache() {
        let order = order("D1", OrderStatus::Shipped);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);

        let mut carrier = MockCarrierClient::new();
        carrier
            .expect_track_by_awb()
            .times(2)
            .returning(|_| Ok(Some(snapshot("IN TRANSIT", 18))));

        let job = job(&repo, carrier);
        let first = job.sync_order(order.id).await.unwrap();
        assert!(matches!(first, OrderSyncResult::Applied(_)));
        let second = job.sync_order(order.id).await.unwrap();
        assert!(matches!(
            second,
            OrderSyncResult::Applied(ApplyResult { outcome: ApplyOutcome::Unchanged, .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_order_requires_shipment_reference() {
        let mut order = order("E1", OrderStatus::Confirmed);
        order.shipment = ShipmentInfo::default();
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);
        let job = job(&repo, MockCarrierClient::new());

        assert!(matches!(
            job.sync_order(order.id).await,
            Err(FulfillmentError::Validation(_))
        ));
        assert!(matches!(
            job.sync_order(Uuid::new_v4()).await,
            Err(FulfillmentError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_overlapping_run_is_refused() {
        let repo = InMemoryOrderRepository::new();
        let job = job(&repo, MockCarrierClient::new());

        let _held = job.running.lock().await;
        assert!(matches!(
            job.run(SyncTrigger::Manual).await,
            Err(FulfillmentError::SyncInProgress)
        ));
    }
}
