//! 轨迹快照落库
//!
//! 定时同步和承运商 Webhook 推送都经由 `ShipmentReconciler::apply_snapshot`
//! 写入订单，保证两条链路的去重、状态机校验和通知行为一致。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use storefront_shared::observability::metrics::record_status_transition;
use tracing::{debug, info, instrument, warn};

use crate::carrier::TrackingSnapshot;
use crate::error::Result;
use crate::models::{
    CancelActor, Cancellation, EventSource, Order, OrderStatus, PaymentMethod, ShippingEvent,
};
use crate::notification::{NotificationDispatcher, NotificationKind};
use crate::refund::{RefundOutcome, RefundService};
use crate::repository::OrderRepository;
use crate::status_mapper::{RejectReason, StatusMapper, Transition, evaluate_transition};

/// 快照对订单状态的影响
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Updated { from: OrderStatus, to: OrderStatus },
    Unchanged,
    Rejected { mapped: OrderStatus, reason: RejectReason },
    /// 承运商状态无法识别，只记录轨迹
    Unmapped { carrier_status: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyResult {
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
    /// 新增的轨迹条数
    pub events_added: usize,
    pub notified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundOutcome>,
}

/// 退回、丢件或承运商侧取消后需要自动退款
fn triggers_refund(to: OrderStatus) -> bool {
    matches!(
        to,
        OrderStatus::Returned | OrderStatus::Lost | OrderStatus::Cancelled
    )
}

pub struct ShipmentReconciler {
    repo: Arc<dyn OrderRepository>,
    mapper: StatusMapper,
    notifier: NotificationDispatcher,
    refunds: Arc<RefundService>,
}

impl ShipmentReconciler {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        mapper: StatusMapper,
        notifier: NotificationDispatcher,
        refunds: Arc<RefundService>,
    ) -> Self {
        Self {
            repo,
            mapper,
            notifier,
            refunds,
        }
    }

    pub fn mapper(&self) -> &StatusMapper {
        &self.mapper
    }

    /// 合并扫描记录，返回新增条数
    fn merge_activities(&self, order: &mut Order, snapshot: &TrackingSnapshot, source: EventSource) -> usize {
        snapshot
            .activities
            .iter()
            .filter(|a| !a.status_text.trim().is_empty())
            .map(|a| ShippingEvent {
                status: self.mapper.map(a.status_code, &a.status_text),
                carrier_status: a.status_text.trim().to_string(),
                activity: a.activity.clone(),
                location: a.location.clone(),
                occurred_at: a.occurred_at,
                source,
            })
            .filter(|event| order.append_event(event.clone()))
            .count()
    }

    fn merge_shipment(order: &mut Order, snapshot: &TrackingSnapshot) {
        let shipment = &mut order.shipment;
        if shipment.awb_code.as_deref().is_none_or(|awb| awb.trim().is_empty()) {
            shipment.awb_code = snapshot.awb_code.clone();
        }
        if snapshot.courier_name.is_some() {
            shipment.courier_name = snapshot.courier_name.clone();
        }
        if snapshot.etd.is_some() {
            shipment.etd = snapshot.etd;
        }
        if !snapshot.carrier_status.trim().is_empty() {
            shipment.last_carrier_status = Some(snapshot.carrier_status.trim().to_string());
        }
    }

    /// 把一次轨迹快照写入订单
    ///
    /// 1. 合并扫描记录（按承运商状态 + 时间去重，重放幂等）
    /// 2. 更新运单字段
    /// 3. 映射当前状态并经状态机校验
    /// 4. 持久化（同时刷新同步簿记）
    /// 5. 状态变化时通知买家，退回 / 丢件 / 承运商取消的在线支付订单自动退款
    #[instrument(skip(self, order, snapshot), fields(order_id = %order.id, source = source.as_str()))]
    pub async fn apply_snapshot(
        &self,
        order: &mut Order,
        snapshot: TrackingSnapshot,
        source: EventSource,
    ) -> Result<ApplyResult> {
        let events_added = self.merge_activities(order, &snapshot, source);
        Self::merge_shipment(order, &snapshot);

        let outcome = match self.mapper.map(snapshot.status_code, &snapshot.carrier_status) {
            None => {
                warn!(
                    carrier_status = %snapshot.carrier_status,
                    status_code = ?snapshot.status_code,
                    "未识别的承运商状态，仅记录轨迹"
                );
                ApplyOutcome::Unmapped {
                    carrier_status: snapshot.carrier_status.clone(),
                }
            }
            Some(mapped) => match evaluate_transition(order.status, mapped) {
                Transition::Apply { from, to, .. } => {
                    order.status = to;
                    if to == OrderStatus::Cancelled && order.cancellation.is_none() {
                        order.cancellation = Some(Cancellation {
                            actor: CancelActor::System,
                            reason: format!("承运商取消运单: {}", snapshot.carrier_status.trim()),
                            cancelled_at: Utc::now(),
                        });
                    }
                    ApplyOutcome::Updated { from, to }
                }
                Transition::Unchanged => ApplyOutcome::Unchanged,
                Transition::Rejected(reason) => {
                    debug!(current = %order.status, mapped = %mapped, reason = %reason, "忽略状态变化");
                    ApplyOutcome::Rejected { mapped, reason }
                }
            },
        };

        order.sync.last_synced_at = Some(Utc::now());
        order.sync.consecutive_failures = 0;
        order.sync.last_error = None;
        order.touch();
        self.repo.update(order).await?;

        let mut result = ApplyResult {
            outcome,
            events_added,
            notified: false,
            refund: None,
        };

        let ApplyOutcome::Updated { from, to } = result.outcome else {
            return Ok(result);
        };

        record_status_transition(from.as_str(), to.as_str(), source.as_str());
        info!(from = %from, to = %to, events_added, "订单物流状态已更新");

        if let Some(kind) = NotificationKind::from_transition(to) {
            result.notified = self.notifier.notify(kind, order).await.is_sent();
        }

        if triggers_refund(to) && order.payment.method == PaymentMethod::Prepaid {
            // 状态已落库，退款失败只记录日志，由人工或重试接口处理
            match self.refunds.process_refund(order).await {
                Ok(refund) => result.refund = Some(refund),
                Err(e) => warn!(error = %e, "自动退款失败"),
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{MockCarrierClient, TrackingActivity};
    use crate::gateway::{GatewayRefund, GatewayRefundStatus, MockPaymentGateway};
    use crate::models::{CustomerContact, RefundStatus, ShipmentInfo};
    use crate::notification::{MockEmailSender, SendReceipt};
    use crate::refund::RefundPolicy;
    use crate::repository::InMemoryOrderRepository;
    use chrono::{DateTime, Duration, TimeZone};
    use storefront_shared::config::EmailConfig;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn order(status: OrderStatus, method: PaymentMethod) -> Order {
        let order = Order::new(
            "ORD-55",
            "vendor-1",
            CustomerContact {
                id: "c1".to_string(),
                name: "Priya".to_string(),
                email: Some("priya@example.com".to_string()),
            },
            method,
            40_000,
        )
        .with_status(status)
        .with_shipment(ShipmentInfo {
            awb_code: Some("AWB55".to_string()),
            ..Default::default()
        });
        match method {
            PaymentMethod::Prepaid => order.paid_via("pay_55"),
            PaymentMethod::Cod => order,
        }
    }

    fn activity(text: &str, code: i64, minutes: i64) -> TrackingActivity {
        TrackingActivity {
            occurred_at: base_time() + Duration::minutes(minutes),
            status_text: text.to_string(),
            status_code: Some(code),
            activity: Some(format!("{text} scan")),
            location: Some("Mumbai".to_string()),
        }
    }

    fn snapshot(status: &str, code: i64, activities: Vec<TrackingActivity>) -> TrackingSnapshot {
        TrackingSnapshot {
            awb_code: Some("AWB55".to_string()),
            carrier_status: status.to_string(),
            status_code: Some(code),
            courier_name: Some("Delhivery".to_string()),
            etd: None,
            activities,
        }
    }

    fn sender(expected_sends: usize) -> MockEmailSender {
        let mut sender = MockEmailSender::new();
        sender.expect_send().times(expected_sends).returning(|_| {
            Ok(SendReceipt {
                provider: "mock",
                message_id: Some("m".to_string()),
            })
        });
        sender
    }

    fn reconciler(
        repo: &InMemoryOrderRepository,
        gateway: MockPaymentGateway,
        sender: MockEmailSender,
    ) -> ShipmentReconciler {
        let repo: Arc<dyn OrderRepository> = Arc::new(repo.clone());
        let notifier = NotificationDispatcher::new(Arc::new(sender), &EmailConfig::default());
        let refunds = Arc::new(RefundService::new(
            repo.clone(),
            Arc::new(gateway),
            Arc::new(MockCarrierClient::new()),
            notifier.clone(),
            RefundPolicy::default(),
        ));
        ShipmentReconciler::new(repo, StatusMapper::new(), notifier, refunds)
    }

    #[tokio::test]
    async fn test_forward_progress_updates_and_notifies() {
        let mut order = order(OrderStatus::Processing, PaymentMethod::Cod);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);
        let r = reconciler(&repo, MockPaymentGateway::new(), sender(1));

        let snap = snapshot(
            "PICKED UP",
            42,
            vec![activity("PICKUP SCHEDULED", 19, 0), activity("PICKED UP", 42, 30)],
        );
        let result = r.apply_snapshot(&mut order, snap, EventSource::Sync).await.unwrap();

        assert_eq!(
            result.outcome,
            ApplyOutcome::Updated {
                from: OrderStatus::Processing,
                to: OrderStatus::Shipped
            }
        );
        assert_eq!(result.events_added, 2);
        assert!(result.notified);

        let stored = repo.get(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Shipped);
        assert_eq!(stored.shipment.courier_name.as_deref(), Some("Delhivery"));
        assert_eq!(stored.shipment.last_carrier_status.as_deref(), Some("PICKED UP"));
        assert!(stored.sync.last_synced_at.is_some());
        assert_eq!(stored.shipping_history[1].status, Some(OrderStatus::Shipped));
    }

    #[tokio::test]
    async fn test_replayed_snapshot_is_idempotent() {
        let mut order = order(OrderStatus::Shipped, PaymentMethod::Cod);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);
        // 派送中只通知一次
        let r = reconciler(&repo, MockPaymentGateway::new(), sender(1));

        let snap = snapshot(
            "OUT FOR DELIVERY",
            17,
            vec![activity("IN TRANSIT", 18, 0), activity("OUT FOR DELIVERY", 17, 60)],
        );
        r.apply_snapshot(&mut order, snap.clone(), EventSource::Sync).await.unwrap();
        let second = r.apply_snapshot(&mut order, snap, EventSource::Webhook).await.unwrap();

        assert_eq!(second.outcome, ApplyOutcome::Unchanged);
        assert_eq!(second.events_added, 0);
        assert!(!second.notified);
        assert_eq!(repo.get(order.id).unwrap().shipping_history.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_and_terminal_updates_are_rejected() {
        let mut order = order(OrderStatus::OutForDelivery, PaymentMethod::Cod);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);
        let r = reconciler(&repo, MockPaymentGateway::new(), sender(0));

        let stale = r
            .apply_snapshot(&mut order, snapshot("IN TRANSIT", 18, vec![]), EventSource::Sync)
            .await
            .unwrap();
        assert_eq!(
            stale.outcome,
            ApplyOutcome::Rejected {
                mapped: OrderStatus::InTransit,
                reason: RejectReason::Stale
            }
        );

        order.status = OrderStatus::Delivered;
        let terminal = r
            .apply_snapshot(&mut order, snapshot("RTO INITIATED", 9, vec![]), EventSource::Sync)
            .await
            .unwrap();
        assert!(matches!(
            terminal.outcome,
            ApplyOutcome::Rejected { reason: RejectReason::Terminal, .. }
        ));
        assert_eq!(repo.get(order.id).unwrap().status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_unknown_status_only_records_history() {
        let mut order = order(OrderStatus::InTransit, PaymentMethod::Cod);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);
        let r = reconciler(&repo, MockPaymentGateway::new(), sender(0));

        let mut snap = snapshot("CUSTOMS HOLD", 999, vec![]);
        snap.activities.push(TrackingActivity {
            status_code: None,
            ..activity("CUSTOMS HOLD", 0, 5)
        });
        let result = r.apply_snapshot(&mut order, snap, EventSource::Sync).await.unwrap();

        assert!(matches!(result.outcome, ApplyOutcome::Unmapped { .. }));
        let stored = repo.get(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::InTransit);
        assert_eq!(stored.shipping_history.len(), 1);
        assert_eq!(stored.shipping_history[0].status, None);
    }

    #[tokio::test]
    async fn test_return_of_prepaid_order_triggers_refund() {
        let mut order = order(OrderStatus::RtoInitiated, PaymentMethod::Prepaid);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_refund()
            .withf(|req| req.payment_id == "pay_55" && req.amount == 40_000)
            .times(1)
            .returning(|req| {
                Ok(GatewayRefund {
                    id: "rfnd_55".to_string(),
                    payment_id: Some(req.payment_id),
                    amount: req.amount,
                    status: GatewayRefundStatus::Pending,
                })
            });
        // 退回通知 + 退款发起通知
        let r = reconciler(&repo, gateway, sender(2));

        let result = r
            .apply_snapshot(&mut order, snapshot("RTO DELIVERED", 10, vec![]), EventSource::Webhook)
            .await
            .unwrap();

        assert!(matches!(result.refund, Some(RefundOutcome::Initiated(_))));
        let stored = repo.get(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Returned);
        assert_eq!(stored.refund.unwrap().status, RefundStatus::Pending);
    }

    #[tokio::test]
    async fn test_carrier_cancellation_of_prepaid_order_triggers_refund() {
        let mut order = order(OrderStatus::InTransit, PaymentMethod::Prepaid);
        let repo = InMemoryOrderRepository::with_orders([order.clone()]);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_refund()
            .withf(|req| req.payment_id == "pay_55" && req.amount == 40_000)
            .times(1)
            .returning(|req| {
                Ok(GatewayRefund {
                    id: "rfnd_56".to_string(),
                    payment_id: Some(req.payment_id),
                    amount: req.amount,
                    status: GatewayRefundStatus::Pending,
                })
            });
        // 取消通知 + 退款发起通知
        let r = reconciler(&repo, gateway, sender(2));

        let result = r
            .apply_snapshot(&mut order, snapshot("CANCELED", 8, vec![]), EventSource::Sync)
            .await
            .unwrap();

        assert_eq!(
            result.outcome,
            ApplyOutcome::Updated {
                from: OrderStatus::InTransit,
                to: OrderStatus::Cancelled
            }
        );
        assert!(matches!(result.refund, Some(RefundOutcome::Initiated(_))));

        let stored = repo.get(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        let cancellation = stored.cancellation.unwrap();
        assert_eq!(cancellation.actor, CancelActor::System);
        assert!(cancellation.reason.contains("CANCELED"));
        let ledger = stored.refund.unwrap();
        assert_eq!(ledger.status, RefundStatus::Pending);
        assert_eq!(ledger.refund_id.as_deref(), Some("rfnd_56"));
        assert_eq!(ledger.reason, Some(cancellation.reason));
    }

    #[test]
    fn test_apply_result_serialization() {
        let result = ApplyResult {
            outcome: ApplyOutcome::Rejected {
                mapped: OrderStatus::InTransit,
                reason: RejectReason::Stale,
            },
            events_added: 0,
            notified: false,
            refund: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["result"], "rejected");
        assert_eq!(json["reason"], "stale_update");
        assert_eq!(json["mapped"], "IN_TRANSIT");
        assert!(json.get("refund").is_none());
    }
}
