//! 轨迹查询回退链
//!
//! 商家填写的 AWB 经常缺失或有误，按 AWB -> 承运商运单号 -> 承运商订单号
//! 的顺序依次尝试，任一标识查到轨迹即返回。

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{CarrierClient, TrackingCache, TrackingSnapshot};
use crate::error::{FulfillmentError, Result};
use crate::models::ShipmentInfo;

/// 查到轨迹所使用的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupVia {
    Awb,
    ShipmentId,
    OrderId,
}

impl LookupVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Awb => "awb",
            Self::ShipmentId => "shipment_id",
            Self::OrderId => "order_id",
        }
    }
}

impl fmt::Display for LookupVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found {
        snapshot: TrackingSnapshot,
        via: LookupVia,
    },
    NotFound,
}

/// 承运商整体不可用时停止回退，换其他标识查询也只会浪费额度
fn aborts_fallback(err: &FulfillmentError) -> bool {
    err.is_retryable() || matches!(err, FulfillmentError::CircuitOpen { .. })
}

fn cache_key(via: LookupVia, id: &str) -> String {
    format!("{}:{}", via.as_str(), id)
}

/// 按回退顺序列出非空标识
fn candidates(shipment: &ShipmentInfo) -> impl Iterator<Item = (LookupVia, &str)> {
    [
        (LookupVia::Awb, shipment.awb_code.as_deref()),
        (LookupVia::ShipmentId, shipment.carrier_shipment_id.as_deref()),
        (LookupVia::OrderId, shipment.carrier_order_id.as_deref()),
    ]
    .into_iter()
    .filter_map(|(via, id)| {
        id.map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| (via, id))
    })
}

#[derive(Clone)]
pub struct TrackingLookup {
    carrier: Arc<dyn CarrierClient>,
    cache: TrackingCache,
}

impl TrackingLookup {
    pub fn new(carrier: Arc<dyn CarrierClient>, cache: TrackingCache) -> Self {
        Self { carrier, cache }
    }

    pub fn cache(&self) -> &TrackingCache {
        &self.cache
    }

    /// 丢弃运单所有标识的缓存，手动同步时强制回源
    pub fn invalidate(&self, shipment: &ShipmentInfo) {
        for (via, id) in candidates(shipment) {
            self.cache.invalidate(&cache_key(via, id));
        }
    }

    async fn query(&self, via: LookupVia, id: &str) -> Result<Option<TrackingSnapshot>> {
        let key = cache_key(via, id);
        let carrier = &self.carrier;
        self.cache
            .get_or_fetch(&key, || async move {
                match via {
                    LookupVia::Awb => carrier.track_by_awb(id).await,
                    LookupVia::ShipmentId => carrier.track_by_shipment_id(id).await,
                    LookupVia::OrderId => carrier.track_by_order_id(id).await,
                }
            })
            .await
    }

    /// 按回退链查询运单轨迹
    pub async fn lookup(&self, shipment: &ShipmentInfo) -> Result<LookupOutcome> {
        for (via, id) in candidates(shipment) {
            match self.query(via, id).await {
                Ok(Some(snapshot)) => return Ok(LookupOutcome::Found { snapshot, via }),
                Ok(None) => debug!(via = %via, id, "该标识暂无轨迹，尝试下一个"),
                Err(e) if aborts_fallback(&e) => return Err(e),
                Err(e) => warn!(via = %via, id, error = %e, "该标识查询失败，尝试下一个"),
            }
        }

        Ok(LookupOutcome::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::MockCarrierClient;
    use std::time::Duration;

    fn snapshot() -> TrackingSnapshot {
        TrackingSnapshot {
            awb_code: Some("AWB1".to_string()),
            carrier_status: "IN TRANSIT".to_string(),
            status_code: Some(18),
            courier_name: Some("Delhivery".to_string()),
            etd: None,
            activities: vec![],
        }
    }

    fn shipment() -> ShipmentInfo {
        ShipmentInfo {
            awb_code: Some("AWB1".to_string()),
            carrier_shipment_id: Some("5001".to_string()),
            carrier_order_id: Some("9001".to_string()),
            ..Default::default()
        }
    }

    fn lookup(mock: MockCarrierClient) -> TrackingLookup {
        TrackingLookup::new(Arc::new(mock), TrackingCache::new(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_found_by_awb_skips_fallbacks() {
        let mut mock = MockCarrierClient::new();
        mock.expect_track_by_awb()
            .times(1)
            .returning(|_| Ok(Some(snapshot())));
        mock.expect_track_by_shipment_id().never();
        mock.expect_track_by_order_id().never();

        let outcome = lookup(mock).lookup(&shipment()).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::Found { via: LookupVia::Awb, .. }));
    }

    #[tokio::test]
    async fn test_falls_back_to_order_id() {
        let mut mock = MockCarrierClient::new();
        mock.expect_track_by_awb().times(1).returning(|_| Ok(None));
        // 非瞬时错误不阻断回退
        mock.expect_track_by_shipment_id().times(1).returning(|_| {
            Err(FulfillmentError::Carrier {
                status: Some(422),
                message: "invalid shipment".to_string(),
            })
        });
        mock.expect_track_by_order_id()
            .withf(|id| id == "9001")
            .times(1)
            .returning(|_| Ok(Some(snapshot())));

        let outcome = lookup(mock).lookup(&shipment()).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::Found { via: LookupVia::OrderId, .. }));
    }

    #[tokio::test]
    async fn test_outage_aborts_fallback() {
        let mut mock = MockCarrierClient::new();
        mock.expect_track_by_awb().times(1).returning(|_| {
            Err(FulfillmentError::CircuitOpen {
                service: "shiprocket".to_string(),
            })
        });
        mock.expect_track_by_shipment_id().never();
        mock.expect_track_by_order_id().never();

        let err = lookup(mock).lookup(&shipment()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_no_identifiers_is_not_found() {
        let mock = MockCarrierClient::new();
        let shipment = ShipmentInfo {
            awb_code: Some(" ".to_string()),
            ..Default::default()
        };

        let outcome = lookup(mock).lookup(&shipment).await.unwrap();
        assert_eq!(outcome, LookupOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_repeated_lookup_served_from_cache() {
        let mut mock = MockCarrierClient::new();
        mock.expect_track_by_awb()
            .times(1)
            .returning(|_| Ok(Some(snapshot())));

        let lookup = lookup(mock);
        lookup.lookup(&shipment()).await.unwrap();
        let outcome = lookup.lookup(&shipment()).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::Found { .. }));
    }
}
