//! Shiprocket 报文结构
//!
//! 承运商的报文字段类型并不稳定（数字有时以字符串下发，日期格式不统一），
//! 所有字段都按宽松规则解析，解析不了的字段置空而不是整体失败。

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{TrackingActivity, TrackingSnapshot};

/// 登录请求
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// 登录响应
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// 取消订单请求
#[derive(Debug, Serialize)]
pub struct CancelRequest {
    pub ids: Vec<i64>,
}

/// 轨迹查询结果中的 `tracking_data`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TrackingData {
    pub track_status: Option<Value>,
    pub shipment_status: Option<Value>,
    #[serde(deserialize_with = "null_as_empty")]
    pub shipment_track: Vec<ShipmentTrack>,
    pub shipment_track_activities: Option<Vec<TrackActivity>>,
    pub etd: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShipmentTrack {
    pub awb_code: Option<String>,
    pub courier_name: Option<String>,
    pub current_status: Option<String>,
    pub edd: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TrackActivity {
    pub date: Option<String>,
    pub status: Option<String>,
    pub activity: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "sr-status")]
    pub sr_status: Option<Value>,
    #[serde(rename = "sr-status-label")]
    pub sr_status_label: Option<String>,
}

/// 承运商推送的 webhook 报文
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookPayload {
    pub awb: Option<Value>,
    pub courier_name: Option<String>,
    pub current_status: Option<String>,
    pub current_status_id: Option<Value>,
    pub shipment_status: Option<String>,
    pub shipment_status_id: Option<Value>,
    pub current_timestamp: Option<String>,
    pub order_id: Option<Value>,
    pub sr_order_id: Option<Value>,
    pub etd: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub scans: Vec<TrackActivity>,
}

/// 承运商会用 `null` 表示空列表
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// 数字字段可能以数字或字符串下发
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 解析承运商时间
///
/// 不带时区的时间按印度标准时间（UTC+05:30）解释。
pub fn parse_carrier_time(raw: &str) -> Option<DateTime<Utc>> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%d %m %Y %H:%M:%S",
        "%d-%m-%Y %H:%M:%S",
    ];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60)?;
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| ist.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
}

/// 在响应中定位 `tracking_data`
///
/// 按 AWB 查询时位于顶层；按运单号查询时外面包一层 `{"<id>": {...}}`；
/// 按订单号查询时是数组 `[{"<id>": {...}}]`。
pub fn find_tracking_data(value: &Value) -> Option<&Value> {
    fn search(value: &Value, depth: u8) -> Option<&Value> {
        if depth > 3 {
            return None;
        }
        match value {
            Value::Object(map) => map
                .get("tracking_data")
                .or_else(|| map.values().find_map(|v| search(v, depth + 1))),
            Value::Array(items) => items.iter().find_map(|v| search(v, depth + 1)),
            _ => None,
        }
    }
    search(value, 0)
}

impl TrackActivity {
    fn into_activity(self) -> Option<TrackingActivity> {
        let occurred_at = self.date.as_deref().and_then(parse_carrier_time)?;
        let status_text = self
            .sr_status_label
            .filter(|s| !s.trim().is_empty() && s.trim() != "NA")
            .or_else(|| self.activity.clone())
            .or(self.status)?;

        Some(TrackingActivity {
            occurred_at,
            status_text,
            status_code: self.sr_status.as_ref().and_then(value_as_i64),
            activity: self.activity,
            location: self.location,
        })
    }
}

fn collect_activities(raw: Vec<TrackActivity>) -> Vec<TrackingActivity> {
    raw.into_iter().filter_map(TrackActivity::into_activity).collect()
}

/// 最近一条扫描的状态，作为缺少当前状态字段时的兜底
fn latest_status(activities: &[TrackingActivity]) -> Option<&TrackingActivity> {
    activities.iter().max_by_key(|a| a.occurred_at)
}

impl TrackingData {
    /// 转换为快照；承运商尚无轨迹时返回 None
    pub fn into_snapshot(self) -> Option<TrackingSnapshot> {
        let track_status = self.track_status.as_ref().and_then(value_as_i64);
        if track_status == Some(0) || self.error.is_some() {
            return None;
        }

        let activities = collect_activities(self.shipment_track_activities.unwrap_or_default());
        let track = self.shipment_track.into_iter().next().unwrap_or_default();
        let status_code = self.shipment_status.as_ref().and_then(value_as_i64);

        let carrier_status = track
            .current_status
            .filter(|s| !s.trim().is_empty())
            .or_else(|| latest_status(&activities).map(|a| a.status_text.clone()))?;

        let etd = self
            .etd
            .as_deref()
            .or(track.edd.as_deref())
            .and_then(parse_carrier_time);

        Some(TrackingSnapshot {
            awb_code: track.awb_code.filter(|s| !s.trim().is_empty()),
            carrier_status,
            status_code,
            courier_name: track.courier_name,
            etd,
            activities,
        })
    }
}

impl WebhookPayload {
    pub fn awb(&self) -> Option<String> {
        self.awb.as_ref().and_then(value_as_string)
    }

    /// 转换为快照；缺少状态文本的推送无法处理，返回 None
    pub fn into_snapshot(self) -> Option<TrackingSnapshot> {
        let awb_code = self.awb();
        let status_code = self
            .shipment_status_id
            .as_ref()
            .or(self.current_status_id.as_ref())
            .and_then(value_as_i64);
        let carrier_status = self
            .current_status
            .or(self.shipment_status)
            .filter(|s| !s.trim().is_empty())?;

        let mut activities = collect_activities(self.scans);
        // 部分推送不带 scans，只有当前状态和时间戳
        if activities.is_empty() {
            if let Some(at) = self.current_timestamp.as_deref().and_then(parse_carrier_time) {
                activities.push(TrackingActivity {
                    occurred_at: at,
                    status_text: carrier_status.clone(),
                    status_code,
                    activity: None,
                    location: None,
                });
            }
        }

        Some(TrackingSnapshot {
            awb_code,
            carrier_status,
            status_code,
            courier_name: self.courier_name,
            etd: self.etd.as_deref().and_then(parse_carrier_time),
            activities,
        })
    }
}
