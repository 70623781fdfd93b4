//! Engine events — the one-way stream Engine → Runner → agent context.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// What happened to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineEventKind {
    Fill,
    Expired,
    Cancelled,
}

impl EngineEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineEventKind::Fill => "fill",
            EngineEventKind::Expired => "expired",
            EngineEventKind::Cancelled => "cancelled",
        }
    }
}

/// A structured engine event. Drained by the runner once per bar.
///
/// `detail` payloads: fill carries `{price, quantity, side}`; expired and
/// cancelled carry an empty map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub kind: EngineEventKind,
    pub bar_index: usize,
    pub datetime: NaiveDateTime,
    pub order_id: String,
    pub symbol: String,
    pub detail: serde_json::Map<String, serde_json::Value>,
}

impl EngineEvent {
    /// Flatten into the map shape the context assembler consumes:
    /// `{type, order_id, symbol, ...detail}`.
    pub fn to_context_map(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("type".into(), self.kind.as_str().into());
        map.insert("order_id".into(), self.order_id.clone().into());
        map.insert("symbol".into(), self.symbol.clone().into());
        for (k, v) in &self.detail {
            map.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn fill_event_flattens_detail() {
        let mut detail = serde_json::Map::new();
        detail.insert("price".into(), serde_json::json!(104.0));
        detail.insert("quantity".into(), serde_json::json!(100));
        detail.insert("side".into(), serde_json::json!("buy"));
        let event = EngineEvent {
            kind: EngineEventKind::Fill,
            bar_index: 1,
            datetime: NaiveDate::from_ymd_opt(2024, 1, 3)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            order_id: "a1b2c3d4".into(),
            symbol: "AAPL".into(),
            detail,
        };
        let map = event.to_context_map();
        assert_eq!(map["type"], "fill");
        assert_eq!(map["price"], 104.0);
        assert_eq!(map["side"], "buy");
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&EngineEventKind::Expired).unwrap();
        assert_eq!(json, "\"expired\"");
    }
}
