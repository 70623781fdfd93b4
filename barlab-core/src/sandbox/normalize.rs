//! Output governance: deep, bounded serialization of sandbox results.
//!
//! Series collapse to their latest value; frames and long collections become
//! summary objects with a bounded tail; non-finite numbers become null;
//! strings are capped. Recursion is depth-limited. The same value always
//! normalizes to the same JSON.

use super::value::Value;
use serde_json::{json, Value as Json};

pub const MAX_LIST_ITEMS: usize = 200;
pub const MAX_DICT_KEYS: usize = 100;
pub const MAX_STR_LEN: usize = 2000;
pub const MAX_DF_PREVIEW_ROWS: usize = 5;
pub const MAX_DF_PREVIEW_COLS: usize = 8;
pub const MAX_DEPTH: usize = 6;

fn cap_str(s: &str) -> Json {
    if s.chars().count() <= MAX_STR_LEN {
        Json::String(s.to_string())
    } else {
        let cut: String = s.chars().take(MAX_STR_LEN).collect();
        Json::String(format!("{cut}..."))
    }
}

fn finite(f: f64) -> Json {
    if f.is_finite() {
        json!(f)
    } else {
        Json::Null
    }
}

/// Normalize a sandbox value for the tool result.
pub fn normalize(value: &Value, depth: usize) -> Json {
    if depth > MAX_DEPTH {
        return cap_str(&value.to_string());
    }

    match value {
        Value::None => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => finite(*f),
        Value::Str(s) => cap_str(s),

        Value::Series(s) => match s.last() {
            Some(v) => finite(*v),
            None => Json::Null,
        },

        Value::Frame(frame) => {
            let rows = frame.len();
            let columns: Vec<&str> = crate::data::COLUMNS
                .iter()
                .take(MAX_DF_PREVIEW_COLS)
                .copied()
                .collect();
            let start = rows.saturating_sub(MAX_DF_PREVIEW_ROWS);
            let tail: Vec<Json> = (start..rows)
                .map(|i| {
                    json!({
                        "date": frame.dates[i].format("%Y-%m-%d").to_string(),
                        "open": finite(frame.open[i]),
                        "high": finite(frame.high[i]),
                        "low": finite(frame.low[i]),
                        "close": finite(frame.close[i]),
                        "volume": finite(frame.volume[i]),
                    })
                })
                .collect();
            json!({
                "_type": "dataframe",
                "shape": [rows, columns.len()],
                "columns": columns,
                "tail": tail,
                "truncated": rows > MAX_DF_PREVIEW_ROWS,
            })
        }

        Value::List(items) | Value::Tuple(items) => {
            if items.len() <= MAX_LIST_ITEMS {
                Json::Array(items.iter().map(|v| normalize(v, depth + 1)).collect())
            } else {
                let start = items.len() - MAX_LIST_ITEMS;
                json!({
                    "_type": "array",
                    "len": items.len(),
                    "tail": items[start..]
                        .iter()
                        .map(|v| normalize(v, depth + 1))
                        .collect::<Vec<Json>>(),
                    "truncated": true,
                })
            }
        }

        Value::Dict(map) => {
            if map.len() <= MAX_DICT_KEYS {
                let mut out = serde_json::Map::new();
                for (k, v) in map.iter() {
                    out.insert(k.clone(), normalize(v, depth + 1));
                }
                Json::Object(out)
            } else {
                let mut items = serde_json::Map::new();
                for (k, v) in map.iter().take(MAX_DICT_KEYS) {
                    items.insert(k.clone(), normalize(v, depth + 1));
                }
                json!({
                    "_type": "dict",
                    "len": map.len(),
                    "items": items,
                    "truncated": true,
                })
            }
        }

        Value::Range { start, end } => {
            let len = (end - start).max(0) as usize;
            if len <= MAX_LIST_ITEMS {
                Json::Array((*start..*end).map(|i| json!(i)).collect())
            } else {
                let tail_start = end - MAX_LIST_ITEMS as i64;
                json!({
                    "_type": "array",
                    "len": len,
                    "tail": (tail_start..*end).map(|i| json!(i)).collect::<Vec<Json>>(),
                    "truncated": true,
                })
            }
        }

        Value::Builtin(_) | Value::Namespace(_) => cap_str(&value.to_string()),
    }
}
