//! Tool result normalization.
//!
//! Workers answer with `result.output`, which is one of:
//! - plain display text
//! - a tagged `{ "text": ..., "structured": {...} }` mapping
//! - a JSON document carrying a `property` marker, either as a mapping or
//!   encoded inside the display string (older Python workers)
//!
//! All of them come out as a [`ToolResult`]: display text plus the
//! structured payload when there is one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field whose presence marks a property-lookup payload.
pub const PROPERTY_MARKER: &str = "property";
const FORMATTED_TEXT: &str = "formatted_text";

/// Normalized outcome of a successful tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: String,
    pub structured_data: Option<Map<String, Value>>,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured_data: None,
        }
    }
}

pub fn normalize(raw: Value) -> ToolResult {
    let payload = match raw {
        Value::Object(mut map) if map.contains_key("output") => {
            map.remove("output").unwrap_or(Value::Null)
        }
        other => other,
    };

    match payload {
        Value::Null => ToolResult::text(""),
        Value::String(text) => from_text(text),
        Value::Object(map) => from_mapping(map),
        other => ToolResult::text(other.to_string()),
    }
}

fn from_text(text: String) -> ToolResult {
    if text.contains(PROPERTY_MARKER)
        && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text)
        && map.contains_key(PROPERTY_MARKER)
    {
        let content = formatted_text(&map).unwrap_or(text);
        return ToolResult {
            content,
            structured_data: Some(map),
        };
    }
    ToolResult::text(text)
}

fn from_mapping(mut map: Map<String, Value>) -> ToolResult {
    if is_tagged(&map) {
        let content = match map.remove("text") {
            Some(Value::String(text)) => text,
            _ => String::new(),
        };
        let structured_data = match map.remove("structured") {
            Some(Value::Object(structured)) => Some(structured),
            _ => None,
        };
        return ToolResult {
            content,
            structured_data,
        };
    }

    if map.contains_key(PROPERTY_MARKER) {
        let content = formatted_text(&map).unwrap_or_else(|| compact(&map));
        return ToolResult {
            content,
            structured_data: Some(map),
        };
    }

    ToolResult::text(compact(&map))
}

/// `{text: string, structured?: mapping | null}` and nothing else.
fn is_tagged(map: &Map<String, Value>) -> bool {
    matches!(map.get("text"), Some(Value::String(_)))
        && matches!(
            map.get("structured"),
            None | Some(Value::Null) | Some(Value::Object(_))
        )
        && map.keys().all(|k| k == "text" || k == "structured")
}

fn formatted_text(map: &Map<String, Value>) -> Option<String> {
    map.get(FORMATTED_TEXT)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn compact(map: &Map<String, Value>) -> String {
    Value::Object(map.clone()).to_string()
}
