//! Wire protocol types for bridge-worker communication.
//!
//! One channel, the worker's stdin/stdout, one JSON document per line:
//! - **Requests** (bridge to worker): `call_tool`, `list_tools`
//! - **Responses** (worker to bridge): matched to requests by `id`, in any order

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Line was not valid JSON (or not a request).
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Tool ran and failed (unknown tool, bad arguments, lookup error).
pub const TOOL_ERROR: i64 = -32000;

/// Correlation id linking a request to its response.
///
/// Allocated by the correlator starting at 1 and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    CallTool,
    ListTools,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallTool => "call_tool",
            Self::ListTools => "list_tools",
        }
    }
}

/// Parameters of a `call_tool` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Request from bridge to worker. Serialized to exactly one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ToolCall>,
}

impl RpcRequest {
    pub fn call_tool(id: RequestId, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: Method::CallTool,
            params: Some(ToolCall {
                name: name.into(),
                arguments,
            }),
        }
    }

    pub fn list_tools(id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: Method::ListTools,
            params: None,
        }
    }

    /// Tool name for `call_tool`, for log fields.
    pub fn tool_name(&self) -> Option<&str> {
        self.params.as_ref().map(|p| p.name.as_str())
    }
}

/// Error object carried by a failed response.
///
/// Parsed leniently: a bare string is taken as the message, and any other
/// non-object value as its JSON text, so the call still gets rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct RpcError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<Value> for RpcError {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut map) => Self {
                code: map.get("code").and_then(Value::as_i64),
                message: match map.remove("message") {
                    Some(Value::String(message)) => message,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
                data: map.remove("data").filter(|data| !data.is_null()),
            },
            Value::String(message) => Self {
                code: None,
                message,
                data: None,
            },
            other => Self {
                code: None,
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            data: None,
        }
    }
}

/// Response from worker to bridge.
///
/// `id` is absent or null on replies to lines the worker could not parse;
/// those never match a pending call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl RpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Error wins over result; a response with neither yields `null`.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Tagged tool output: display text plus an optional machine-readable payload.
///
/// Workers built on [`crate::worker::run_worker`] emit this as
/// `result.output`, so the bridge never has to sniff JSON out of a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Map<String, Value>>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    pub fn with_structured(mut self, structured: Map<String, Value>) -> Self {
        self.structured = Some(structured);
        self
    }
}

/// Tool catalog entry as returned by `list_tools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema", alias = "inputSchema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}
