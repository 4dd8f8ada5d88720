//! Worker-side request loop.
//!
//! The counterpart of the bridge: reads request lines (normally stdin),
//! dispatches each to a [`ToolHandler`] on its own task, and writes one
//! response line per request (normally stdout). Responses go out in
//! completion order, not request order.
//!
//! Stdout is the protocol channel. Anything else a worker wants to say
//! belongs on stderr, where the supervisor picks it up as log lines.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{Frame, JsonLineCodec};
use crate::bridge::protocol::{
    INVALID_REQUEST, METHOD_NOT_FOUND, Method, PARSE_ERROR, RequestId, RpcError, RpcRequest,
    RpcResponse, TOOL_ERROR, ToolDescriptor, ToolOutput,
};

/// Implemented by anything that can serve tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Catalog returned for `list_tools`.
    fn tools(&self) -> Vec<ToolDescriptor>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>)
    -> Result<ToolOutput, ToolError>;
}

/// Tool failure; reported to the bridge as a `-32000` error with this message.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool(name.into())
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Serve requests from `reader` until it closes.
///
/// Returns once every in-flight call has answered and the last response
/// line is flushed.
pub async fn run_worker<H, R, W>(handler: Arc<H>, reader: R, writer: W) -> io::Result<()>
where
    H: ToolHandler,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut requests = FramedRead::new(reader, JsonLineCodec::<Value>::new());
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();

    let writer_task = tokio::spawn(async move {
        let mut responses = FramedWrite::new(writer, JsonLineCodec::<RpcResponse>::new());
        while let Some(response) = rx.recv().await {
            responses.send(response).await?;
        }
        Ok::<_, io::Error>(())
    });

    tracing::info!(tools = handler.tools().len(), "Worker ready");

    while let Some(frame) = requests.next().await {
        let value = match frame? {
            Frame::Message(value) => value,
            Frame::Malformed(line) => {
                tracing::warn!(reason = %line.reason, "Unparseable request line");
                let error = RpcError::new(PARSE_ERROR, format!("Parse error: {}", line.reason));
                let _ = tx.send(RpcResponse::failure(None, error));
                continue;
            }
        };

        let request = match decode_request(value) {
            Ok(request) => request,
            Err(response) => {
                let _ = tx.send(response);
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = dispatch(handler.as_ref(), request).await;
            let _ = tx.send(response);
        });
    }

    tracing::info!("Request stream closed, finishing in-flight calls");
    // Writer ends once every dispatch task has dropped its sender.
    drop(tx);
    writer_task.await.map_err(io::Error::other)?
}

fn decode_request(value: Value) -> Result<RpcRequest, RpcResponse> {
    let Some(id) = value.get("id").and_then(Value::as_u64).map(RequestId::new) else {
        return Err(RpcResponse::failure(
            None,
            RpcError::new(INVALID_REQUEST, "Invalid request: missing or non-integer id"),
        ));
    };

    match value.get("method").and_then(Value::as_str) {
        Some(m) if m == Method::CallTool.as_str() || m == Method::ListTools.as_str() => {}
        Some(other) => {
            return Err(RpcResponse::failure(
                Some(id),
                RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {other}")),
            ));
        }
        None => {
            return Err(RpcResponse::failure(
                Some(id),
                RpcError::new(INVALID_REQUEST, "Invalid request: missing method"),
            ));
        }
    }

    serde_json::from_value(value).map_err(|e| {
        RpcResponse::failure(
            Some(id),
            RpcError::new(INVALID_REQUEST, format!("Invalid request: {e}")),
        )
    })
}

async fn dispatch<H: ToolHandler + ?Sized>(handler: &H, request: RpcRequest) -> RpcResponse {
    let id = request.id;
    match (request.method, request.params) {
        (Method::ListTools, _) => RpcResponse::success(id, json!({ "tools": handler.tools() })),
        (Method::CallTool, None) => RpcResponse::failure(
            Some(id),
            RpcError::new(INVALID_REQUEST, "Invalid request: missing params"),
        ),
        (Method::CallTool, Some(call)) => {
            tracing::debug!(%id, tool = %call.name, "Calling tool");
            match handler.call_tool(&call.name, call.arguments).await {
                Ok(output) => match serde_json::to_value(output) {
                    Ok(output) => RpcResponse::success(id, json!({ "output": output })),
                    Err(e) => RpcResponse::failure(Some(id), RpcError::new(TOOL_ERROR, e.to_string())),
                },
                Err(e) => {
                    tracing::debug!(%id, tool = %call.name, error = %e, "Tool failed");
                    RpcResponse::failure(Some(id), RpcError::new(TOOL_ERROR, e.to_string()))
                }
            }
        }
    }
}
