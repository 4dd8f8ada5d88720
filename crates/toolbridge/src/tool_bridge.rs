//! Tool bridge - the entry point the chat layer calls once per model tool call.
//!
//! `invoke` allocates an id, registers it, writes the request line, and waits
//! for the correlator to hand back the response or for the deadline to pass.
//! There are no retries: a timeout or worker error goes straight to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::bridge::protocol::{ListToolsResult, RequestId, RpcError, RpcRequest, ToolDescriptor};
use crate::correlator::{Correlator, RegisterError};
use crate::normalize::{ToolResult, normalize};
use crate::supervisor::WorkerSupervisor;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// No response before the deadline. The text is what callers show.
    #[error("MCP server timeout")]
    Timeout,

    /// The worker answered with an error object; message passed through verbatim.
    #[error("{message}")]
    Worker {
        message: String,
        code: Option<i64>,
        data: Option<Value>,
    },

    #[error("too many pending tool calls")]
    Saturated,

    #[error("invalid worker response: {0}")]
    Decode(String),

    #[error("tool bridge shut down")]
    Closed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<RpcError> for BridgeError {
    fn from(error: RpcError) -> Self {
        Self::Worker {
            message: error.message,
            code: error.code,
            data: error.data,
        }
    }
}

impl From<RegisterError> for BridgeError {
    fn from(error: RegisterError) -> Self {
        match error {
            RegisterError::Saturated { .. } => Self::Saturated,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Seam between the HTTP/chat layer and the worker bridge.
///
/// This abstraction enables testing the HTTP layer without a worker subprocess.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, BridgeError>;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError>;
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Removes a still-pending entry when the calling future is dropped.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.forget(self.id);
    }
}

pub struct ToolBridge {
    supervisor: WorkerSupervisor,
    correlator: Arc<Correlator>,
    timeout: Duration,
}

impl ToolBridge {
    pub fn new(supervisor: WorkerSupervisor, config: BridgeConfig) -> Self {
        let correlator = Arc::clone(supervisor.correlator());
        Self {
            supervisor,
            correlator,
            timeout: config.timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Call a tool and normalize its output.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, BridgeError> {
        let raw = self
            .call(|id| RpcRequest::call_tool(id, name, arguments))
            .await?;
        Ok(normalize(raw))
    }

    /// Fetch the worker's tool catalog.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
        let raw = self.call(RpcRequest::list_tools).await?;
        let listing: ListToolsResult =
            serde_json::from_value(raw).map_err(|e| BridgeError::Decode(e.to_string()))?;
        Ok(listing.tools)
    }

    async fn call(
        &self,
        build: impl FnOnce(RequestId) -> RpcRequest,
    ) -> Result<Value, BridgeError> {
        let id = self.correlator.allocate_id();
        let mut completion = self.correlator.register(id)?;
        let deadline = tokio::time::Instant::now() + self.timeout;
        let _guard = PendingGuard {
            correlator: &self.correlator,
            id,
        };

        let request = build(id);
        let method = request.method.as_str();
        let tool = request.tool_name().unwrap_or(method).to_string();
        tracing::debug!(%id, %tool, "Sending tool call");

        // The send counts against the deadline too: a worker that stops
        // reading stdin must not hang the caller past its timeout.
        let exchange = async {
            match self.supervisor.send(request).await {
                Ok(()) => self.correlator.stats().record_sent(),
                Err(e) => {
                    tracing::warn!(%id, %tool, error = %e, "Failed to send tool call");
                }
            }
            (&mut completion).await
        };

        let response = match tokio::time::timeout_at(deadline, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BridgeError::Closed),
            Err(_) => {
                if self.correlator.expire(id) {
                    return Err(BridgeError::Timeout);
                }
                // Response won the race against the deadline.
                completion.await.map_err(|_| BridgeError::Closed)?
            }
        };

        match response.into_outcome() {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::debug!(%id, %tool, error = %error.message, "Worker reported error");
                Err(error.into())
            }
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolBridge {
    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, BridgeError> {
        ToolBridge::invoke(self, name, arguments).await
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
        ToolBridge::list_tools(self).await
    }
}
