//! ToolService: the context object transports are built around.
//!
//! Constructed once at startup and shared behind an `Arc`. Owns:
//! - The tool invoker (normally a [`ToolBridge`])
//! - The worker supervisor, when there is one, for health and shutdown
//! - Version info

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::bridge::protocol::ToolDescriptor;
use crate::health::{Health, WorkerInfo};
use crate::normalize::ToolResult;
use crate::stats::StatsSnapshot;
use crate::supervisor::WorkerSupervisor;
use crate::tool_bridge::{BridgeError, ToolBridge, ToolInvoker};
use crate::version::VersionInfo;

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: Health,
    pub worker: WorkerInfo,
    pub stats: StatsSnapshot,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == Health::Ready
    }
}

pub struct ToolService {
    invoker: Arc<dyn ToolInvoker>,
    supervisor: Option<WorkerSupervisor>,
    version: VersionInfo,
}

impl ToolService {
    /// Service over an arbitrary invoker, with no worker to report on.
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            invoker,
            supervisor: None,
            version: VersionInfo::new(),
        }
    }

    pub fn from_bridge(bridge: Arc<ToolBridge>) -> Self {
        let supervisor = bridge.supervisor().clone();
        let version = VersionInfo::new().with_worker(supervisor.describe());
        Self {
            invoker: bridge,
            supervisor: Some(supervisor),
            version,
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let (worker, stats) = match &self.supervisor {
            Some(supervisor) => (supervisor.info(), supervisor.correlator().snapshot()),
            None => (WorkerInfo::default(), StatsSnapshot::default()),
        };
        HealthSnapshot {
            state: worker.status.into(),
            worker,
            stats,
            version: self.version.clone(),
        }
    }

    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, BridgeError> {
        self.invoker.invoke(name, arguments).await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
        self.invoker.list_tools().await
    }

    /// Stop the worker, if this service owns one.
    pub async fn shutdown(&self) {
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Correlator;
    use crate::supervisor::{SupervisorConfig, WorkerIo};
    use crate::tool_bridge::BridgeConfig;
    use async_trait::async_trait;

    struct NoTools;

    #[async_trait]
    impl ToolInvoker for NoTools {
        async fn invoke(&self, _: &str, _: Map<String, Value>) -> Result<ToolResult, BridgeError> {
            Err(BridgeError::Timeout)
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn health_without_worker_is_unknown() {
        let service = ToolService::new(Arc::new(NoTools));
        let health = service.health();
        assert_eq!(health.state, Health::Unknown);
        assert!(!health.is_ready());
        assert_eq!(health.stats, StatsSnapshot::default());
    }

    #[tokio::test]
    async fn health_follows_worker_lifecycle() {
        let supervisor =
            WorkerSupervisor::new(SupervisorConfig::default(), Arc::new(Correlator::default()));
        let bridge = Arc::new(ToolBridge::new(supervisor.clone(), BridgeConfig::new()));
        let service = ToolService::from_bridge(bridge);
        assert_eq!(
            service.health().version.worker.as_deref(),
            Some("python3 mcp-server/server.py")
        );

        let (a, _b) = tokio::io::duplex(1024);
        let (c, _d) = tokio::io::duplex(1024);
        supervisor.attach(WorkerIo::new(a, c)).await.unwrap();
        assert!(service.health().is_ready());

        service.shutdown().await;
        assert_eq!(service.health().state, Health::Unknown);
    }
}
