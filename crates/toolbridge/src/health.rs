//! Health status types for the bridge.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Never started, or stopped on request
    #[default]
    Stopped,
    /// Launch in progress
    Starting,
    /// Accepting requests
    Running,
    /// Exited unexpectedly, waiting out the backoff before respawning
    Restarting,
    /// Launch failed or restart budget exhausted
    Failed,
}

impl WorkerStatus {
    /// True while a worker process (or attached channel) may still be live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Restarting)
    }
}

/// Health of the server as reported by `/health-check`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Worker not started
    #[default]
    Unknown,
    /// Worker launching or respawning
    Starting,
    /// Worker running, tool calls will be forwarded
    Ready,
    /// Worker failed; tool calls will time out
    Defunct,
}

impl From<WorkerStatus> for Health {
    fn from(status: WorkerStatus) -> Self {
        match status {
            WorkerStatus::Stopped => Health::Unknown,
            WorkerStatus::Starting | WorkerStatus::Restarting => Health::Starting,
            WorkerStatus::Running => Health::Ready,
            WorkerStatus::Failed => Health::Defunct,
        }
    }
}

/// Worker details for the health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When the current worker instance came up (ISO 8601 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}
