//! toolbridge: JSON-RPC tool-call bridge to a supervised worker subprocess.

mod health;
mod normalize;
mod stats;
mod version;

pub mod bridge;
pub mod correlator;
pub mod service;
pub mod supervisor;
pub mod tool_bridge;
pub mod transport;
pub mod worker;

pub use correlator::{Correlator, DEFAULT_MAX_PENDING, RegisterError};
pub use health::{Health, WorkerInfo, WorkerStatus};
pub use normalize::{PROPERTY_MARKER, ToolResult, normalize};
pub use service::{HealthSnapshot, ToolService};
pub use stats::{BridgeStats, StatsSnapshot};
pub use supervisor::{
    CommandSpawner, RestartPolicy, SpawnError, SupervisorConfig, SupervisorError, WorkerIo,
    WorkerSpawner, WorkerSupervisor,
};
pub use tool_bridge::{BridgeConfig, BridgeError, DEFAULT_TOOL_TIMEOUT, ToolBridge, ToolInvoker};
pub use version::{TOOLBRIDGE_VERSION, VersionInfo};
pub use worker::{ToolError, ToolHandler, run_worker};
