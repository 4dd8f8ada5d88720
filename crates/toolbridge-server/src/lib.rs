//! Process-level wiring for the toolbridge server binaries.

pub mod config;
pub mod logging;

pub use config::{ConfigError, Overrides, ServerSettings};
pub use logging::init_tracing;
