//! HTTP transport.

mod routes;
mod server;

pub use routes::{HealthCheckResponse, routes};
pub use server::{ServerConfig, serve, serve_on, shutdown_signal};
