//! Server settings from the environment, overridable from the command line.

use std::sync::Arc;
use std::time::Duration;

use toolbridge::bridge::codec::DEFAULT_MAX_LINE_BYTES;
use toolbridge::supervisor::{DEFAULT_WORKER_PROGRAM, DEFAULT_WORKER_SCRIPT};
use toolbridge::transport::ServerConfig;
use toolbridge::{
    BridgeConfig, CommandSpawner, DEFAULT_MAX_PENDING, DEFAULT_TOOL_TIMEOUT, RestartPolicy,
    SupervisorConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub worker_program: String,
    pub worker_args: Vec<String>,
    pub tool_timeout: Duration,
    /// `None` leaves pending calls unbounded.
    pub max_pending: Option<usize>,
    pub max_restarts: u32,
    pub max_line_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            host: server.host,
            port: server.port,
            worker_program: DEFAULT_WORKER_PROGRAM.to_string(),
            worker_args: vec![DEFAULT_WORKER_SCRIPT.to_string()],
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_pending: Some(DEFAULT_MAX_PENDING),
            max_restarts: RestartPolicy::default().max_restarts,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Command-line overrides; `None` keeps the env/default value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Program followed by its arguments.
    pub worker: Option<Vec<String>>,
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(host) = lookup("TOOLBRIDGE_HOST") {
            settings.host = host;
        }
        if let Some(port) = lookup("TOOLBRIDGE_PORT") {
            settings.port = parse("TOOLBRIDGE_PORT", port)?;
        }
        if let Some(program) = lookup("TOOLBRIDGE_WORKER_PROGRAM") {
            settings.worker_program = program;
        }
        if let Some(args) = lookup("TOOLBRIDGE_WORKER_ARGS") {
            settings.worker_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(ms) = lookup("TOOLBRIDGE_TOOL_TIMEOUT_MS") {
            let ms: u64 = parse("TOOLBRIDGE_TOOL_TIMEOUT_MS", ms)?;
            settings.tool_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = lookup("TOOLBRIDGE_MAX_PENDING") {
            let max: usize = parse("TOOLBRIDGE_MAX_PENDING", max)?;
            settings.max_pending = (max > 0).then_some(max);
        }
        if let Some(n) = lookup("TOOLBRIDGE_MAX_RESTARTS") {
            settings.max_restarts = parse("TOOLBRIDGE_MAX_RESTARTS", n)?;
        }
        if let Some(max) = lookup("TOOLBRIDGE_MAX_LINE_BYTES") {
            settings.max_line_bytes = parse("TOOLBRIDGE_MAX_LINE_BYTES", max)?;
        }

        Ok(settings)
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(mut worker) = overrides.worker
            && !worker.is_empty()
        {
            self.worker_program = worker.remove(0);
            self.worker_args = worker;
        }
        self
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let spawner = CommandSpawner::new(&self.worker_program, self.worker_args.iter().cloned())
            .with_env("PYTHONUNBUFFERED", "1");
        SupervisorConfig::new(Arc::new(spawner))
            .with_restart_policy(RestartPolicy::default().with_max_restarts(self.max_restarts))
            .with_max_line_bytes(self.max_line_bytes)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new().with_timeout(self.tool_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<ServerSettings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 5000);
        assert_eq!(s.worker_program, "python3");
        assert_eq!(s.worker_args, vec!["mcp-server/server.py"]);
        assert_eq!(s.tool_timeout, Duration::from_secs(10));
        assert_eq!(s.max_pending, Some(1024));
        assert_eq!(s.max_restarts, 3);
        assert_eq!(s.max_line_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn env_overrides_defaults() {
        let s = settings(&[
            ("TOOLBRIDGE_PORT", "8080"),
            ("TOOLBRIDGE_WORKER_ARGS", "  mcp-server/server-nist.py   --verbose "),
            ("TOOLBRIDGE_TOOL_TIMEOUT_MS", "2500"),
            ("TOOLBRIDGE_MAX_RESTARTS", "0"),
        ])
        .unwrap();
        assert_eq!(s.port, 8080);
        assert_eq!(s.worker_args, vec!["mcp-server/server-nist.py", "--verbose"]);
        assert_eq!(s.tool_timeout, Duration::from_millis(2500));
        assert_eq!(s.max_restarts, 0);
    }

    #[test]
    fn zero_max_pending_is_unbounded() {
        let s = settings(&[("TOOLBRIDGE_MAX_PENDING", "0")]).unwrap();
        assert_eq!(s.max_pending, None);
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = settings(&[("TOOLBRIDGE_PORT", "http")]).unwrap_err();
        assert!(err.to_string().starts_with("invalid TOOLBRIDGE_PORT=\"http\""));
    }

    #[test]
    fn command_line_wins() {
        let s = settings(&[("TOOLBRIDGE_PORT", "8080")])
            .unwrap()
            .with_overrides(Overrides {
                host: Some("127.0.0.1".to_string()),
                port: Some(9000),
                worker: Some(vec!["./worker".to_string(), "--fast".to_string()]),
            });
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.port, 9000);
        assert_eq!(s.worker_program, "./worker");
        assert_eq!(s.worker_args, vec!["--fast"]);
    }

    #[test]
    fn supervisor_config_carries_settings() {
        let s = settings(&[("TOOLBRIDGE_MAX_RESTARTS", "5"), ("TOOLBRIDGE_MAX_LINE_BYTES", "4096")])
            .unwrap();
        let config = s.supervisor_config();
        assert_eq!(config.restart.max_restarts, 5);
        assert_eq!(config.max_line_bytes, 4096);
        assert_eq!(config.spawner.describe(), "python3 mcp-server/server.py");
    }
}
