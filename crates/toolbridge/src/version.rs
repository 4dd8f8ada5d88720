//! Version information for toolbridge.

/// Toolbridge version from Cargo.toml
pub const TOOLBRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub toolbridge: &'static str,
    /// Worker command line, as configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            toolbridge: TOOLBRIDGE_VERSION,
            worker: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, command: impl Into<String>) -> Self {
        self.worker = Some(command.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.toolbridge, TOOLBRIDGE_VERSION);
        assert!(info.worker.is_none());
    }

    #[test]
    fn version_info_serializes_full() {
        let info = VersionInfo {
            toolbridge: "0.3.0",
            worker: None,
        }
        .with_worker("python3 mcp-server/server.py");
        insta::assert_json_snapshot!(info, @r#"
        {
          "toolbridge": "0.3.0",
          "worker": "python3 mcp-server/server.py"
        }
        "#);
    }
}
