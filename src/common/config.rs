//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Node.js runtime used for CDP sessions
    #[serde(default)]
    pub node: NodeConfig,
}

/// How the client talks to a DAP adapter process
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Content-Length frames over the adapter's stdin/stdout
    #[default]
    Stdio,
    /// Adapter prints `listening at: <addr>` and accepts one TCP connection
    Tcp,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,

    /// Transport used to reach the adapter
    #[serde(default)]
    pub transport: TransportMode,

    /// `adapterID` sent with initialize (defaults to the adapter's name)
    #[serde(default)]
    pub adapter_id: Option<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "lldb-dap".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for a single DAP request
    #[serde(default = "default_request")]
    pub dap_request_secs: u64,

    /// Timeout for a single CDP command
    #[serde(default = "default_request")]
    pub cdp_request_secs: u64,

    /// Timeout for URL discovery, WebSocket handshake and TCP adapter start
    #[serde(default = "default_connect")]
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dap_request_secs: default_request(),
            cdp_request_secs: default_request(),
            connect_secs: default_connect(),
        }
    }
}

fn default_request() -> u64 {
    30
}
fn default_connect() -> u64 {
    10
}

impl Timeouts {
    pub fn dap_request(&self) -> Duration {
        Duration::from_secs(self.dap_request_secs)
    }

    pub fn cdp_request(&self) -> Duration {
        Duration::from_secs(self.cdp_request_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

/// Node.js runtime settings
#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    /// Executable name or path
    #[serde(default = "default_node")]
    pub path: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            path: default_node(),
        }
    }
}

fn default_node() -> PathBuf {
    PathBuf::from("node")
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| AdapterConfig {
            path,
            args: Vec::new(),
            transport: TransportMode::Stdio,
            adapter_id: None,
        })
    }

    /// Resolve the Node.js executable
    pub fn node_executable(&self) -> Result<PathBuf> {
        let configured = &self.node.path;
        if configured.components().count() > 1 {
            return Ok(configured.clone());
        }
        which::which(configured).map_err(|e| {
            super::Error::Config(format!(
                "Node.js runtime '{}' not found: {}",
                configured.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.defaults.adapter, "lldb-dap");
        assert_eq!(config.timeouts.dap_request(), Duration::from_secs(30));
        assert_eq!(config.timeouts.cdp_request_secs, 30);
        assert_eq!(config.timeouts.connect_secs, 10);
        assert_eq!(config.node.path, PathBuf::from("node"));
    }

    #[test]
    fn test_adapter_section() {
        let config = Config::parse(
            r#"
[adapters.codelldb]
path = "/opt/codelldb/adapter/codelldb"
args = ["--port", "0"]
transport = "tcp"

[defaults]
adapter = "codelldb"

[timeouts]
dap_request_secs = 5
"#,
        )
        .unwrap();

        let adapter = config.get_adapter("codelldb").unwrap();
        assert_eq!(adapter.transport, TransportMode::Tcp);
        assert_eq!(adapter.args, vec!["--port", "0"]);
        assert_eq!(config.defaults.adapter, "codelldb");
        assert_eq!(config.timeouts.dap_request_secs, 5);
        assert_eq!(config.timeouts.cdp_request_secs, 30);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[node]\npath = \"/usr/local/bin/node\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.node_executable().unwrap(),
            PathBuf::from("/usr/local/bin/node")
        );
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::parse("[timeouts]\ndap_request_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, crate::common::Error::ConfigParse(_)));
    }
}
