//! Configuration for the API front-end and the RPC protocols.
//!
//! Every section has sensible defaults, so a JSON file only needs the keys
//! it wants to change:
//!
//! ```
//! use switchyard::config::Config;
//!
//! let config = Config::from_json(r#"{ "api": { "base": "api" } }"#)?;
//! assert_eq!(config.api.base.as_deref(), Some("api"));
//! assert_eq!(config.rpc.tcp.listen_address, "localhost:50051");
//! # Ok::<(), switchyard::config::ConfigError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The contents are not valid configuration JSON.
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP API front-end.
    pub api: ApiConfig,
    /// RPC connection manager.
    pub rpc: RpcConfig,
}

impl Config {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

/// Configuration for the HTTP API front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address the HTTP server binds.
    pub listen_address: String,

    /// Prefix for version-agnostic mounted paths. `None` mounts them at the
    /// root.
    pub base: Option<String>,

    /// Time allowed for a client to send request headers, in milliseconds.
    pub header_read_timeout_ms: u64,

    /// Largest request body accepted, in bytes. Larger bodies get a 413.
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:1080".to_string(),
            base: None,
            header_read_timeout_ms: 15_000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ApiConfig {
    /// Bind a different address.
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    /// Mount version-agnostic paths under `base`.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Cap request bodies at `bytes`.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Header read timeout.
    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_millis(self.header_read_timeout_ms)
    }
}

/// Configuration for the RPC connection manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Order in which protocols are tried by `connect` and `serve`.
    ///
    /// Registered protocols missing from this list are tried last, in
    /// registration order.
    pub priority: Vec<String>,

    /// TCP transport.
    pub tcp: TcpConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            priority: crate::rpc::DEFAULT_PRIORITY
                .iter()
                .map(|name| name.to_string())
                .collect(),
            tcp: TcpConfig::default(),
        }
    }
}

impl RpcConfig {
    /// Configuration for a single host: both sides on `address`.
    pub fn local(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            tcp: TcpConfig {
                listen_address: address.clone(),
                dial_address: address,
                connect_timeout_ms: 500,
            },
            ..Self::default()
        }
    }
}

/// Configuration for the TCP protocol bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Address the listen factory binds.
    pub listen_address: String,

    /// Address dialed when the inventory does not name one.
    pub dial_address: String,

    /// Maximum time for a dial, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            listen_address: "localhost:50051".to_string(),
            dial_address: "localhost:50051".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl TcpConfig {
    /// Dial timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
