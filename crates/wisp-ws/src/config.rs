//! Server and connection configuration, loaded from TOML.
//!
//! ```toml
//! bind = "127.0.0.1"
//! port = 9000
//! read_buffer_size = 1024
//! max_payload_size = 1048576
//! missing_key = "reject"
//! log = "wisp_ws=debug"
//! ```
//!
//! Every key is optional; unknown keys are an error.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, WsError};
use crate::frame::DEFAULT_MAX_PAYLOAD_SIZE;

/// What the handshake responder does when `Sec-WebSocket-Key` is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingKeyPolicy {
    /// Answer with the accept token of an empty key and log a warning.
    #[default]
    Proceed,
    /// Answer `400 Bad Request` and fail the handshake.
    Reject,
}

/// Settings for a single connection, client or server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Upper bound on one underlying channel read.
    pub read_buffer_size: usize,
    /// Largest declared payload length accepted on receive.
    pub max_payload_size: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            read_buffer_size: 1024,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Echo server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub read_buffer_size: usize,
    /// Largest HTTP upgrade request head accepted.
    pub max_handshake_size: usize,
    pub max_payload_size: u64,
    pub missing_key: MissingKeyPolicy,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            read_buffer_size: 1024,
            max_handshake_size: 8 * 1024,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            missing_key: MissingKeyPolicy::default(),
            log: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)
            .map_err(|e| WsError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WsError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(WsError::Config("read_buffer_size must be non-zero".into()));
        }
        if self.max_handshake_size == 0 {
            return Err(WsError::Config("max_handshake_size must be non-zero".into()));
        }
        Ok(())
    }

    /// `bind:port`, ready for `TcpListener::bind`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            read_buffer_size: self.read_buffer_size,
            max_payload_size: self.max_payload_size,
        }
    }
}
