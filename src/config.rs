//! Server configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Nested execution-engine configuration.
///
/// Names the interpreter subprocess that submitted code is piped into.
/// The protocol core does not interpret code itself; it only brokers it to
/// this command.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Interpreter binary (e.g., `python3`, `sh`, `node`).
    pub command: String,
    /// Default arguments passed to the interpreter.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4777
}

fn default_max_connections() -> u32 {
    8
}

/// Maximum accepted frame payload: 1 MiB unless overridden.
fn default_max_frame_bytes() -> usize {
    1_048_576
}

/// Server configuration parsed from `config.toml`.
///
/// Immutable once the listener has started; changes require a restart.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind (loopback recommended; the protocol carries code).
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port to bind. Zero asks the OS for an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether clients must present a token before code is executed.
    #[serde(default)]
    pub require_token: bool,
    /// Shared-secret token. May be omitted with `require_token = true`;
    /// the server then generates one at startup and logs it.
    #[serde(default)]
    pub token: Option<String>,
    /// Maximum concurrent sessions; connections over the limit are closed
    /// immediately with no frames exchanged.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds a session may sit idle before it is closed; 0 disables.
    #[serde(default)]
    pub idle_timeout_seconds: u64,
    /// Maximum accepted frame payload size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Interpreter subprocess settings.
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Idle timeout as a `Duration`; `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(AppError::Config(
                "max_connections must be greater than zero".into(),
            ));
        }

        if self.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "max_frame_bytes must be greater than zero".into(),
            ));
        }

        if matches!(self.token.as_deref(), Some("")) {
            return Err(AppError::Config(
                "token must not be empty; omit it to have one generated".into(),
            ));
        }

        if self.engine.command.is_empty() {
            return Err(AppError::Config("engine.command must not be empty".into()));
        }

        Ok(())
    }
}
