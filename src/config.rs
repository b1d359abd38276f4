//! Client configuration parsing, validation, and port resolution.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::connection::StartupPolicy;
use crate::protocol::{DEFAULT_HOST, DEFAULT_PORT};
use crate::{AppError, Result};

/// Environment variable naming a configuration file to load.
pub const CONFIG_ENV: &str = "INTERP_CLIENT_CONFIG";

/// Environment variable overriding the server port.
pub const PORT_ENV: &str = "INTERP_SERVER_PORT";

/// Largest accepted stdin chunk size.
pub const MAX_CHUNK_SIZE: usize = 65_536;

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_startup_attempts() -> u32 {
    3
}

fn default_settle_delay_ms() -> u64 {
    3000
}

fn default_chunk_size() -> usize {
    512
}

fn default_cookie_env() -> String {
    "INTERP_COOKIE".into()
}

fn default_classpath_env() -> String {
    "CLASSPATH".into()
}

/// Client configuration parsed from an optional TOML file.
///
/// Every field has a default, so an absent file and an empty file behave
/// the same.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ClientConfig {
    /// Host the server listens on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port when neither `-Cport` nor `INTERP_SERVER_PORT` is set.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Executable used to launch the server when it is not running.
    #[serde(default)]
    pub server_command: Option<PathBuf>,
    /// Extra arguments passed to `server_command` before `-p <port>`.
    #[serde(default)]
    pub server_args: Vec<String>,
    /// How many times the server is launched before giving up.
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
    /// Wait after each launch before reconnecting, in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Maximum number of stdin bytes sent per data frame.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Environment variable consulted first for the cookie.
    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,
    /// Cookie file; defaults to `~/.interp/cookie`.
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
    /// Environment variable forwarded as the `Cp` request header.
    #[serde(default = "default_classpath_env")]
    pub classpath_env: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_command: None,
            server_args: Vec::new(),
            startup_attempts: default_startup_attempts(),
            settle_delay_ms: default_settle_delay_ms(),
            chunk_size: default_chunk_size(),
            cookie_env: default_cookie_env(),
            cookie_file: None,
            classpath_env: default_classpath_env(),
        }
    }
}

impl ClientConfig {
    /// Load the configuration from `path`, else from [`CONFIG_ENV`], else
    /// fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the chosen file cannot be read or fails
    /// to parse or validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }
        match env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load_from_path(PathBuf::from(path)),
            _ => {
                debug!("no config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
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

    /// Retry policy used when the server has to be launched.
    #[must_use]
    pub fn startup_policy(&self) -> StartupPolicy {
        StartupPolicy {
            attempts: self.startup_attempts,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    /// Resolve the effective server port.
    ///
    /// Precedence: the `-Cport` option, then the `INTERP_SERVER_PORT` value
    /// (passed in as `env_port`), then the configured port.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `env_port` is not a valid port number.
    pub fn resolve_port(&self, option_port: Option<u16>, env_port: Option<&str>) -> Result<u16> {
        if let Some(port) = option_port {
            return Ok(port);
        }
        match env_port {
            Some(raw) => raw.trim().parse::<u16>().map_err(|err| {
                AppError::Config(format!("invalid port number {raw} of {PORT_ENV}: {err}"))
            }),
            None => Ok(self.port),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::Config("host must not be empty".into()));
        }

        if self.startup_attempts == 0 {
            return Err(AppError::Config(
                "startup_attempts must be greater than zero".into(),
            ));
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(AppError::Config(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}"
            )));
        }

        if self.cookie_env.is_empty() {
            return Err(AppError::Config("cookie_env must not be empty".into()));
        }

        Ok(())
    }
}
