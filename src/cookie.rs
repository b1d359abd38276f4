//! Authentication cookie lookup.
//!
//! The server writes a shared secret to a per-user file when it starts; the
//! client proves it belongs to the same user by echoing it in the request.
//! An environment variable takes precedence so wrappers can inject it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ClientConfig;
use crate::{AppError, Result};

/// Directory under the user's home holding client/server shared state.
pub const STATE_DIR: &str = ".interp";

/// File name of the cookie inside [`STATE_DIR`].
pub const COOKIE_FILE: &str = "cookie";

/// Where the cookie may come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSource {
    /// Environment variable consulted first.
    pub env_var: String,
    /// File read when the variable is unset or empty.
    pub file: Option<PathBuf>,
}

impl CookieSource {
    /// Build the lookup order from configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            env_var: config.cookie_env.clone(),
            file: config.cookie_file.clone().or_else(default_cookie_file),
        }
    }

    /// Read the cookie from the process environment or the cookie file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cookie` when neither source yields a token.
    pub fn load(&self) -> Result<String> {
        self.resolve(env::var(&self.env_var).ok())
    }

    /// Resolve the cookie given the value of [`Self::env_var`], if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cookie` when the variable is unset or blank and the
    /// file is missing, unreadable, or empty.
    pub fn resolve(&self, env_value: Option<String>) -> Result<String> {
        if let Some(value) = env_value {
            let value = value.trim();
            if !value.is_empty() {
                debug!(source = %self.env_var, "cookie taken from environment");
                return Ok(value.to_owned());
            }
        }

        let Some(path) = self.file.as_deref() else {
            return Err(AppError::Cookie(format!(
                "{} is not set and no cookie file location is known",
                self.env_var
            )));
        };
        read_cookie_file(path)
    }
}

/// `~/.interp/cookie`, using `USERPROFILE` on Windows.
fn default_cookie_file() -> Option<PathBuf> {
    let home_var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    env::var_os(home_var)
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(STATE_DIR).join(COOKIE_FILE))
}

fn read_cookie_file(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).map_err(|err| {
        AppError::Cookie(format!("cannot open cookie file {}: {err}", path.display()))
    })?;
    let token = raw.lines().next().unwrap_or_default().trim();
    if token.is_empty() {
        return Err(AppError::Cookie(format!(
            "cookie file {} is empty",
            path.display()
        )));
    }
    debug!(path = %path.display(), "cookie read from file");
    Ok(token.to_owned())
}
