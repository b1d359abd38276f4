//! Error types shared across the client.

use std::fmt::{Display, Formatter};

/// Shared client result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Client error enumeration covering every fatal failure mode.
///
/// Clean termination (empty block, peer hang-up, server halt) and local
/// cancellation are not errors and never surface as an `AppError`.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing, validation, or client option failure.
    Config(String),
    /// Malformed or incomplete frame received from (or destined for) the server.
    Protocol(String),
    /// Connection failure that is not retried, or exhausted startup attempts.
    Connect(String),
    /// Authentication cookie missing or unreadable.
    Cookie(String),
    /// Local I/O failure (stdin, working directory, terminal output).
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Connect(msg) => write!(f, "connect: {msg}"),
            Self::Cookie(msg) => write!(f, "cookie: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
