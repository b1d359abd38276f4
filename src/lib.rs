#![forbid(unsafe_code)]

//! Client for a long-running interpreter server.
//!
//! The client connects over loopback TCP (launching the server if needed),
//! sends one request block describing the invocation, then relays local stdin
//! to the server and the server's stdout/stderr/exit status back to the
//! terminal.

pub mod cancel;
pub mod config;
pub mod connection;
pub mod cookie;
pub mod errors;
pub mod options;
pub mod protocol;
pub mod request;
pub mod session;

pub use config::ClientConfig;
pub use errors::{AppError, Result};
