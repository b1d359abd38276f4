//! Connection establishment with server auto-launch.
//!
//! The client first tries to connect. A refused connection means the server
//! is not running yet: the launcher is invoked, the client waits for the
//! server to settle, and tries again, up to a bounded number of launches.
//! Any other connect failure (bad host, unreachable network, …) points at a
//! configuration problem and fails immediately.
//!
//! In probe-only mode no session is started and nothing is launched; the
//! outcome only reports whether the server is up.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::{AppError, Result};

/// Exit status reported by probe-only mode when the server is down.
pub const PROBE_DOWN_STATUS: i32 = 9;

/// Environment variable pointing at the server installation directory.
pub const HOME_ENV: &str = "INTERP_HOME";

/// Server executable name looked up under `$INTERP_HOME/bin` or next to the
/// client binary.
pub const SERVER_BINARY: &str = if cfg!(windows) {
    "interp-server.bat"
} else {
    "interp-server"
};

/// Bounded retry schedule applied while the server starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupPolicy {
    /// Maximum number of server launches.
    pub attempts: u32,
    /// Pause after each launch before reconnecting.
    pub settle_delay: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// What to do when the server is not accepting connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPolicy {
    /// Launch the server and retry according to the policy.
    AutoLaunch(StartupPolicy),
    /// Only report liveness; never launch, never start a session.
    ProbeOnly,
}

/// Result of [`connect`].
#[derive(Debug)]
pub enum Connected<T> {
    /// An open connection, ready for the request.
    Stream(T),
    /// Probe-only mode: the server accepted the connection.
    ProbeUp,
    /// Probe-only mode: the connection was refused.
    ProbeDown,
}

/// Starts the server process. Fire-and-forget: the connect loop learns about
/// success only by retrying.
pub trait ServerLauncher: Send + Sync {
    /// Launch a server listening on `port`.
    fn launch(&self, port: u16);
}

/// Launches the server by spawning `<program> [args…] -p <port>` detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    /// Launcher for an explicit program and leading arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Resolve the server executable from configuration, `INTERP_HOME`, or
    /// the directory holding the client binary, in that order.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        let program = config
            .server_command
            .clone()
            .or_else(|| {
                std::env::var_os(HOME_ENV)
                    .filter(|home| !home.is_empty())
                    .map(|home| PathBuf::from(home).join("bin").join(SERVER_BINARY))
            })
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(|dir| dir.join(SERVER_BINARY)))
            })
            .unwrap_or_else(|| PathBuf::from(SERVER_BINARY));
        Self::new(program, config.server_args.clone())
    }

    /// Program that will be spawned.
    #[must_use]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl ServerLauncher for CommandLauncher {
    fn launch(&self, port: u16) {
        eprintln!("starting server...");

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg("-p")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => {
                info!(program = %self.program.display(), pid = ?child.id(), port, "server launched");
            }
            Err(err) => {
                warn!(program = %self.program.display(), %err, "failed to launch server");
            }
        }
    }
}

/// Connect to `host:port`, launching the server when the connection is
/// refused and `policy` allows it.
///
/// # Errors
///
/// Returns `AppError::Connect` when the server still refuses connections
/// after every launch attempt, or immediately on any failure other than
/// "connection refused".
pub async fn connect(
    host: &str,
    port: u16,
    policy: LaunchPolicy,
    launcher: &dyn ServerLauncher,
) -> Result<Connected<TcpStream>> {
    let connected = establish(port, policy, launcher, || TcpStream::connect((host, port))).await?;

    if let Connected::Stream(stream) = &connected {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "failed to set TCP_NODELAY");
        }
    }
    Ok(connected)
}

/// Connect loop over an arbitrary `dial` function.
///
/// [`connect`] supplies a TCP dialer; the loop itself only cares whether a
/// failure was a refusal.
///
/// # Errors
///
/// See [`connect`].
pub async fn establish<T, F, Fut>(
    port: u16,
    policy: LaunchPolicy,
    launcher: &dyn ServerLauncher,
    mut dial: F,
) -> Result<Connected<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let startup = match policy {
        LaunchPolicy::ProbeOnly => {
            return match dial().await {
                Ok(_) => Ok(Connected::ProbeUp),
                Err(err) if is_refused(&err) => Ok(Connected::ProbeDown),
                Err(err) => Err(connect_error(port, &err)),
            };
        }
        LaunchPolicy::AutoLaunch(startup) => startup,
    };

    let mut launches = 0;
    loop {
        match dial().await {
            Ok(stream) => {
                debug!(port, launches, "connected to server");
                return Ok(Connected::Stream(stream));
            }
            Err(err) if is_refused(&err) => {
                if launches >= startup.attempts {
                    return Err(AppError::Connect(format!(
                        "failed to start up server on port {port} after {launches} attempts"
                    )));
                }
                launches += 1;
                info!(port, attempt = launches, "server not running, launching");
                launcher.launch(port);
                tokio::time::sleep(startup.settle_delay).await;
            }
            Err(err) => return Err(connect_error(port, &err)),
        }
    }
}

/// `true` when `err` means nothing is listening on the port yet.
#[must_use]
pub fn is_refused(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionRefused
}

fn connect_error(port: u16, err: &io::Error) -> AppError {
    AppError::Connect(format!("cannot connect to server on port {port}: {err}"))
}
