//! Local interrupt handling.
//!
//! Once the connection is open, an interrupt (Ctrl-C) pre-empts the session:
//! the cancel sentinel is written as soon as no other frame is in flight, the
//! connection is closed, and the client exits with [`CANCELLED_STATUS`].
//! Nothing else is flushed or drained.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::protocol::OutboundFrame;
use crate::session::{ConnectionWriter, SessionEnd};
use crate::{AppError, Result};

/// Exit status after a local interrupt.
pub const CANCELLED_STATUS: i32 = 1;

/// Longest wait for the connection to take the sentinel, and again for it to
/// close.
pub const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Sends the cancel sentinel and closes the shared connection.
#[derive(Debug)]
pub struct CancelHandler<W> {
    writer: Arc<ConnectionWriter<W>>,
}

impl<W> CancelHandler<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Handler bound to the session's connection.
    pub fn new(writer: Arc<ConnectionWriter<W>>) -> Self {
        Self { writer }
    }

    /// Notify the server and close the connection.
    ///
    /// The sentinel waits for a frame already being written, but no longer
    /// than [`CANCEL_GRACE`]; past that it is dropped. Nothing can be written
    /// after it.
    pub async fn cancel(&self) {
        match timeout(CANCEL_GRACE, self.writer.send_final(OutboundFrame::Cancel)).await {
            Ok(Ok(())) => debug!("cancel sentinel sent"),
            Ok(Err(err)) => debug!(%err, "cancel sentinel not delivered"),
            Err(_) => debug!("cancel sentinel timed out"),
        }
    }

    /// Close the connection if [`Self::cancel`] could not.
    async fn close(&self) {
        if timeout(CANCEL_GRACE, self.writer.close()).await.is_err() {
            warn!("connection close timed out");
        }
    }
}

/// Process-level interrupt source, registered when constructed so an
/// interrupt arriving before the first await is not lost.
#[derive(Debug)]
pub struct Interrupt {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl Interrupt {
    /// Install the interrupt listener.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the signal handler cannot be registered.
    pub fn register() -> Result<Self> {
        #[cfg(unix)]
        {
            let signal =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                    .map_err(|err| {
                        AppError::Io(format!("failed to register interrupt handler: {err}"))
                    })?;
            Ok(Self { signal })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Resolve on the next interrupt; never resolves if the listener dies.
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if self.signal.recv().await.is_none() {
                warn!("interrupt listener closed");
                std::future::pending::<()>().await;
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "ctrl-c listener failed");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Wait for the spawned session or an interrupt, whichever comes first.
///
/// On interrupt the sentinel is sent through `handler` (after any frame the
/// session is writing, within [`CANCEL_GRACE`]), the session task is aborted
/// and awaited, the connection is closed, and [`SessionEnd::Cancelled`] is
/// returned. Every step is bounded, so a peer that stopped reading cannot
/// hold the interrupt up.
///
/// # Errors
///
/// Propagates the session's own error, or `AppError::Io` if the session task
/// panicked.
pub async fn run_until_interrupted<W, F>(
    mut session: JoinHandle<Result<SessionEnd>>,
    interrupt: F,
    handler: &CancelHandler<W>,
) -> Result<SessionEnd>
where
    W: AsyncWrite + Unpin + Send,
    F: Future<Output = ()>,
{
    tokio::select! {
        biased;

        () = interrupt => {
            info!("interrupt received, cancelling session");
            handler.cancel().await;
            session.abort();
            if let Err(err) = (&mut session).await {
                if !err.is_cancelled() {
                    debug!(%err, "session task failed during cancel");
                }
            }
            handler.close().await;
            Ok(SessionEnd::Cancelled)
        }

        joined = &mut session => {
            joined.map_err(|err| AppError::Io(format!("session task failed: {err}")))?
        }
    }
}
