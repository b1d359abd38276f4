//! Session multiplexer.
//!
//! After the request is sent the session owns the connection for the rest of
//! the process. Two paths run side by side:
//!
//! - local stdin, in a spawned task: each read of up to `chunk_size` bytes is
//!   forwarded as a `Size: n` data frame; the first empty read is forwarded
//!   as `Size: 0` and ends the task;
//! - the server, in the session loop: each decoded [`ResponseUnit`] is either
//!   written to local stdout/stderr or ends the session.
//!
//! Bytes stay in order within each direction. Nothing orders output relative
//! to input beyond what the server itself does.

mod writer;

pub use writer::ConnectionWriter;

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::protocol::{Channel, OutboundFrame, ResponseCodec, ResponseUnit};
use crate::{AppError, Result};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server reported the remote process's exit status.
    Status(i32),
    /// The server sent an empty header block.
    Finished,
    /// The server closed the connection between frames.
    HungUp,
    /// The server sent the cancel byte in key position.
    Halted,
    /// A local interrupt aborted the session.
    Cancelled,
}

impl SessionEnd {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Status(status) => status,
            Self::Finished | Self::HungUp | Self::Halted => 0,
            Self::Cancelled => crate::cancel::CANCELLED_STATUS,
        }
    }
}

/// Local terminal streams the session reads from and writes to.
#[derive(Debug)]
pub struct Terminal<I, O, E> {
    /// Local input forwarded to the server.
    pub stdin: I,
    /// Destination of `out` data units.
    pub stdout: O,
    /// Destination of `err` data units.
    pub stderr: E,
}

impl Terminal<tokio::io::Stdin, tokio::io::Stdout, tokio::io::Stderr> {
    /// The process's own standard streams.
    #[must_use]
    pub fn stdio() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
            stderr: tokio::io::stderr(),
        }
    }
}

/// One client session over an open connection.
#[derive(Debug)]
pub struct Session<R, W, I, O, E> {
    inbound: FramedRead<R, ResponseCodec>,
    writer: Arc<ConnectionWriter<W>>,
    terminal: Terminal<I, O, E>,
    chunk_size: usize,
}

impl<R, W, I, O, E> Session<R, W, I, O, E>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    /// Build a session from the connection's read half, the shared write
    /// half, and the local terminal.
    pub fn new(
        reader: R,
        writer: Arc<ConnectionWriter<W>>,
        terminal: Terminal<I, O, E>,
        chunk_size: usize,
    ) -> Self {
        Self {
            inbound: FramedRead::new(reader, ResponseCodec::new()),
            writer,
            terminal,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Run until the server ends the session.
    ///
    /// Stdin forwarding runs as its own task so a peer that is slow to drain
    /// input never stalls output; the task is aborted when this returns.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` for any malformed or truncated response unit.
    /// - `AppError::Io` if stdin cannot be read or local output cannot be
    ///   written.
    pub async fn run(self) -> Result<SessionEnd> {
        let Self {
            mut inbound,
            writer,
            terminal,
            chunk_size,
        } = self;
        let Terminal {
            stdin,
            mut stdout,
            mut stderr,
        } = terminal;

        let mut forwarder =
            AbortOnDropHandle::new(tokio::spawn(forward_stdin(stdin, writer, chunk_size)));
        let mut input_open = true;

        loop {
            tokio::select! {
                unit = inbound.next() => {
                    let Some(unit) = unit else {
                        debug!("server closed the connection");
                        return Ok(SessionEnd::HungUp);
                    };
                    if let Some(end) = dispatch(unit?, &mut stdout, &mut stderr).await? {
                        info!(?end, "session ended by server");
                        return Ok(end);
                    }
                }

                forwarded = &mut forwarder, if input_open => {
                    input_open = false;
                    forwarded
                        .map_err(|err| AppError::Io(format!("stdin forwarder failed: {err}")))??;
                }
            }
        }
    }
}

/// Act on one response unit; `Some` ends the session.
async fn dispatch<O, E>(
    unit: ResponseUnit,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<Option<SessionEnd>>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    match unit {
        ResponseUnit::Data { channel, payload } => {
            match channel {
                Channel::Stdout => write_payload(stdout, &payload).await?,
                Channel::Stderr => write_payload(stderr, &payload).await?,
            }
            Ok(None)
        }
        ResponseUnit::Status(status) => Ok(Some(SessionEnd::Status(status))),
        ResponseUnit::End => Ok(Some(SessionEnd::Finished)),
        ResponseUnit::Halt => Ok(Some(SessionEnd::Halted)),
    }
}

/// Read stdin in `chunk_size` pieces and send each as a data frame, ending
/// with the empty end-of-input frame.
///
/// A write failure stops forwarding but is not an error: the server may
/// still have output and a status to deliver.
async fn forward_stdin<I, W>(
    mut stdin: I,
    writer: Arc<ConnectionWriter<W>>,
    chunk_size: usize,
) -> Result<()>
where
    I: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let n = stdin
            .read(&mut chunk)
            .await
            .map_err(|err| AppError::Io(format!("read failure from stdin: {err}")))?;

        let frame = OutboundFrame::Data(Bytes::copy_from_slice(&chunk[..n]));
        if let Err(err) = writer.send(frame).await {
            warn!(%err, "stdin forwarding stopped");
            return Ok(());
        }
        if n == 0 {
            debug!("stdin exhausted, end-of-input sent");
            return Ok(());
        }
    }
}

async fn write_payload<T>(dst: &mut T, payload: &[u8]) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    dst.write_all(payload)
        .await
        .map_err(|err| AppError::Io(format!("write to terminal failed: {err}")))?;
    dst.flush()
        .await
        .map_err(|err| AppError::Io(format!("flush to terminal failed: {err}")))
}
