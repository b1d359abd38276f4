//! Shared write half of the server connection.
//!
//! Two actors write to the connection: the session (request, stdin frames)
//! and the cancellation handler (sentinel). Every frame is encoded up front
//! and written while holding the lock, so frames from the two writers never
//! interleave. Closing takes the writer out of the slot; later sends fail and
//! later closes are no-ops.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::Encoder;
use tracing::{debug, trace};

use crate::protocol::{FrameEncoder, OutboundFrame};
use crate::{AppError, Result};

/// Frame-atomic, close-once wrapper around the connection's write half.
#[derive(Debug)]
pub struct ConnectionWriter<W> {
    inner: Mutex<Option<W>>,
}

impl<W> ConnectionWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap an open write half.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(Some(writer)),
        }
    }

    /// Encode `frame` and write it as one unit.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if the frame cannot be encoded.
    /// - `AppError::Io` if the connection is closed or the write fails.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let buf = encode(frame)?;

        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or_else(already_closed)?;
        write_frame(writer, &buf).await
    }

    /// Write `frame` as the last frame on the connection, then shut it down.
    ///
    /// The write half leaves the slot before anything is written, so no other
    /// frame can follow this one; concurrent and later sends fail as closed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`]. The connection is closed either way once the
    /// lock was obtained.
    pub async fn send_final(&self, frame: OutboundFrame) -> Result<()> {
        let buf = encode(frame)?;

        let taken = self.inner.lock().await.take();
        let mut writer = taken.ok_or_else(already_closed)?;
        let written = write_frame(&mut writer, &buf).await;
        close_half(writer).await;
        written
    }

    /// Shut down and drop the write half.
    ///
    /// Returns `true` if this call closed the connection, `false` if it was
    /// already closed.
    pub async fn close(&self) -> bool {
        let taken = self.inner.lock().await.take();
        let Some(writer) = taken else {
            return false;
        };
        close_half(writer).await;
        true
    }
}

fn encode(frame: OutboundFrame) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    FrameEncoder.encode(frame, &mut buf)?;
    Ok(buf)
}

fn already_closed() -> AppError {
    AppError::Io("connection already closed".into())
}

async fn write_frame<W>(writer: &mut W, buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(buf)
        .await
        .map_err(|err| AppError::Io(format!("write to server failed: {err}")))?;
    writer
        .flush()
        .await
        .map_err(|err| AppError::Io(format!("flush to server failed: {err}")))?;

    trace!(bytes = buf.len(), "frame sent");
    Ok(())
}

async fn close_half<W>(mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = writer.shutdown().await {
        debug!(%err, "connection shutdown failed");
    }
    debug!("connection closed");
}
