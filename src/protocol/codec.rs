//! Streaming codecs for the client/server connection.
//!
//! [`ResponseCodec`] turns the server's byte stream into [`ResponseUnit`]s for
//! use with [`tokio_util::codec::FramedRead`]. A data unit is only yielded once
//! its whole payload is buffered, so a declared `Size` is always consumed in
//! full before the next header block is looked at.
//!
//! [`FrameEncoder`] renders everything the client sends: the request block,
//! stdin data frames, and the cancel sentinel.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::header::{self, Block, HeaderBlock};
use crate::protocol::{CANCEL_SENTINEL, KEY_CHANNEL, KEY_SIZE, KEY_STATUS};
use crate::{AppError, Result};

/// Largest `Size` accepted on an inbound data unit.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Local output stream a data unit is routed to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Channel {
    /// Standard output (`out`).
    Stdout,
    /// Standard error (`err`).
    Stderr,
}

impl FromStr for Channel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "out" => Ok(Self::Stdout),
            "err" => Ok(Self::Stderr),
            other => Err(AppError::Protocol(format!(
                "unrecognizable stream identifier: {other}"
            ))),
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("out"),
            Self::Stderr => f.write_str("err"),
        }
    }
}

/// One unit of the server's response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseUnit {
    /// Output bytes for stdout or stderr.
    Data {
        /// Destination stream.
        channel: Channel,
        /// Exactly the number of bytes the `Size` header announced.
        payload: Bytes,
    },
    /// Terminal exit status of the remote process.
    Status(i32),
    /// Blank-line-only block: the session is over, successfully.
    End,
    /// The server placed the cancel byte in key position.
    Halt,
}

/// Inbound decoder: header block, then (for data units) the raw payload.
#[derive(Debug, Default)]
pub struct ResponseCodec {
    /// Channel and size of a data unit whose payload is still arriving.
    pending: Option<(Channel, usize)>,
}

impl ResponseCodec {
    /// Create a decoder positioned at a header-block boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a complete, non-halting header block.
    ///
    /// Returns the finished unit, or records a pending payload and returns
    /// `None` for data units.
    fn classify(&mut self, block: &HeaderBlock) -> Result<Option<ResponseUnit>> {
        if block.is_empty() {
            return Ok(Some(ResponseUnit::End));
        }

        if let Some(status) = block.get(KEY_STATUS) {
            let status = status.trim().parse::<i32>().map_err(|err| {
                AppError::Protocol(format!("invalid {KEY_STATUS} value \"{status}\": {err}"))
            })?;
            return Ok(Some(ResponseUnit::Status(status)));
        }

        let channel = block
            .get(KEY_CHANNEL)
            .ok_or_else(|| AppError::Protocol(format!("required header {KEY_CHANNEL} not found")))?
            .parse::<Channel>()?;
        let size = block
            .get(KEY_SIZE)
            .ok_or_else(|| AppError::Protocol(format!("required header {KEY_SIZE} not found")))?;
        let size = size.trim().parse::<usize>().map_err(|err| {
            AppError::Protocol(format!("invalid {KEY_SIZE} value \"{size}\": {err}"))
        })?;
        if size > MAX_PAYLOAD_BYTES {
            return Err(AppError::Protocol(format!(
                "{KEY_SIZE} value {size} exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }

        self.pending = Some((channel, size));
        Ok(None)
    }
}

impl Decoder for ResponseCodec {
    type Item = ResponseUnit;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if self.pending.is_none() {
            let Some((block, consumed)) = header::decode_block(src)? else {
                return Ok(None);
            };
            src.advance(consumed);

            match block {
                Block::Halt => return Ok(Some(ResponseUnit::Halt)),
                Block::Headers(block) => {
                    if let Some(unit) = self.classify(&block)? {
                        return Ok(Some(unit));
                    }
                }
            }
        }

        let Some((channel, size)) = self.pending else {
            return Ok(None);
        };
        if src.len() < size {
            return Ok(None);
        }

        self.pending = None;
        Ok(Some(ResponseUnit::Data {
            channel,
            payload: src.split_to(size).freeze(),
        }))
    }

    /// A hang-up between units is a normal end of stream; a hang-up inside a
    /// header block or payload is a protocol error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(unit) = self.decode(src)? {
            return Ok(Some(unit));
        }
        if src.is_empty() && self.pending.is_none() {
            return Ok(None);
        }

        let detail = match self.pending {
            Some((channel, size)) => format!(
                "{} of {size} payload bytes for channel {channel}",
                src.len()
            ),
            None => format!("{} bytes of an unterminated header block", src.len()),
        };
        Err(AppError::Protocol(format!(
            "connection closed mid-frame after {detail}"
        )))
    }
}

/// Everything the client writes to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// The one-off request block sent right after connecting.
    Request(HeaderBlock),
    /// A chunk of local stdin; an empty chunk marks end-of-input.
    Data(Bytes),
    /// The abort sentinel (`Size: -1`).
    Cancel,
}

/// Outbound encoder for [`OutboundFrame`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl Encoder<OutboundFrame> for FrameEncoder {
    type Error = AppError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<()> {
        match item {
            OutboundFrame::Request(block) => block.encode(dst),
            OutboundFrame::Data(payload) => {
                let mut block = HeaderBlock::new();
                block.push(KEY_SIZE, payload.len().to_string());
                block.encode(dst)?;
                dst.put_slice(&payload);
                Ok(())
            }
            OutboundFrame::Cancel => {
                dst.put_slice(CANCEL_SENTINEL);
                Ok(())
            }
        }
    }
}
