//! Header lines and header blocks.
//!
//! A header block is a sequence of `key: value\n` lines closed by an empty
//! line. Keys are short ASCII alphanumeric identifiers; values are free text
//! without newlines. The decoder here works on a byte slice and reports how
//! many bytes a complete block occupied, so the streaming codec can advance
//! its buffer only once the whole block has arrived.

use bytes::{BufMut, BytesMut};

use crate::{AppError, Result};

/// Maximum header key length in bytes.
pub const MAX_KEY_BYTES: usize = 30;

/// Maximum header value length in bytes.
pub const MAX_VALUE_BYTES: usize = 512;

/// Maximum number of header lines in one inbound block.
pub const MAX_HEADERS: usize = 10;

/// Longest inbound line buffered while waiting for its `\n`.
///
/// Anything longer cannot hold a valid header, so the decoder fails instead of
/// growing the buffer without bound.
pub const MAX_LINE_BYTES: usize = 1024;

/// Byte the server places in key position to tell the client to stop.
pub const CANCEL_BYTE: u8 = 0x18;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// A single `key: value` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Alphanumeric key, at most [`MAX_KEY_BYTES`].
    pub key: String,
    /// Value text, at most [`MAX_VALUE_BYTES`].
    pub value: String,
}

impl Header {
    /// Build a header from any string-like key and value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered sequence of headers; the protocol's unit of framing.
///
/// Insertion order is preserved on the wire. Lookup returns the first match,
/// which matters only for the repeatable keys (`Arg`, `Env`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    headers: Vec<Header>,
}

impl HeaderBlock {
    /// Create an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping insertion order.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(key, value));
    }

    /// Value of the first header whose key equals `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }

    /// Values of every header whose key equals `key`, in wire order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.key == key)
            .map(|h| h.value.as_str())
    }

    /// Number of headers in the block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// `true` for the bare blank-line block that ends a session.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate headers in wire order.
    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.headers.iter()
    }

    /// Append the wire form of this block (`key: value\n`… then `\n`) to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if a key is not a valid identifier, or a
    /// value contains a line break or exceeds [`MAX_VALUE_BYTES`].
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        for header in self.iter() {
            validate_outbound(header)?;
            dst.reserve(header.key.len() + header.value.len() + 3);
            dst.put_slice(header.key.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(header.value.as_bytes());
            dst.put_u8(LF);
        }
        dst.put_u8(LF);
        Ok(())
    }
}

impl FromIterator<Header> for HeaderBlock {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HeaderBlock {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Result of parsing one non-empty header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A well-formed header.
    Header(Header),
    /// Empty or whitespace key: tolerated and ignored.
    ///
    /// Running the client with no arguments makes the server print its usage
    /// text through this path, so it must not fail.
    Skip,
    /// The key carried [`CANCEL_BYTE`]; the server wants the client gone.
    Halt,
}

/// Result of scanning a complete header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// All lines up to the terminating blank line.
    Headers(HeaderBlock),
    /// A halt line was seen; remaining lines are irrelevant.
    Halt,
}

/// Parse one header line (without its `\n`; a trailing `\r` is ignored).
///
/// # Errors
///
/// Returns [`AppError::Protocol`] for an oversize or non-alphanumeric key, and
/// for a missing or oversize value.
pub fn parse_line(line: &[u8]) -> Result<Line> {
    let line = line.strip_suffix(&[CR]).unwrap_or(line);

    let start = line
        .iter()
        .position(|&b| !is_key_separator(b))
        .unwrap_or(line.len());
    let rest = &line[start..];
    let key_end = rest
        .iter()
        .position(|&b| is_key_separator(b))
        .unwrap_or(rest.len());
    let key = &rest[..key_end];

    if key.contains(&CANCEL_BYTE) {
        return Ok(Line::Halt);
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(AppError::Protocol(format!(
            "key \"{}\" is too long",
            String::from_utf8_lossy(key)
        )));
    }
    if key.is_empty() {
        return Ok(Line::Skip);
    }
    for &b in key {
        if b.is_ascii_whitespace() {
            return Ok(Line::Skip);
        }
        if !b.is_ascii_alphanumeric() {
            return Err(AppError::Protocol(format!(
                "key \"{}\" is invalid: {b:#04x}",
                String::from_utf8_lossy(key)
            )));
        }
    }
    let key = String::from_utf8_lossy(key).into_owned();

    let raw_value = rest.get(key_end + 1..).unwrap_or_default();
    if raw_value.is_empty() {
        return Err(AppError::Protocol(format!("value of key \"{key}\" is missing")));
    }
    let value_start = raw_value
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw_value.len());
    let value = &raw_value[value_start..];
    if value.len() > MAX_VALUE_BYTES {
        return Err(AppError::Protocol(format!(
            "value of key \"{key}\" is too long: {} bytes",
            value.len()
        )));
    }

    Ok(Line::Header(Header {
        key,
        value: String::from_utf8_lossy(value).into_owned(),
    }))
}

/// Scan `buf` for one complete header block.
///
/// Returns `Ok(None)` while the block is still incomplete, otherwise the
/// decoded block together with the number of bytes it occupied (including
/// the terminating blank line).
///
/// # Errors
///
/// Propagates [`parse_line`] errors and fails when a block carries more than
/// [`MAX_HEADERS`] lines or a line grows past [`MAX_LINE_BYTES`].
pub fn decode_block(buf: &[u8]) -> Result<Option<(Block, usize)>> {
    let mut pos = 0;
    let mut lines = 0;
    let mut block = HeaderBlock::new();

    loop {
        let remaining = &buf[pos..];
        let Some(newline) = remaining.iter().position(|&b| b == LF) else {
            if remaining.len() > MAX_LINE_BYTES {
                return Err(AppError::Protocol(format!(
                    "header line exceeds {MAX_LINE_BYTES} bytes"
                )));
            }
            return Ok(None);
        };

        let line = &remaining[..newline];
        pos += newline + 1;

        if line.is_empty() || line == [CR] {
            return Ok(Some((Block::Headers(block), pos)));
        }

        lines += 1;
        if lines > MAX_HEADERS {
            return Err(AppError::Protocol("too many headers".into()));
        }

        match parse_line(line)? {
            Line::Header(header) => block.headers.push(header),
            Line::Skip => {}
            Line::Halt => return Ok(Some((Block::Halt, pos))),
        }
    }
}

fn is_key_separator(b: u8) -> bool {
    b == b':' || b == b' '
}

fn validate_outbound(header: &Header) -> Result<()> {
    if header.key.is_empty()
        || header.key.len() > MAX_KEY_BYTES
        || !header.key.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(AppError::Protocol(format!(
            "invalid header key \"{}\"",
            header.key
        )));
    }
    if header.value.bytes().any(|b| b == LF || b == CR) {
        return Err(AppError::Protocol(format!(
            "value of key \"{}\" contains a line break",
            header.key
        )));
    }
    if header.value.len() > MAX_VALUE_BYTES {
        return Err(AppError::Protocol(format!(
            "value of key \"{}\" is too long: {} bytes",
            header.key,
            header.value.len()
        )));
    }
    Ok(())
}
