//! Wire protocol spoken between the client and the interpreter server.
//!
//! Every unit on the wire starts with a header block: `Key: value` lines
//! terminated by a blank line. Data-carrying blocks announce a `Size` and are
//! followed by exactly that many raw bytes.
//!
//! - `header`: header lines and blocks (encode, line parsing, block scanning).
//! - `codec`: [`tokio_util::codec`] framing for response units (inbound) and
//!   stdin/cancel/request frames (outbound).

pub mod codec;
pub mod header;

pub use codec::{
    Channel, FrameEncoder, OutboundFrame, ResponseCodec, ResponseUnit, MAX_PAYLOAD_BYTES,
};
pub use header::{Header, HeaderBlock};

/// Default TCP port of the interpreter server.
pub const DEFAULT_PORT: u16 = 1961;

/// Default host; the server only listens on loopback.
pub const DEFAULT_HOST: &str = "localhost";

/// Request header: client working directory.
pub const KEY_CWD: &str = "Cwd";
/// Request header: one positional argument (repeatable, order-significant).
pub const KEY_ARG: &str = "Arg";
/// Request header: classpath forwarded from the client environment.
pub const KEY_CLASSPATH: &str = "Cp";
/// Request header: shared-secret authentication cookie.
pub const KEY_COOKIE: &str = "Cookie";
/// Request header: one forwarded environment variable as `NAME=VALUE` (repeatable).
pub const KEY_ENV: &str = "Env";

/// Response header: output channel (`out` or `err`).
pub const KEY_CHANNEL: &str = "Channel";
/// Data frame header: payload byte count.
pub const KEY_SIZE: &str = "Size";
/// Response header: terminal exit status.
pub const KEY_STATUS: &str = "Status";

/// Frame sent by the client when it aborts on a local interrupt.
pub const CANCEL_SENTINEL: &[u8] = b"Size: -1\n\n";
