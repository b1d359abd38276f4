//! Shared test helpers for session-level integration tests.
//!
//! Builds a [`Session`] wired to in-memory duplex pipes so each test can play
//! the server and the terminal from the other ends.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

use interp_client::session::{ConnectionWriter, Session, Terminal};

/// Capacity of every in-memory pipe; large enough that no test blocks on it.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Client side of the connection as the session sees it.
pub type ClientWriter = WriteHalf<DuplexStream>;

/// Session type used throughout the integration tests.
pub type TestSession =
    Session<ReadHalf<DuplexStream>, ClientWriter, DuplexStream, DuplexStream, DuplexStream>;

/// A session plus the far ends of all its pipes.
pub struct Harness {
    /// The session under test, not yet running.
    pub session: TestSession,
    /// Shared write half, as the cancel handler would hold it.
    pub writer: Arc<ConnectionWriter<ClientWriter>>,
    /// Server end of the connection.
    pub server: DuplexStream,
    /// Feeds the session's stdin; drop it to signal end of input.
    pub stdin: DuplexStream,
    /// Receives what the session writes to stdout.
    pub stdout: DuplexStream,
    /// Receives what the session writes to stderr.
    pub stderr: DuplexStream,
}

/// Wire a fresh session reading stdin in chunks of `chunk_size` bytes.
pub fn harness(chunk_size: usize) -> Harness {
    harness_with_capacity(chunk_size, PIPE_CAPACITY)
}

/// Like [`harness`], but the connection buffers at most `connection_capacity`
/// bytes in each direction, so a peer that stops reading blocks the writer.
pub fn harness_with_capacity(chunk_size: usize, connection_capacity: usize) -> Harness {
    let (client, server) = tokio::io::duplex(connection_capacity);
    let (reader, writer) = tokio::io::split(client);
    let writer = Arc::new(ConnectionWriter::new(writer));

    let (stdin_session, stdin) = tokio::io::duplex(PIPE_CAPACITY);
    let (stdout_session, stdout) = tokio::io::duplex(PIPE_CAPACITY);
    let (stderr_session, stderr) = tokio::io::duplex(PIPE_CAPACITY);

    let terminal = Terminal {
        stdin: stdin_session,
        stdout: stdout_session,
        stderr: stderr_session,
    };
    let session = Session::new(reader, Arc::clone(&writer), terminal, chunk_size);

    Harness {
        session,
        writer,
        server,
        stdin,
        stdout,
        stderr,
    }
}

/// Read from `stream` until the bytes received so far end with `suffix`.
///
/// Panics if the stream ends first.
pub async fn read_until_suffix(stream: &mut DuplexStream, suffix: &[u8]) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while !received.ends_with(suffix) {
        let n = stream.read(&mut buf).await.expect("read from pipe");
        assert!(
            n > 0,
            "stream ended before {:?}; received {:?}",
            String::from_utf8_lossy(suffix),
            String::from_utf8_lossy(&received)
        );
        received.extend_from_slice(&buf[..n]);
    }
    received
}

/// Drain `stream` to end-of-file.
pub async fn read_all(mut stream: DuplexStream) -> Vec<u8> {
    let mut received = Vec::new();
    stream
        .read_to_end(&mut received)
        .await
        .expect("read to end");
    received
}
