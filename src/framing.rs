//! Message framing over a raw byte stream.
//!
//! Requests and responses are UTF-8 text terminated by the 4-byte
//! sequence `\r\n\r\n`. Inbound data accumulates in a buffer until the
//! terminator appears; the terminator is stripped before the message is
//! handed upward and re-appended around outbound payloads.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// End-of-message marker on the wire.
pub const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Upper bound on a single socket read. Bounds per-read granularity,
/// not total message size.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Errors from a single framed exchange.
#[derive(Debug)]
pub enum FrameError {
    /// The underlying socket read failed.
    Read(std::io::Error),
    /// The underlying socket write failed (broken pipe, reset).
    Write(std::io::Error),
    /// A complete message arrived but its body is not valid UTF-8.
    InvalidUtf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Read(e) => write!(f, "Failed to read from connection: {}", e),
            FrameError::Write(e) => write!(f, "Failed to write to connection: {}", e),
            FrameError::InvalidUtf8(e) => write!(f, "Message body is not valid UTF-8: {}", e),
        }
    }
}

impl std::error::Error for FrameError {}

/// A stream socket wrapped with delimiter-based message framing.
///
/// Generic over the stream type so tests can drive it with in-memory
/// pipes; the server hands it a `TcpStream`.
pub struct FramedConnection<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Read chunks until the accumulated buffer holds a complete message,
    /// then return its body with the terminator stripped.
    ///
    /// Returns `None` when the peer closes the stream before a terminator
    /// is seen. That is the normal end-of-stream signal, not an error;
    /// any partial bytes are discarded.
    pub async fn read_message(&mut self) -> Result<Option<String>, FrameError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            // The scan covers the whole accumulated buffer, so a
            // terminator straddling two reads is still found.
            if let Some(start) = find_terminator(&self.buffer) {
                let body = self.buffer.split_to(start);
                self.buffer.advance(TERMINATOR.len());
                return String::from_utf8(body.to_vec())
                    .map(Some)
                    .map_err(FrameError::InvalidUtf8);
            }

            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(FrameError::Read)?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    debug!(
                        bytes = self.buffer.len(),
                        "Peer closed mid-message, discarding partial request"
                    );
                }
                return Ok(None);
            }

            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Append the terminator to `payload` and write the whole message.
    pub async fn write_message(&mut self, payload: &str) -> Result<(), FrameError> {
        let mut message = BytesMut::with_capacity(payload.len() + TERMINATOR.len());
        message.extend_from_slice(payload.as_bytes());
        message.extend_from_slice(TERMINATOR);

        self.stream
            .write_all(&message)
            .await
            .map_err(FrameError::Write)?;
        self.stream.flush().await.map_err(FrameError::Write)
    }
}

/// Find the terminator in `buffer`, returning the offset where it starts.
fn find_terminator(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < TERMINATOR.len() {
        return None;
    }
    buffer
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_find_terminator() {
        assert_eq!(find_terminator(b"hello\r\n\r\n"), Some(5));
        assert_eq!(find_terminator(b"\r\n\r\n"), Some(0));
        assert_eq!(find_terminator(b"hello\r\n"), None);
        assert_eq!(find_terminator(b""), None);
        assert_eq!(find_terminator(b"a\r\n\r\nb\r\n\r\n"), Some(1));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (client, server) = duplex(1024);
        let mut client = FramedConnection::new(client);
        let mut server = FramedConnection::new(server);

        client.write_message("upload some-file 1024").await.unwrap();

        let message = server.read_message().await.unwrap();
        assert_eq!(message.as_deref(), Some("upload some-file 1024"));
    }

    #[tokio::test]
    async fn test_write_appends_terminator() {
        let (client, mut server) = duplex(1024);
        let mut client = FramedConnection::new(client);

        client.write_message("abc").await.unwrap();

        let mut raw = [0u8; 7];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw, b"abc\r\n\r\n");
    }

    #[tokio::test]
    async fn test_terminator_split_across_reads() {
        // The mock enforces the chunk boundary between the two halves of
        // the terminator.
        let stream = tokio_test::io::Builder::new()
            .read(b"part one\r\n")
            .read(b"\r\n")
            .build();

        let mut framed = FramedConnection::new(stream);
        let message = framed.read_message().await.unwrap();
        assert_eq!(message.as_deref(), Some("part one"));
    }

    #[tokio::test]
    async fn test_terminator_split_at_every_boundary() {
        for split in 1..TERMINATOR.len() {
            let mut first = b"request body".to_vec();
            first.extend_from_slice(&TERMINATOR[..split]);

            let stream = tokio_test::io::Builder::new()
                .read(&first)
                .read(&TERMINATOR[split..])
                .build();

            let mut framed = FramedConnection::new(stream);
            let message = framed.read_message().await.unwrap();
            assert_eq!(message.as_deref(), Some("request body"), "split at {}", split);
        }
    }

    #[tokio::test]
    async fn test_empty_message() {
        let stream = tokio_test::io::Builder::new().read(b"\r\n\r\n").build();

        let mut framed = FramedConnection::new(stream);
        let message = framed.read_message().await.unwrap();
        assert_eq!(message.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_eof_before_any_bytes() {
        let (client, server) = duplex(1024);
        drop(client);

        let mut framed = FramedConnection::new(server);
        let message = framed.read_message().await.unwrap();
        assert_eq!(message, None);
    }

    #[tokio::test]
    async fn test_eof_mid_message_discards_partial() {
        let (mut client, server) = duplex(1024);
        client.write_all(b"incomplete request").await.unwrap();
        drop(client);

        let mut framed = FramedConnection::new(server);
        let message = framed.read_message().await.unwrap();
        assert_eq!(message, None);
    }

    #[tokio::test]
    async fn test_multibyte_utf8_body() {
        let (client, server) = duplex(1024);
        let mut client = FramedConnection::new(client);
        let mut server = FramedConnection::new(server);

        client.write_message("grüße ☃").await.unwrap();

        let message = server.read_message().await.unwrap();
        assert_eq!(message.as_deref(), Some("grüße ☃"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_body() {
        let stream = tokio_test::io::Builder::new()
            .read(b"\xff\xfe\r\n\r\n")
            .build();

        let mut framed = FramedConnection::new(stream);
        let result = framed.read_message().await;
        assert!(matches!(result, Err(FrameError::InvalidUtf8(_))));
    }
}
