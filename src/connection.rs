//! Per-connection lifecycle.
//!
//! Each accepted connection runs as one task driving exactly one
//! request/response cycle: read a framed request, invoke the request
//! handler, write the framed response, close. The protocol is one-shot
//! per TCP connection; the handler never loops for a second request.

use crate::framing::{FrameError, FramedConnection};
use crate::handler::RequestHandler;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{trace, warn};

/// Best-effort response when the request handler itself fails.
const INTERNAL_ERROR_RESPONSE: &str = "ERROR internal server error";

/// Drive one request/response cycle over `stream`, then close it.
///
/// The stream is owned here, so it closes on every exit path. Errors are
/// returned to the caller for logging and go no further: a broken
/// connection affects nothing but itself.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = FramedConnection::new(stream);

    let request = match framed.read_message().await? {
        Some(request) => request,
        None => {
            // Peer disconnected without sending a complete request.
            trace!(peer = %peer, "Connection closed before a request arrived");
            return Ok(());
        }
    };

    trace!(peer = %peer, bytes = request.len(), "Request received");

    let response = match catch_unwind(AssertUnwindSafe(|| handler.handle(&request))) {
        Ok(response) => response,
        Err(_) => {
            warn!(peer = %peer, "Request handler panicked");
            // Best effort; the connection closes either way.
            let _ = framed.write_message(INTERNAL_ERROR_RESPONSE).await;
            return Ok(());
        }
    };

    framed.write_message(&response).await?;
    trace!(peer = %peer, bytes = response.len(), "Response written");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn peer() -> SocketAddr {
        "127.0.0.1:54321".parse().unwrap()
    }

    #[tokio::test]
    async fn test_one_cycle_then_close() {
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(handle_connection(
            server,
            peer(),
            Arc::new(EchoHandler) as Arc<dyn RequestHandler>,
        ));

        client.write_all(b"hello\r\n\r\n").await.unwrap();

        // read_to_end observes the close after the single response.
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"hello\r\n\r\n");

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_immediate_disconnect_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler: Arc<dyn RequestHandler> = Arc::new(move |request: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
            request.to_string()
        });

        let (client, server) = duplex(1024);
        drop(client);

        handle_connection(server, peer(), handler).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_request_then_disconnect() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler: Arc<dyn RequestHandler> = Arc::new(move |request: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
            request.to_string()
        });

        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(handle_connection(server, peer(), handler));

        client.write_all(b"no terminator here").await.unwrap();
        drop(client);

        task.await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_panic_still_closes_connection() {
        let handler: Arc<dyn RequestHandler> =
            Arc::new(|_: &str| -> String { panic!("handler blew up") });

        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(handle_connection(server, peer(), handler));

        client.write_all(b"whatever\r\n\r\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"ERROR internal server error\r\n\r\n");

        task.await.unwrap().unwrap();
    }
}
