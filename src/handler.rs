//! The request-handling boundary.
//!
//! The server core hands every complete request to a [`RequestHandler`]
//! and frames whatever comes back. Command parsing, storage, and all
//! other payload semantics live behind this trait.

/// Maps one complete request message to one complete response message.
///
/// Implementations are synchronous and never see framing: terminators
/// are stripped before `handle` and re-appended after it.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &str) -> String;
}

/// Any `Fn(&str) -> String` closure is a handler.
impl<F> RequestHandler for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn handle(&self, request: &str) -> String {
        self(request)
    }
}

/// Responds with the request unchanged.
///
/// The default handler for the binary; also useful for I/O throughput
/// testing.
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, request: &str) -> String {
        request.to_string()
    }
}

/// Minimal health-check handler.
///
/// - `PING` -> `PONG`
/// - `PING <message>` -> `PONG <message>`
/// - anything else -> `ERROR unknown command`
pub struct PingHandler;

impl RequestHandler for PingHandler {
    fn handle(&self, request: &str) -> String {
        let trimmed = request.trim_end();

        if trimmed.eq_ignore_ascii_case("PING") {
            "PONG".to_string()
        } else if let Some(message) = trimmed
            .strip_prefix("PING ")
            .or_else(|| trimmed.strip_prefix("ping "))
        {
            format!("PONG {}", message)
        } else {
            "ERROR unknown command".to_string()
        }
    }
}
