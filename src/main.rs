//! oneshotd: a concurrent one-shot request/response TCP server
//!
//! Accepts a connection, reads one `\r\n\r\n`-terminated request, hands
//! it to the request handler, writes back the framed response, and
//! closes the connection.
//!
//! Features:
//! - Delimiter-based message framing over raw byte streams
//! - Fixed-size worker pool bounding concurrent connection handlers
//! - Pluggable request handler behind a single trait
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod framing;
mod handler;
mod server;

use config::{Config, HandlerType};
use handler::{EchoHandler, PingHandler, RequestHandler};
use server::Server;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        handler = ?config.handler,
        "Starting oneshotd server"
    );

    let handler: Arc<dyn RequestHandler> = match config.handler {
        HandlerType::Echo => Arc::new(EchoHandler),
        HandlerType::Ping => Arc::new(PingHandler),
    };

    let server = Server::bind(&config, handler).await?;
    server.run().await?;

    Ok(())
}
