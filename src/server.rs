//! Connection acceptance and worker-pool dispatch.
//!
//! The acceptor owns the listening socket and hands every accepted
//! connection to its own task. A fixed pool of worker slots bounds how
//! many connection handlers run at once; connections beyond the pool
//! size queue without bound until a slot frees. There is no admission
//! control; a bounded queue with a rejection policy is the natural
//! extension point.

use crate::config::Config;
use crate::connection::handle_connection;
use crate::handler::RequestHandler;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Listen backlog depth.
const BACKLOG: i32 = 5;

/// Server instance
pub struct Server {
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    workers: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket and construct the server.
    ///
    /// `SO_REUSEADDR` is set so a restarted server can rebind its port
    /// without waiting out `TIME_WAIT`.
    pub async fn bind(
        config: &Config,
        handler: Arc<dyn RequestHandler>,
    ) -> std::io::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(
            address = %listener.local_addr()?,
            workers = config.workers,
            "Server listening"
        );

        Ok(Server {
            listener,
            handler,
            workers: Arc::new(Semaphore::new(config.workers)),
        })
    }

    /// The address the listener actually bound (needed with port 0)
    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the process terminates or accepting fails.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves or accepting fails.
    ///
    /// Each accepted connection is handed straight to its own task; the
    /// loop returns to accepting immediately and never waits on handler
    /// completion. An accept error is fatal, since the process cannot
    /// serve without a listening socket. Per-connection failures stay
    /// inside their own task.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            handler,
            workers,
        } = self;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, leaving accept loop");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(connection) => connection,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            return Err(e);
                        }
                    };

                    debug!(peer = %peer, "New connection");

                    let handler = Arc::clone(&handler);
                    let workers = Arc::clone(&workers);

                    tokio::spawn(async move {
                        // Waiters queue here without bound; the permit
                        // count is what caps concurrent handlers.
                        let Ok(_permit) = workers.acquire_owned().await else {
                            return;
                        };

                        if let Err(e) = handle_connection(stream, peer, handler).await {
                            debug!(peer = %peer, error = %e, "Connection error");
                        }
                    });
                }
            }
        }
    }
}

/// Build the std listener with the socket options the server needs.
fn create_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
