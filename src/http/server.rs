//! HTTP server implementation.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::service::AdmissionService;
use crate::error::Result;

/// How long open connections may take to finish after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
/// Pause after a failed accept, so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// HTTP server for the admission gateway.
pub struct HttpServer {
    listener: TcpListener,
    service: Arc<AdmissionService>,
}

impl HttpServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, service: AdmissionService) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service: Arc::new(service),
        })
    }

    /// The address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `signal` resolves, then drain open ones.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Starting HTTP admission gateway");

        let builder = Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            accept_backoff(&e).await;
                            continue;
                        }
                    };

                    let service = self.service.clone();
                    let handler = service_fn(move |req: Request<Incoming>| {
                        let service = service.clone();
                        async move { Ok::<_, Infallible>(service.handle(req).await) }
                    });

                    let connection = builder
                        .serve_connection_with_upgrades(TokioIo::new(stream), handler)
                        .into_owned();
                    let connection = graceful.watch(connection);

                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            debug!(peer = %peer, error = %e, "Connection closed with error");
                        }
                    });
                }
                _ = &mut signal => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        tokio::select! {
            _ = graceful.shutdown() => {
                info!("All connections drained");
            }
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                warn!(grace = ?SHUTDOWN_GRACE, "Timed out waiting for connections to drain");
            }
        }

        Ok(())
    }
}

async fn accept_backoff(error: &std::io::Error) {
    warn!(error = %error, backoff = ?ACCEPT_BACKOFF, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}
