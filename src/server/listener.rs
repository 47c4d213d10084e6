//! Relay server listener
//!
//! Handles the TCP accept loop, the WebSocket upgrade and hands each
//! accepted socket to the relay endpoint on its own task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};

use crate::adapter::{FfmpegLauncher, Launcher};
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::relay::RelayEndpoint;
use crate::server::config::ServerConfig;
use crate::server::ws::WsConnection;
use crate::stats::ServerStats;

/// Name of the query parameter carrying the upstream URL
pub const URL_PARAM: &str = "url";

/// RTSP to WebSocket relay server
pub struct RelayServer<L: Launcher = FfmpegLauncher> {
    config: ServerConfig,
    endpoint: Arc<RelayEndpoint<L>>,
    next_connection_id: AtomicU64,
    counters: Arc<Counters>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

impl RelayServer<FfmpegLauncher> {
    /// Create a new server that launches ffmpeg
    pub fn new(config: ServerConfig) -> Self {
        Self::with_launcher(config, FfmpegLauncher::new())
    }
}

impl<L: Launcher> RelayServer<L> {
    /// Create a new server with a custom converter launcher
    pub fn with_launcher(config: ServerConfig, launcher: L) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let registry = Arc::new(SessionRegistry::with_config(
            launcher,
            config.registry.clone(),
        ));
        let endpoint = Arc::new(RelayEndpoint::new(registry, config.relay.clone()));

        Self {
            config,
            endpoint,
            next_connection_id: AtomicU64::new(1),
            counters: Arc::new(Counters::default()),
            connection_semaphore,
        }
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry<L>> {
        self.endpoint.registry()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(self.config.bind_addr).await?)
    }

    /// Run the server
    ///
    /// This method runs until the task is dropped. Accept errors are logged
    /// and retried after `accept_error_backoff`.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.log_listening(&listener);
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves the listener stops accepting and every live
    /// session is torn down before this returns.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve_until(listener, shutdown).await
    }

    /// Run on an already bound listener until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.log_listening(&listener);

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        drop(listener);
        self.registry().shutdown().await;

        result
    }

    /// Snapshot of server-wide counters
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total.load(Ordering::Relaxed),
            active_connections: self.counters.active.load(Ordering::Relaxed),
            rejected_connections: self.counters.rejected.load(Ordering::Relaxed),
            active_sessions: self.registry().session_count().await as u64,
            launches: self.registry().launch_count(),
        }
    }

    fn log_listening(&self, listener: &TcpListener) {
        let addr = listener.local_addr().unwrap_or(self.config.bind_addr);
        tracing::info!(addr = %addr, path = %self.config.path, "Relay server listening");
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    // Back off so persistent errors like EMFILE don't spin
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(self.config.accept_error_backoff).await;
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit: Option<OwnedSemaphorePermit> = match self.connection_semaphore {
            Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(connection_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let endpoint = Arc::clone(&self.endpoint);
        let counters = Arc::clone(&self.counters);
        let path = self.config.path.clone();
        let handshake_timeout = self.config.connection_timeout;
        let options = self.config.stream_options.clone();

        counters.total.fetch_add(1, Ordering::Relaxed);
        counters.active.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let mut uri: Option<Uri> = None;
            let upgrade = tokio::time::timeout(
                handshake_timeout,
                tokio_tungstenite::accept_hdr_async(socket, |request: &Request, response: Response| {
                    check_path(request, response, &path).map(|response| {
                        uri = Some(request.uri().clone());
                        response
                    })
                }),
            )
            .await;

            match upgrade {
                Ok(Ok(ws)) => {
                    let requested = uri.as_ref().and_then(stream_url_param);
                    let connection = WsConnection::new(ws);

                    match endpoint
                        .handle_connection(connection, requested.as_deref(), &options)
                        .await
                    {
                        Ok(stats) => tracing::debug!(
                            connection_id,
                            chunks = stats.chunks_sent,
                            bytes = stats.bytes_sent,
                            "Connection finished"
                        ),
                        Err(e) => tracing::debug!(connection_id, error = %e, "Connection ended with error"),
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(connection_id, peer = %peer_addr, error = %e, "WebSocket upgrade failed");
                }
                Err(_) => {
                    tracing::debug!(
                        connection_id,
                        peer = %peer_addr,
                        timeout = ?handshake_timeout,
                        "WebSocket handshake timed out"
                    );
                }
            }

            // Free the slot before the connection stops counting as active
            drop(permit);
            counters.active.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(connection_id, "Connection closed");
        });
    }
}

/// Reject upgrades for anything but the relay path
fn check_path(
    request: &Request,
    response: Response,
    path: &str,
) -> std::result::Result<Response, ErrorResponse> {
    if request.uri().path() == path {
        Ok(response)
    } else {
        let mut error = ErrorResponse::new(Some("not found".to_string()));
        *error.status_mut() = StatusCode::NOT_FOUND;
        Err(error)
    }
}

/// Extract the decoded `url` query parameter
fn stream_url_param(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == URL_PARAM)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_stream_url_param_decoded() {
        let uri = uri("/api/stream?url=rtsp%3A%2F%2Fcam.local%2F1%3Fchannel%3D2");
        assert_eq!(
            stream_url_param(&uri).as_deref(),
            Some("rtsp://cam.local/1?channel=2")
        );
    }

    #[test]
    fn test_stream_url_param_missing() {
        assert_eq!(stream_url_param(&uri("/api/stream")), None);
        assert_eq!(stream_url_param(&uri("/api/stream?other=1")), None);
    }

    #[test]
    fn test_stream_url_param_first_wins() {
        let uri = uri("/api/stream?url=rtsp://a/1&url=rtsp://b/2");
        assert_eq!(stream_url_param(&uri).as_deref(), Some("rtsp://a/1"));
    }

    #[test]
    fn test_check_path() {
        let request = Request::builder()
            .uri("/api/stream?url=x")
            .body(())
            .unwrap();
        assert!(check_path(&request, Response::new(()), "/api/stream").is_ok());

        let request = Request::builder().uri("/other").body(()).unwrap();
        let error = check_path(&request, Response::new(()), "/api/stream").unwrap_err();
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }
}
