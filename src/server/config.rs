//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::adapter::StreamOptions;
use crate::registry::RegistryConfig;
use crate::relay::RelayConfig;

/// Default listening port
pub const DEFAULT_PORT: u16 = 2000;

/// Default WebSocket path
pub const DEFAULT_PATH: &str = "/api/stream";

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Path clients connect to; other paths get a 404
    pub path: String,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Connection timeout (WebSocket handshake must complete within this time)
    pub connection_timeout: Duration,

    /// Pause after a failed accept before trying again
    pub accept_error_backoff: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Options used to launch converters for every request
    pub stream_options: StreamOptions,

    /// Per-connection relay settings
    pub relay: RelayConfig,

    /// Session registry settings
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            path: DEFAULT_PATH.to_string(),
            max_connections: 0, // Unlimited
            connection_timeout: Duration::from_secs(10),
            accept_error_backoff: Duration::from_millis(100),
            tcp_nodelay: true,  // Chunks should leave as soon as they are read
            stream_options: StreamOptions::default(),
            relay: RelayConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the WebSocket path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the pause after a failed accept
    pub fn accept_error_backoff(mut self, backoff: Duration) -> Self {
        self.accept_error_backoff = backoff;
        self
    }

    /// Set the converter options
    pub fn stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    /// Set the relay settings
    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Set the registry settings
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}
