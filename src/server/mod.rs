//! WebSocket server
//!
//! Accepts connections on `ws://<host>:2000/api/stream?url=<rtsp-url>` and
//! hands each one to the relay endpoint.

pub mod config;
pub mod listener;
pub mod ws;

pub use config::ServerConfig;
pub use listener::RelayServer;
pub use ws::WsConnection;
