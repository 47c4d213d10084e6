//! RTSP to WebSocket relay
//!
//! Pulls RTSP camera streams through an external converter (ffmpeg) and
//! fans the converted bytes out to any number of WebSocket clients. All
//! clients asking for the same stream with the same options share one
//! converter process, which is stopped when the last of them leaves.
//!
//! # Example
//!
//! ```no_run
//! use rtsp_relay::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> rtsp_relay::Result<()> {
//!     let server = RelayServer::new(ServerConfig::default());
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! Clients connect to `ws://<host>:2000/api/stream?url=<percent-encoded rtsp url>`
//! and receive one binary message per converter chunk.

pub mod adapter;
pub mod error;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testing;

pub use adapter::{
    ChunkSource, ExitReport, FfmpegLauncher, Launcher, MediaPipe, OutputFormat, PipeOutput,
    StreamOptions, Transport,
};
pub use error::{Error, Result};
pub use registry::{OverflowPolicy, RegistryConfig, SessionRegistry, StreamKey};
pub use relay::{CloseKind, CloseSignal, Connection, RelayConfig, RelayEndpoint};
pub use server::{RelayServer, ServerConfig};
pub use session::{EndReason, SessionPhase, StreamSession, Subscription};
pub use stats::{ServerStats, SessionStats, SubscriberStats};
