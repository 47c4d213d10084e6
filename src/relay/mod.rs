//! Downstream relay
//!
//! The endpoint validates a request, attaches it to the shared session for
//! its stream and forwards chunks over a [`Connection`]:
//!
//! ```text
//!  client ──request──► RelayEndpoint ──get_or_create──► SessionRegistry
//!     ▲                     │                               │
//!     └───── chunks ◄── Subscription ◄──── fan-out ──── StreamSession
//! ```

pub mod config;
pub mod connection;
pub mod endpoint;

pub use config::RelayConfig;
pub use connection::{CloseKind, CloseSignal, Connection};
pub use endpoint::RelayEndpoint;
