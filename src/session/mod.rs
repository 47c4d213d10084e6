//! Stream sessions
//!
//! A session owns one converter and fans its output out to subscribers.

pub mod state;
pub mod stream;
pub mod subscriber;

pub use state::{EndReason, SessionPhase};
pub use stream::StreamSession;
pub use subscriber::Subscription;
