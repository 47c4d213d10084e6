//! Downstream connection abstraction

use std::future::Future;

use bytes::Bytes;

use crate::error::Error;
use crate::session::EndReason;

/// Category of a terminal close sent to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Stream ended normally
    Normal,
    /// Missing or malformed request
    BadRequest,
    /// Upstream could not be opened
    LaunchFailure,
    /// Server is going away
    Shutdown,
    /// Client could not keep up
    SlowConsumer,
}

/// A terminal close signal with a short human-readable reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSignal {
    pub kind: CloseKind,
    pub reason: String,
}

impl CloseSignal {
    pub fn new(kind: CloseKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Close signal for a request-level error
    pub fn from_error(error: &Error) -> Self {
        let kind = match error {
            Error::BadRequest(_) => CloseKind::BadRequest,
            Error::LaunchFailure(_) | Error::SessionClosed(_) | Error::Io(_) => {
                CloseKind::LaunchFailure
            }
            Error::UpstreamTerminated(_) | Error::SubscriberWriteFailure(_) => CloseKind::Normal,
        };
        Self::new(kind, error.close_reason())
    }

    /// Close signal for the end of a subscription
    pub fn from_end(reason: EndReason) -> Self {
        let kind = match reason {
            EndReason::UpstreamEnded | EndReason::Unsubscribed => CloseKind::Normal,
            EndReason::Shutdown => CloseKind::Shutdown,
            EndReason::SlowConsumer => CloseKind::SlowConsumer,
        };
        Self::new(kind, reason.as_str())
    }

    /// Close signal for a converter that exited unsuccessfully
    ///
    /// Same code as a normal end, with a reason that tells the two apart.
    pub fn upstream_failed() -> Self {
        Self::new(CloseKind::Normal, "upstream stream failed")
    }
}

/// A bidirectional downstream transport
///
/// The endpoint drives one connection from a single task: it races
/// [`Connection::closed`] against the subscriber queue and only writes once
/// that race resolves, so implementations need no internal locking.
pub trait Connection: Send + 'static {
    /// Write one chunk as a single message
    fn send(&mut self, chunk: Bytes) -> impl Future<Output = std::io::Result<()>> + Send;

    /// Send a terminal close signal; errors are ignored
    fn close(&mut self, signal: CloseSignal) -> impl Future<Output = ()> + Send;

    /// Resolve once the peer has gone away
    ///
    /// Must be cancel-safe. Inbound data is consumed and discarded.
    fn closed(&mut self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_error() {
        let signal = CloseSignal::from_error(&Error::BadRequest("missing url".into()));
        assert_eq!(signal.kind, CloseKind::BadRequest);
        assert_eq!(signal.reason, "bad request: missing url");

        let signal = CloseSignal::from_error(&Error::LaunchFailure("spawn".into()));
        assert_eq!(signal.kind, CloseKind::LaunchFailure);
    }

    #[test]
    fn test_from_end() {
        assert_eq!(
            CloseSignal::from_end(EndReason::UpstreamEnded).kind,
            CloseKind::Normal
        );
        assert_eq!(
            CloseSignal::from_end(EndReason::Shutdown).kind,
            CloseKind::Shutdown
        );
        assert_eq!(
            CloseSignal::from_end(EndReason::SlowConsumer).kind,
            CloseKind::SlowConsumer
        );
    }

    #[test]
    fn test_upstream_failure_is_distinguishable() {
        let failed = CloseSignal::upstream_failed();
        let ended = CloseSignal::from_end(EndReason::UpstreamEnded);

        assert_eq!(failed.kind, ended.kind);
        assert_ne!(failed.reason, ended.reason);
    }
}
