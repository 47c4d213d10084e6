//! Error types
//!
//! A single error enum is shared by every layer of the relay. It is `Clone`
//! so that concurrent callers waiting on the same session launch can all
//! observe the one launch error.

use std::sync::Arc;

use crate::registry::StreamKey;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay operations
#[derive(Debug, Clone)]
pub enum Error {
    /// Requested stream URL is missing or malformed
    BadRequest(String),
    /// The media conversion process could not be started
    LaunchFailure(String),
    /// The media conversion process exited after a successful start
    UpstreamTerminated(String),
    /// Writing to a single subscriber failed
    SubscriberWriteFailure(String),
    /// The session was torn down before the subscriber could attach
    SessionClosed(StreamKey),
    /// Socket-level I/O error
    Io(Arc<std::io::Error>),
}

impl Error {
    /// Short reason suitable for a WebSocket close frame
    pub fn close_reason(&self) -> String {
        match self {
            Error::BadRequest(msg) => format!("bad request: {}", msg),
            Error::LaunchFailure(_) => "failed to open upstream stream".to_string(),
            Error::UpstreamTerminated(_) => "upstream stream ended".to_string(),
            Error::SubscriberWriteFailure(_) => "write failed".to_string(),
            Error::SessionClosed(_) => "stream closed".to_string(),
            Error::Io(_) => "i/o error".to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Error::LaunchFailure(msg) => write!(f, "Failed to launch media pipe: {}", msg),
            Error::UpstreamTerminated(msg) => write!(f, "Upstream terminated: {}", msg),
            Error::SubscriberWriteFailure(msg) => write!(f, "Subscriber write failed: {}", msg),
            Error::SessionClosed(key) => write!(f, "Session closed: {}", key),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::BadRequest("missing url".into());
        assert_eq!(err.to_string(), "Bad request: missing url");

        let url = url::Url::parse("rtsp://cam.local/1").unwrap();
        let key = StreamKey::new(&url, &crate::adapter::StreamOptions::default());
        let err = Error::SessionClosed(key);
        assert!(err.to_string().contains("rtsp://cam.local/1"));
    }

    #[test]
    fn test_io_source() {
        use std::error::Error as _;

        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.source().is_some());
        assert!(matches!(err.clone(), Error::Io(_)));
    }

    #[test]
    fn test_close_reason_hides_details() {
        let err = Error::LaunchFailure("No such file or directory (os error 2)".into());
        assert_eq!(err.close_reason(), "failed to open upstream stream");
    }
}
