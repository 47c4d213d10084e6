//! WebSocket transport for the relay endpoint
//!
//! Each chunk goes out as one binary message. Close kinds map onto
//! RFC 6455 status codes.

use std::borrow::Cow;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::relay::{CloseKind, CloseSignal, Connection};

/// Longest close reason a control frame can carry
const MAX_CLOSE_REASON: usize = 123;

/// Status code sent for each close kind
pub fn close_code(kind: CloseKind) -> CloseCode {
    match kind {
        CloseKind::Normal => CloseCode::Normal,
        CloseKind::BadRequest => CloseCode::Policy,
        CloseKind::LaunchFailure => CloseCode::Error,
        CloseKind::Shutdown => CloseCode::Away,
        CloseKind::SlowConsumer => CloseCode::Again,
    }
}

/// Server side of an accepted WebSocket
pub struct WsConnection<S> {
    stream: WebSocketStream<S>,
    closing: bool,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self {
            stream,
            closing: false,
        }
    }
}

impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, chunk: Bytes) -> std::io::Result<()> {
        self.stream
            .send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    async fn close(&mut self, signal: CloseSignal) {
        if self.closing {
            return;
        }
        self.closing = true;

        let frame = CloseFrame {
            code: close_code(signal.kind),
            reason: Cow::Owned(truncate_reason(signal.reason)),
        };

        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::trace!(error = %e, "Close frame not delivered");
        }
    }

    async fn closed(&mut self) {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                // Inbound data has no meaning on this endpoint
                Some(Ok(_)) => {}
            }
        }
    }
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
