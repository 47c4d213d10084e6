//! Subscriber side of a session
//!
//! Each subscriber owns the receiving half of a bounded queue. The session
//! keeps the sending half and pushes chunks with `try_send`, so a slow
//! subscriber can never stall the session.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::state::EndReason;
use super::stream::StreamSession;

/// Session-side handle for one subscriber
pub(super) struct SubscriberSlot {
    pub(super) tx: mpsc::Sender<Bytes>,
    pub(super) end: Arc<OnceLock<EndReason>>,
    pub(super) dropped: u64,
}

impl SubscriberSlot {
    /// Record why the stream ends; the first reason wins
    pub(super) fn finish(self, reason: EndReason) {
        let _ = self.end.set(reason);
    }
}

/// A live attachment to a session
///
/// Dropping the subscription unsubscribes it. This happens exactly once
/// however the owning connection task ends.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    end: Arc<OnceLock<EndReason>>,
    session: Arc<StreamSession>,
}

impl Subscription {
    pub(super) fn new(
        id: u64,
        capacity: usize,
        session: Arc<StreamSession>,
    ) -> (Self, SubscriberSlot) {
        let (tx, rx) = mpsc::channel(capacity);
        let end = Arc::new(OnceLock::new());

        let slot = SubscriberSlot {
            tx,
            end: Arc::clone(&end),
            dropped: 0,
        };

        (
            Self {
                id,
                rx,
                end,
                session,
            },
            slot,
        )
    }

    /// Subscriber id, unique within the session
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The session this subscription belongs to
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Next chunk, or `None` once the session has released this subscriber
    ///
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Why the stream ended; meaningful after `recv` returned `None`
    pub fn end_reason(&self) -> EndReason {
        self.end.get().copied().unwrap_or(EndReason::UpstreamEnded)
    }

    /// Leave the session now
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.session.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("session", &self.session.id())
            .finish()
    }
}
