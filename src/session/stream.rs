//! Stream session: one converter, many subscribers
//!
//! The session owns the subscriber set and the lifecycle phase. Its
//! converter is owned by a pump task that reads chunks and hands each one
//! to [`StreamSession::on_adapter_data`]. All subscriber bookkeeping happens
//! under a plain mutex that is never held across an await, which is what
//! lets a [`Subscription`] unsubscribe from its `Drop` impl.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::adapter::{ChunkSource, ExitReport, Launcher, PipeOutput, StreamOptions};
use crate::error::{Error, Result};
use crate::registry::{OverflowPolicy, RegistryConfig, StreamKey};
use crate::stats::SessionStats;

use super::state::{EndReason, SessionPhase};
use super::subscriber::{SubscriberSlot, Subscription};

struct SessionInner {
    subscribers: HashMap<u64, SubscriberSlot>,
    next_subscriber_id: u64,
    stats: SessionStats,
    upstream_exit: Option<ExitReport>,
}

/// Fan-out from one converter to many subscribers
pub struct StreamSession {
    id: u64,
    key: StreamKey,
    url: Url,
    config: RegistryConfig,
    inner: Mutex<SessionInner>,
    phase: watch::Sender<SessionPhase>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    /// Launch the converter and start relaying
    ///
    /// On success the session is `Active` and its pump task is running. On
    /// failure the session ends `Failed` and the launch error is returned.
    pub fn create<L: Launcher>(
        id: u64,
        key: StreamKey,
        url: Url,
        options: &StreamOptions,
        launcher: &L,
        config: RegistryConfig,
    ) -> Result<Arc<Self>> {
        let (phase, _) = watch::channel(SessionPhase::Creating);

        let session = Arc::new(Self {
            id,
            key,
            url,
            config,
            inner: Mutex::new(SessionInner {
                subscribers: HashMap::new(),
                next_subscriber_id: 1,
                stats: SessionStats::new(),
                upstream_exit: None,
            }),
            phase,
            pump: Mutex::new(None),
        });

        let source = match launcher.launch(&session.key, &session.url, options) {
            Ok(source) => source,
            Err(e) => {
                session.set_phase(SessionPhase::Failed);
                tracing::warn!(
                    stream = %session.key,
                    session_id = id,
                    error = %e,
                    "Session launch failed"
                );
                return Err(e);
            }
        };

        session.set_phase(SessionPhase::Active);

        let handle = tokio::spawn(run_pump(Arc::clone(&session), source));
        *lock(&session.pump) = Some(handle);

        tracing::info!(stream = %session.key, session_id = id, "Session created");

        Ok(session)
    }

    /// Session id, unique within a registry
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Key this session serves
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Upstream URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Whether new subscribers are accepted
    pub fn is_active(&self) -> bool {
        self.phase() == SessionPhase::Active
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// Snapshot of the relay statistics
    pub fn stats(&self) -> SessionStats {
        lock(&self.inner).stats.clone()
    }

    /// How the converter ended, if it ended on its own
    pub fn upstream_exit(&self) -> Option<ExitReport> {
        lock(&self.inner).upstream_exit.clone()
    }

    /// The converter's unsuccessful exit as an error, if it happened
    pub fn upstream_error(&self) -> Option<Error> {
        self.upstream_exit()
            .filter(|report| !report.is_success())
            .map(|report| Error::UpstreamTerminated(report.to_string()))
    }

    /// Attach a new subscriber
    ///
    /// The subscriber receives every chunk read after this call, in order.
    /// Nothing produced earlier is replayed.
    pub fn subscribe(self: &Arc<Self>) -> Result<Subscription> {
        let mut inner = lock(&self.inner);

        if self.phase() != SessionPhase::Active {
            return Err(Error::SessionClosed(self.key.clone()));
        }

        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;

        let (subscription, slot) =
            Subscription::new(id, self.config.subscriber_queue_capacity, Arc::clone(self));
        inner.subscribers.insert(id, slot);

        let count = inner.subscribers.len();
        inner.stats.on_subscribe(count);
        drop(inner);

        tracing::info!(
            stream = %self.key,
            session_id = self.id,
            subscriber_id = id,
            subscribers = count,
            "Subscriber added"
        );

        Ok(subscription)
    }

    /// Detach a subscriber; idempotent
    ///
    /// Removing the last subscriber terminates the session, which closes
    /// the converter right away.
    pub fn unsubscribe(&self, subscriber_id: u64) -> bool {
        let mut inner = lock(&self.inner);

        let Some(slot) = inner.subscribers.remove(&subscriber_id) else {
            return false;
        };
        slot.finish(EndReason::Unsubscribed);

        let remaining = inner.subscribers.len();

        tracing::debug!(
            stream = %self.key,
            session_id = self.id,
            subscriber_id,
            subscribers = remaining,
            "Subscriber removed"
        );

        if remaining == 0 {
            self.terminate_locked(&mut inner, EndReason::Unsubscribed);
        }

        true
    }

    /// Deliver one converter chunk to every subscriber
    ///
    /// Never blocks. A full queue follows the overflow policy; a closed
    /// queue removes that subscriber only.
    pub fn on_adapter_data(&self, chunk: Bytes) {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;

        if self.phase() != SessionPhase::Active {
            return;
        }

        inner.stats.on_chunk(chunk.len());

        let mut gone = Vec::new();
        let mut slow = Vec::new();

        for (id, slot) in inner.subscribers.iter_mut() {
            match slot.tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match self.config.overflow_policy {
                    OverflowPolicy::DropChunk => {
                        slot.dropped += 1;
                        inner.stats.chunks_dropped += 1;
                        if slot.dropped.is_power_of_two() {
                            tracing::warn!(
                                stream = %self.key,
                                subscriber_id = *id,
                                dropped = slot.dropped,
                                "Subscriber queue full, dropping chunks"
                            );
                        }
                    }
                    OverflowPolicy::Disconnect => slow.push(*id),
                },
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        if gone.is_empty() && slow.is_empty() {
            return;
        }

        for id in gone {
            if let Some(slot) = inner.subscribers.remove(&id) {
                slot.finish(EndReason::Unsubscribed);
                tracing::debug!(
                    stream = %self.key,
                    subscriber_id = id,
                    "Subscriber went away, removed"
                );
            }
        }

        for id in slow {
            if let Some(slot) = inner.subscribers.remove(&id) {
                slot.finish(EndReason::SlowConsumer);
                tracing::warn!(
                    stream = %self.key,
                    subscriber_id = id,
                    "Subscriber too slow, disconnected"
                );
            }
        }

        if inner.subscribers.is_empty() {
            self.terminate_locked(inner, EndReason::Unsubscribed);
        }
    }

    /// React to the converter ending on its own
    pub fn on_adapter_terminated(&self, report: &ExitReport) {
        if report.is_success() {
            tracing::info!(stream = %self.key, session_id = self.id, "Upstream ended");
        } else {
            tracing::warn!(
                stream = %self.key,
                session_id = self.id,
                report = %report,
                "Upstream terminated unexpectedly"
            );
        }

        let mut inner = lock(&self.inner);
        inner.upstream_exit = Some(report.clone());
        self.terminate_locked(&mut inner, EndReason::UpstreamEnded);
    }

    /// Move to `Terminated` and release every subscriber
    ///
    /// Returns false if the session was already terminal.
    pub fn terminate(&self, reason: EndReason) -> bool {
        let mut inner = lock(&self.inner);
        self.terminate_locked(&mut inner, reason)
    }

    /// Terminate and wait until the converter has been released
    pub async fn shutdown(&self) {
        self.terminate(EndReason::Shutdown);

        let handle = lock(&self.pump).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.config.teardown_timeout, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    stream = %self.key,
                    session_id = self.id,
                    "Converter did not close in time, aborting pump"
                );
                handle.abort();
            }
        }
    }

    /// Resolve once the session reaches a terminal phase
    pub async fn wait_terminated(&self) {
        let mut rx = self.phase.subscribe();
        wait_terminal(&mut rx).await;
    }

    fn terminate_locked(&self, inner: &mut SessionInner, reason: EndReason) -> bool {
        if !self.set_phase(SessionPhase::Terminated) {
            return false;
        }

        let released = inner.subscribers.len();
        for (_, slot) in inner.subscribers.drain() {
            slot.finish(reason);
        }

        tracing::info!(
            stream = %self.key,
            session_id = self.id,
            reason = %reason,
            released,
            chunks = inner.stats.chunks_relayed,
            bytes = inner.stats.bytes_relayed,
            dropped = inner.stats.chunks_dropped,
            "Session terminated"
        );

        true
    }

    fn set_phase(&self, next: SessionPhase) -> bool {
        self.phase.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("phase", &self.phase())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_terminal(rx: &mut watch::Receiver<SessionPhase>) {
    loop {
        if rx.borrow_and_update().is_terminal() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_pump<S: ChunkSource>(session: Arc<StreamSession>, mut source: S) {
    let mut phase = session.phase.subscribe();

    let first_subscriber = tokio::time::sleep(session.config.first_subscriber_timeout);
    tokio::pin!(first_subscriber);
    let mut awaiting_first = true;

    loop {
        tokio::select! {
            biased;

            _ = wait_terminal(&mut phase) => break,

            _ = &mut first_subscriber, if awaiting_first => {
                awaiting_first = false;
                if session.subscriber_count() == 0 {
                    tracing::info!(
                        stream = %session.key,
                        session_id = session.id,
                        "No subscriber arrived, closing session"
                    );
                    session.terminate(EndReason::Unsubscribed);
                    break;
                }
            }

            output = source.next_chunk() => match output {
                PipeOutput::Chunk(chunk) => session.on_adapter_data(chunk),
                PipeOutput::End(report) => {
                    session.on_adapter_terminated(&report);
                    break;
                }
            },
        }
    }

    let report = source.close().await;

    tracing::debug!(
        stream = %session.key,
        session_id = session.id,
        report = %report,
        "Converter released"
    );
}
