//! Session registry implementation
//!
//! Maps stream keys to live sessions. Each key owns a slot with a
//! once-cell: the first caller for a key runs the launch inside the cell,
//! concurrent callers for the same key wait on it, and callers for other
//! keys never wait at all because the map lock is only held to look up or
//! insert a slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use tokio::sync::{Mutex, OnceCell};
use url::Url;

use crate::adapter::{FfmpegLauncher, Launcher, StreamOptions};
use crate::error::{Error, Result};
use crate::session::StreamSession;

use super::config::RegistryConfig;
use super::key::StreamKey;

/// One key's place in the registry
struct Slot {
    id: u64,
    cell: OnceCell<Result<Arc<StreamSession>>>,
}

impl Slot {
    fn new(id: u64) -> Self {
        Self {
            id,
            cell: OnceCell::new(),
        }
    }

    /// A slot whose launch finished with an error or a dead session
    fn is_stale(&self) -> bool {
        match self.cell.get() {
            None => false,
            Some(Ok(session)) => !session.is_active(),
            Some(Err(_)) => true,
        }
    }

    fn session(&self) -> Option<Arc<StreamSession>> {
        match self.cell.get() {
            Some(Ok(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }
}

/// Registry of live stream sessions
///
/// Always used behind an `Arc`: sessions report their termination back to
/// it through a weak reference.
pub struct SessionRegistry<L: Launcher = FfmpegLauncher> {
    slots: Mutex<HashMap<StreamKey, Arc<Slot>>>,
    launcher: L,
    config: RegistryConfig,
    next_session_id: AtomicU64,
    launches: AtomicU64,
    closed: AtomicBool,
}

impl SessionRegistry<FfmpegLauncher> {
    /// Registry launching ffmpeg with default configuration
    pub fn new() -> Self {
        Self::with_config(FfmpegLauncher::new(), RegistryConfig::default())
    }
}

impl Default for SessionRegistry<FfmpegLauncher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Launcher> SessionRegistry<L> {
    /// Registry with a custom launcher and configuration
    pub fn with_config(launcher: L, config: RegistryConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            launcher,
            config,
            next_session_id: AtomicU64::new(1),
            launches: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get the launcher used for new sessions
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Number of launch attempts made so far
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Return the live session for `key`, creating it if needed
    ///
    /// Concurrent callers for the same key trigger exactly one launch and
    /// all receive its session, or all receive its error.
    pub async fn get_or_create(
        self: &Arc<Self>,
        key: StreamKey,
        url: Url,
        options: &StreamOptions,
    ) -> Result<Arc<StreamSession>> {
        loop {
            let slot = self.slot_for(&key).await?;
            let launched = AtomicBool::new(false);

            let result = slot
                .cell
                .get_or_init(|| async {
                    launched.store(true, Ordering::Relaxed);
                    self.create_session(&key, &url, options, slot.id)
                })
                .await
                .clone();

            match result {
                Ok(session) if self.is_closed() => {
                    // Launched concurrently with shutdown, which no longer sees this slot
                    session.shutdown().await;
                    return Err(Error::SessionClosed(key));
                }
                Ok(session) if session.is_active() => return Ok(session),
                Ok(_) if launched.load(Ordering::Relaxed) => {
                    // Ended before this caller could even use it; don't relaunch in a loop.
                    self.remove_slot(&key, slot.id).await;
                    return Err(Error::UpstreamTerminated(format!(
                        "{} ended during startup",
                        key
                    )));
                }
                Ok(_) => {
                    self.remove_slot(&key, slot.id).await;
                }
                Err(e) => {
                    self.remove_slot(&key, slot.id).await;
                    return Err(e);
                }
            }
        }
    }

    /// Live session for `key`, if any
    pub async fn get(&self, key: &StreamKey) -> Option<Arc<StreamSession>> {
        let slots = self.slots.lock().await;
        slots
            .get(key)
            .and_then(|slot| slot.session())
            .filter(|session| session.is_active())
    }

    /// Deregister `key`; idempotent
    ///
    /// The session itself is left alone. It keeps running for its current
    /// subscribers, but new requests for the key get a fresh session.
    pub async fn remove(&self, key: &StreamKey) -> Option<Arc<StreamSession>> {
        let removed = self.slots.lock().await.remove(key);
        let session = removed.and_then(|slot| slot.session());

        if session.is_some() {
            tracing::debug!(stream = %key, "Session deregistered");
        }

        session
    }

    /// Number of registered keys with a live session
    pub async fn session_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| slot.session().map(|s| s.is_active()).unwrap_or(false))
            .count()
    }

    /// Whether `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Terminate every session and wait for all converters to be released
    ///
    /// The registry stays closed afterwards: later `get_or_create` calls
    /// fail with `SessionClosed` instead of launching.
    pub async fn shutdown(&self) {
        let drained: Vec<(StreamKey, Arc<Slot>)> = {
            let mut slots = self.slots.lock().await;
            self.closed.store(true, Ordering::Release);
            slots.drain().collect()
        };

        let sessions: Vec<Arc<StreamSession>> = drained
            .iter()
            .filter_map(|(_, slot)| slot.session())
            .collect();

        tracing::info!(sessions = sessions.len(), "Shutting down all sessions");

        join_all(sessions.iter().map(|session| session.shutdown())).await;
    }

    async fn slot_for(&self, key: &StreamKey) -> Result<Arc<Slot>> {
        let mut slots = self.slots.lock().await;

        if self.is_closed() {
            return Err(Error::SessionClosed(key.clone()));
        }

        if let Some(slot) = slots.get(key) {
            if !slot.is_stale() {
                return Ok(Arc::clone(slot));
            }
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::new(id));
        slots.insert(key.clone(), Arc::clone(&slot));
        Ok(slot)
    }

    /// Remove the slot for `key` only if it is still the slot with `id`
    async fn remove_slot(&self, key: &StreamKey, id: u64) -> bool {
        let mut slots = self.slots.lock().await;

        match slots.get(key) {
            Some(slot) if slot.id == id => {
                slots.remove(key);
                true
            }
            _ => false,
        }
    }

    fn create_session(
        self: &Arc<Self>,
        key: &StreamKey,
        url: &Url,
        options: &StreamOptions,
        id: u64,
    ) -> Result<Arc<StreamSession>> {
        self.launches.fetch_add(1, Ordering::Relaxed);

        let session = StreamSession::create(
            id,
            key.clone(),
            url.clone(),
            options,
            &self.launcher,
            self.config.clone(),
        )?;

        self.spawn_watcher(key.clone(), Arc::clone(&session));

        Ok(session)
    }

    /// Deregister the session's key once the session terminates
    fn spawn_watcher(self: &Arc<Self>, key: StreamKey, session: Arc<StreamSession>) {
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            session.wait_terminated().await;

            if let Some(registry) = registry.upgrade() {
                if registry.remove_slot(&key, session.id()).await {
                    tracing::debug!(
                        stream = %key,
                        session_id = session.id(),
                        "Terminated session removed from registry"
                    );
                }
            }
        });
    }
}
