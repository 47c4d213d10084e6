//! Test doubles shared by unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Notify};
use url::Url;

use crate::adapter::{ChunkSource, ExitReport, Launcher, PipeOutput, StreamOptions};
use crate::error::{Error, Result};
use crate::registry::StreamKey;
use crate::relay::{CloseSignal, Connection};

pub(crate) fn cam_url() -> Url {
    Url::parse("rtsp://cam.local/1").unwrap()
}

/// Launcher whose sources are fed by the test
#[derive(Default)]
pub(crate) struct ScriptedLauncher {
    fail: bool,
    launch_delay: Option<Duration>,
    launches: AtomicUsize,
    feeds: Mutex<Vec<ScriptFeed>>,
}

impl ScriptedLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Block inside `launch` to widen race windows
    pub(crate) fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    pub(crate) fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Feed for the `index`-th successful launch
    pub(crate) fn feed(&self, index: usize) -> ScriptFeed {
        self.feeds.lock().unwrap()[index].clone()
    }
}

impl Launcher for ScriptedLauncher {
    type Source = ScriptedSource;

    fn launch(&self, _key: &StreamKey, _url: &Url, _options: &StreamOptions) -> Result<ScriptedSource> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.launch_delay {
            std::thread::sleep(delay);
        }

        if self.fail {
            return Err(Error::LaunchFailure("scripted failure".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        self.feeds.lock().unwrap().push(ScriptFeed {
            tx: Arc::new(Mutex::new(Some(tx))),
            closed: Arc::clone(&closed),
            notify: Arc::clone(&notify),
        });

        Ok(ScriptedSource { rx, closed, notify })
    }
}

/// Test-side handle for one scripted source
#[derive(Clone)]
pub(crate) struct ScriptFeed {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Bytes>>>>,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ScriptFeed {
    /// Emit a chunk from the "converter"
    pub(crate) fn send(&self, data: &[u8]) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(Bytes::copy_from_slice(data));
        }
    }

    /// Make the "converter" exit on its own
    pub(crate) fn finish(&self) {
        self.tx.lock().unwrap().take();
    }

    /// Whether the session closed this source
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<Bytes>,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ChunkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> PipeOutput {
        match self.rx.recv().await {
            Some(chunk) => PipeOutput::Chunk(chunk),
            None => PipeOutput::End(ExitReport::detached(false)),
        }
    }

    async fn close(&mut self) -> ExitReport {
        self.rx.close();
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        ExitReport::detached(true)
    }
}

/// How a [`MemoryConnection`] treats writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Accept,
    Fail,
    Stall,
}

/// In-memory downstream connection
pub(crate) struct MemoryConnection {
    mode: WriteMode,
    sent: Arc<Mutex<Vec<Bytes>>>,
    close: Arc<Mutex<Option<CloseSignal>>>,
    disconnect: watch::Receiver<bool>,
}

/// Test-side view of a [`MemoryConnection`]
pub(crate) struct MemoryPeer {
    sent: Arc<Mutex<Vec<Bytes>>>,
    close: Arc<Mutex<Option<CloseSignal>>>,
    disconnect: watch::Sender<bool>,
}

pub(crate) fn memory_connection(mode: WriteMode) -> (MemoryConnection, MemoryPeer) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let close = Arc::new(Mutex::new(None));
    let (tx, rx) = watch::channel(false);

    (
        MemoryConnection {
            mode,
            sent: Arc::clone(&sent),
            close: Arc::clone(&close),
            disconnect: rx,
        },
        MemoryPeer {
            sent,
            close,
            disconnect: tx,
        },
    )
}

impl Connection for MemoryConnection {
    async fn send(&mut self, chunk: Bytes) -> std::io::Result<()> {
        match self.mode {
            WriteMode::Accept => {
                self.sent.lock().unwrap().push(chunk);
                Ok(())
            }
            WriteMode::Fail => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer gone",
            )),
            WriteMode::Stall => std::future::pending().await,
        }
    }

    async fn close(&mut self, signal: CloseSignal) {
        *self.close.lock().unwrap() = Some(signal);
    }

    async fn closed(&mut self) {
        loop {
            if *self.disconnect.borrow_and_update() {
                return;
            }
            if self.disconnect.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl MemoryPeer {
    pub(crate) fn chunks(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn close_signal(&self) -> Option<CloseSignal> {
        self.close.lock().unwrap().clone()
    }

    /// Simulate the browser going away
    pub(crate) fn disconnect(&self) {
        let _ = self.disconnect.send(true);
    }

    pub(crate) async fn wait_for_chunks(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.sent.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("chunks did not arrive in time");
    }
}
