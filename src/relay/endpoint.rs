//! Relay endpoint: one downstream connection to one session
//!
//! Flow for each connection:
//! 1. Validate the requested URL (reject with a `BadRequest` close).
//! 2. Derive the stream key and get or create the session.
//! 3. Subscribe, then forward queued chunks until the client leaves, a
//!    write fails or times out, or the session releases the subscriber.
//!
//! The subscription's drop guard performs the unsubscribe, so it happens
//! exactly once however step 3 ends, including task cancellation.

use std::sync::Arc;
use std::time::Instant;

use url::Url;

use crate::adapter::{parse_stream_url, FfmpegLauncher, Launcher, StreamOptions};
use crate::error::{Error, Result};
use crate::registry::{SessionRegistry, StreamKey};
use crate::session::{EndReason, Subscription};
use crate::stats::SubscriberStats;

use super::config::RelayConfig;
use super::connection::{CloseKind, CloseSignal, Connection};

/// Entry point for downstream connections
pub struct RelayEndpoint<L: Launcher = FfmpegLauncher> {
    registry: Arc<SessionRegistry<L>>,
    config: RelayConfig,
}

impl<L: Launcher> RelayEndpoint<L> {
    /// Create an endpoint over `registry`
    pub fn new(registry: Arc<SessionRegistry<L>>, config: RelayConfig) -> Self {
        Self { registry, config }
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry<L>> {
        &self.registry
    }

    /// Get the endpoint configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay the stream at `requested_url` to `connection` until either side ends
    ///
    /// Returns the delivery statistics on a normal end. Request errors close
    /// the connection with an explanatory signal before being returned.
    pub async fn handle_connection<C: Connection>(
        &self,
        mut connection: C,
        requested_url: Option<&str>,
        options: &StreamOptions,
    ) -> Result<SubscriberStats> {
        let url = match validate(requested_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting connection");
                connection.close(CloseSignal::from_error(&e)).await;
                return Err(e);
            }
        };

        let key = StreamKey::new(&url, options);

        let subscription = match self.attach(&key, &url, options).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(stream = %key, error = %e, "Could not attach to stream");
                let signal = if self.registry.is_closed() {
                    CloseSignal::new(CloseKind::Shutdown, "server shutting down")
                } else {
                    CloseSignal::from_error(&e)
                };
                connection.close(signal).await;
                return Err(e);
            }
        };

        self.forward(&mut connection, subscription).await
    }

    async fn attach(
        &self,
        key: &StreamKey,
        url: &Url,
        options: &StreamOptions,
    ) -> Result<Subscription> {
        let mut last_error = Error::SessionClosed(key.clone());

        for attempt in 1..=self.config.subscribe_attempts {
            let session = self
                .registry
                .get_or_create(key.clone(), url.clone(), options)
                .await?;

            match session.subscribe() {
                Ok(subscription) => return Ok(subscription),
                Err(e @ Error::SessionClosed(_)) => {
                    tracing::debug!(stream = %key, attempt, "Session closed while attaching, retrying");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn forward<C: Connection>(
        &self,
        connection: &mut C,
        mut subscription: Subscription,
    ) -> Result<SubscriberStats> {
        let started = Instant::now();
        let mut stats = SubscriberStats::new();
        let session = Arc::clone(subscription.session());
        let subscriber_id = subscription.id();

        let result = loop {
            tokio::select! {
                chunk = subscription.recv() => {
                    let Some(chunk) = chunk else {
                        let reason = subscription.end_reason();

                        break match (reason, session.upstream_error()) {
                            (EndReason::UpstreamEnded, Some(e)) => {
                                connection.close(CloseSignal::upstream_failed()).await;
                                Err(e)
                            }
                            _ => {
                                connection.close(CloseSignal::from_end(reason)).await;
                                Ok(())
                            }
                        };
                    };

                    let size = chunk.len();
                    match tokio::time::timeout(self.config.write_timeout, connection.send(chunk)).await {
                        Ok(Ok(())) => stats.on_sent(size),
                        Ok(Err(e)) => break Err(Error::SubscriberWriteFailure(e.to_string())),
                        Err(_) => {
                            break Err(Error::SubscriberWriteFailure(format!(
                                "write timed out after {:?}",
                                self.config.write_timeout
                            )))
                        }
                    }
                }

                _ = connection.closed() => break Ok(()),
            }
        };

        drop(subscription);
        stats.duration = started.elapsed();

        tracing::debug!(
            stream = %session.key(),
            session_id = session.id(),
            subscriber_id,
            chunks = stats.chunks_sent,
            bytes = stats.bytes_sent,
            "Subscriber finished"
        );

        result.map(|()| stats)
    }
}

/// Parse the requested URL, mapping problems to `BadRequest`
fn validate(requested_url: Option<&str>) -> Result<Url> {
    let raw = requested_url.ok_or_else(|| Error::BadRequest("missing url parameter".into()))?;
    parse_stream_url(raw).map_err(Error::BadRequest)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::RegistryConfig;
    use crate::testing::{memory_connection, ScriptedLauncher, WriteMode};

    const CAM: &str = "rtsp://cam.local/1";

    fn endpoint(launcher: ScriptedLauncher) -> Arc<RelayEndpoint<ScriptedLauncher>> {
        let registry = Arc::new(SessionRegistry::with_config(
            launcher,
            RegistryConfig::default(),
        ));
        Arc::new(RelayEndpoint::new(registry, RelayConfig::default()))
    }

    fn launcher(endpoint: &RelayEndpoint<ScriptedLauncher>) -> &ScriptedLauncher {
        endpoint.registry().launcher()
    }

    async fn wait_for_session(endpoint: &RelayEndpoint<ScriptedLauncher>, subscribers: usize) {
        let key = StreamKey::new(&Url::parse(CAM).unwrap(), &StreamOptions::default());
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(session) = endpoint.registry().get(&key).await {
                    if session.subscriber_count() == subscribers {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("subscribers did not attach");
    }

    #[tokio::test]
    async fn test_missing_url_is_bad_request() {
        let endpoint = endpoint(ScriptedLauncher::new());
        let (conn, peer) = memory_connection(WriteMode::Accept);

        let result = endpoint
            .handle_connection(conn, None, &StreamOptions::default())
            .await;

        assert!(matches!(result, Err(Error::BadRequest(_))));
        assert_eq!(peer.close_signal().unwrap().kind, CloseKind::BadRequest);
        assert_eq!(launcher(&endpoint).launch_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_url_never_launches() {
        let endpoint = endpoint(ScriptedLauncher::new());

        for bad in ["", "not a url", "http://cam.local/1", "rtsp://"] {
            let (conn, peer) = memory_connection(WriteMode::Accept);
            let result = endpoint
                .handle_connection(conn, Some(bad), &StreamOptions::default())
                .await;

            assert!(matches!(result, Err(Error::BadRequest(_))), "{:?}", bad);
            assert_eq!(peer.close_signal().unwrap().kind, CloseKind::BadRequest);
        }

        assert_eq!(launcher(&endpoint).launch_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_after_shutdown_never_launches() {
        let endpoint = endpoint(ScriptedLauncher::new());
        endpoint.registry().shutdown().await;

        let (conn, peer) = memory_connection(WriteMode::Accept);
        let result = endpoint
            .handle_connection(conn, Some(CAM), &StreamOptions::default())
            .await;

        assert!(matches!(result, Err(Error::SessionClosed(_))));
        assert_eq!(peer.close_signal().unwrap().kind, CloseKind::Shutdown);
        assert_eq!(launcher(&endpoint).launch_count(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_closes_connection() {
        let endpoint = endpoint(ScriptedLauncher::failing());
        let (conn, peer) = memory_connection(WriteMode::Accept);

        let result = endpoint
            .handle_connection(conn, Some(CAM), &StreamOptions::default())
            .await;

        assert!(matches!(result, Err(Error::LaunchFailure(_))));
        assert_eq!(peer.close_signal().unwrap().kind, CloseKind::LaunchFailure);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_browsers_share_one_converter() {
        let endpoint = endpoint(ScriptedLauncher::new());

        let (conn_a, peer_a) = memory_connection(WriteMode::Accept);
        let (conn_b, peer_b) = memory_connection(WriteMode::Accept);

        let task_a = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move {
                endpoint
                    .handle_connection(conn_a, Some(CAM), &StreamOptions::default())
                    .await
            }
        });
        let task_b = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move {
                endpoint
                    .handle_connection(conn_b, Some(CAM), &StreamOptions::default())
                    .await
            }
        });

        wait_for_session(&endpoint, 2).await;
        assert_eq!(launcher(&endpoint).launch_count(), 1);

        let feed = launcher(&endpoint).feed(0);
        feed.send(b"frame-1");
        feed.send(b"frame-2");

        peer_a.wait_for_chunks(2).await;
        peer_b.wait_for_chunks(2).await;
        assert_eq!(peer_a.chunks(), peer_b.chunks());

        // First browser leaves, second keeps receiving
        peer_a.disconnect();
        let stats_a = task_a.await.unwrap().unwrap();
        assert_eq!(stats_a.chunks_sent, 2);

        feed.send(b"frame-3");
        peer_b.wait_for_chunks(3).await;
        assert!(!feed.is_closed());

        // Second browser leaves, converter goes down
        peer_b.disconnect();
        task_b.await.unwrap().unwrap();

        tokio::time::timeout(Duration::from_secs(2), feed.wait_closed())
            .await
            .expect("converter should be closed");
    }

    #[tokio::test]
    async fn test_failed_upstream_closes_with_distinct_reason() {
        let endpoint = endpoint(ScriptedLauncher::new());
        let (conn, peer) = memory_connection(WriteMode::Accept);

        let task = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move {
                endpoint
                    .handle_connection(conn, Some(CAM), &StreamOptions::default())
                    .await
            }
        });

        wait_for_session(&endpoint, 1).await;
        let feed = launcher(&endpoint).feed(0);
        feed.send(b"only");
        feed.finish();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::UpstreamTerminated(_))));
        assert_eq!(peer.chunks().len(), 1);

        let signal = peer.close_signal().unwrap();
        assert_eq!(signal.kind, CloseKind::Normal);
        assert_eq!(signal.reason, "upstream stream failed");
    }

    #[tokio::test]
    async fn test_write_failure_removes_only_that_subscriber() {
        let endpoint = endpoint(ScriptedLauncher::new());
        let (good, good_peer) = memory_connection(WriteMode::Accept);
        let (bad, _bad_peer) = memory_connection(WriteMode::Fail);

        let good_task = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move {
                endpoint
                    .handle_connection(good, Some(CAM), &StreamOptions::default())
                    .await
            }
        });
        wait_for_session(&endpoint, 1).await;

        let bad_task = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move {
                endpoint
                    .handle_connection(bad, Some(CAM), &StreamOptions::default())
                    .await
            }
        });
        wait_for_session(&endpoint, 2).await;

        let feed = launcher(&endpoint).feed(0);
        feed.send(b"a");

        let bad_result = bad_task.await.unwrap();
        assert!(matches!(bad_result, Err(Error::SubscriberWriteFailure(_))));

        feed.send(b"b");
        good_peer.wait_for_chunks(2).await;
        assert_eq!(launcher(&endpoint).launch_count(), 1);
        assert!(!feed.is_closed());

        good_peer.disconnect();
        good_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        let registry = Arc::new(SessionRegistry::with_config(
            ScriptedLauncher::new(),
            RegistryConfig::default(),
        ));
        let config = RelayConfig::default().write_timeout(Duration::from_millis(50));
        let endpoint = Arc::new(RelayEndpoint::new(registry, config));
        let (conn, _peer) = memory_connection(WriteMode::Stall);

        let task = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move {
                endpoint
                    .handle_connection(conn, Some(CAM), &StreamOptions::default())
                    .await
            }
        });

        wait_for_session(&endpoint, 1).await;
        let feed = launcher(&endpoint).feed(0);
        feed.send(b"stuck");

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("stalled write should time out")
            .unwrap();
        assert!(matches!(result, Err(Error::SubscriberWriteFailure(_))));

        feed.wait_closed().await;
    }

    #[tokio::test]
    async fn test_cancelled_connection_task_unsubscribes() {
        let endpoint = endpoint(ScriptedLauncher::new());
        let (conn, _peer) = memory_connection(WriteMode::Accept);

        let task = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move {
                endpoint
                    .handle_connection(conn, Some(CAM), &StreamOptions::default())
                    .await
            }
        });

        wait_for_session(&endpoint, 1).await;
        task.abort();
        let _ = task.await;

        let feed = launcher(&endpoint).feed(0);
        tokio::time::timeout(Duration::from_secs(2), feed.wait_closed())
            .await
            .expect("aborted connection should release the converter");
    }
}
