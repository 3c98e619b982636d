//! Per-viewer connection handling
//!
//! A [`ConnectionHandler`] is bound to one source. Each call to
//! [`handle`](ConnectionHandler::handle) serves one viewer:
//!
//! 1. send the [`StreamHeader`] preamble
//! 2. attach to the source and acquire its output feed
//! 3. forward every chunk while the viewer is open
//! 4. on close, detach and let the supervisor decide whether to stop the transcoder

pub mod preamble;
pub mod viewer;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::CountScope;
use crate::registry::{RelayRegistry, SourceKey, SourceSupervisor};
use crate::upstream::LaunchOptions;

pub use preamble::{StreamHeader, HEADER_LEN, MAGIC};
pub use viewer::{ChannelViewer, TcpViewer, Viewer};

/// Why forwarding to a viewer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The viewer closed its side
    ViewerClosed,
    /// Writing to the viewer failed
    SendFailed,
    /// The transcoder output ended
    UpstreamEnded,
    /// The transcoder could not be started
    SpawnFailed,
}

/// Serves viewers of a single source
#[derive(Clone)]
pub struct ConnectionHandler {
    key: SourceKey,
    options: LaunchOptions,
    registry: Arc<RelayRegistry>,
    connections: Arc<AtomicUsize>,
    count_scope: CountScope,
}

impl ConnectionHandler {
    pub(crate) fn new(
        options: LaunchOptions,
        registry: Arc<RelayRegistry>,
        connections: Arc<AtomicUsize>,
    ) -> Self {
        let count_scope = registry.config().count_scope;
        Self {
            key: SourceKey::new(options.url.clone()),
            options,
            registry,
            connections,
            count_scope,
        }
    }

    /// Source this handler serves
    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Launch options used for the source's transcoder
    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// Serve one viewer until it disconnects
    pub async fn handle<V: Viewer>(&self, mut viewer: V) -> Disconnect {
        if let Err(e) = viewer.send(StreamHeader::placeholder().encode()).await {
            tracing::debug!(source = %self.key, error = %e, "Failed to send stream header");
            return Disconnect::SendFailed;
        }

        verbose_log!(self.options.verbose, info, source = %self.key, "New viewer connection");

        let supervisor = self.registry.get_or_create(&self.key).await;
        self.connections.fetch_add(1, Ordering::Relaxed);
        supervisor.attach();

        let rx = match supervisor.acquire(&self.options).await {
            Ok(rx) => rx,
            Err(_) => {
                // acquire already logged the spawn error
                self.leave(&supervisor);
                return Disconnect::SpawnFailed;
            }
        };

        let reason = forward(&mut viewer, rx, &self.key).await;

        let remaining = self.leave(&supervisor);
        verbose_log!(
            self.options.verbose,
            info,
            source = %self.key,
            remaining = remaining,
            reason = ?reason,
            "Viewer disconnected"
        );
        supervisor.release(remaining).await;

        reason
    }

    /// Drop this viewer from the counters and return the count used for release
    fn leave(&self, supervisor: &SourceSupervisor) -> usize {
        let source_remaining = supervisor.detach();
        let global_remaining = self
            .connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);

        match self.count_scope {
            CountScope::PerSource => source_remaining,
            CountScope::Global => global_remaining,
        }
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("key", &self.key)
            .field("options", &self.options)
            .field("count_scope", &self.count_scope)
            .finish()
    }
}

/// Forward chunks until the viewer or the feed goes away
///
/// The subscription is dropped on return, so the viewer stops receiving
/// before the supervisor is told about the departure.
async fn forward<V: Viewer>(
    viewer: &mut V,
    mut rx: broadcast::Receiver<Bytes>,
    key: &SourceKey,
) -> Disconnect {
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Ok(chunk) => {
                    // A closing viewer silently drops chunks
                    if !viewer.is_open() {
                        continue;
                    }
                    if let Err(e) = viewer.send(chunk).await {
                        tracing::debug!(source = %key, error = %e, "Viewer send failed");
                        return Disconnect::SendFailed;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(source = %key, skipped = skipped, "Viewer lagging, chunks dropped");
                }
                Err(RecvError::Closed) => return Disconnect::UpstreamEnded,
            },
            _ = viewer.closed() => return Disconnect::ViewerClosed,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::RelayConfig;
    use crate::test_support::{fake_config, wait_until};

    fn handler(config: RelayConfig, url: &str) -> (ConnectionHandler, Arc<RelayRegistry>) {
        let registry = Arc::new(RelayRegistry::with_config(config));
        let handler = ConnectionHandler::new(
            LaunchOptions::new(url),
            Arc::clone(&registry),
            Arc::new(AtomicUsize::new(0)),
        );
        (handler, registry)
    }

    async fn recv(rx: &mut mpsc::Receiver<Bytes>) -> Bytes {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for chunk")
            .expect("viewer channel closed")
    }

    #[tokio::test]
    async fn test_preamble_first() {
        let (handler, _registry) = handler(fake_config(), "fake://steady");
        let (viewer, mut rx) = ChannelViewer::new(64);

        let task = tokio::spawn(async move { handler.handle(viewer).await });

        let header = recv(&mut rx).await;
        assert_eq!(&header[..], &[0x6A, 0x73, 0x6D, 0x70, 0, 0, 0, 0]);
        assert!(!recv(&mut rx).await.is_empty());

        drop(rx);
        assert_eq!(task.await.unwrap(), Disconnect::ViewerClosed);
    }

    #[tokio::test]
    async fn test_last_viewer_stops_process() {
        let (handler, registry) = handler(fake_config(), "fake://steady");
        let key = handler.key().clone();
        let (viewer, mut rx) = ChannelViewer::new(64);

        let task = tokio::spawn(async move { handler.handle(viewer).await });
        recv(&mut rx).await;
        recv(&mut rx).await;
        assert!(registry.has_live_process(&key).await);

        drop(rx);
        task.await.unwrap();

        let stats = registry.get_source_stats(&key).await.unwrap();
        assert!(!stats.live);
        assert_eq!(stats.consumers, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_ends_connection() {
        let config = RelayConfig::default().transcoder_path("/nonexistent/ffmpeg");
        let (handler, registry) = handler(config, "rtsp://cam1");
        let (viewer, mut rx) = ChannelViewer::new(4);

        assert_eq!(handler.handle(viewer).await, Disconnect::SpawnFailed);
        // preamble still went out
        assert_eq!(rx.recv().await.unwrap().len(), HEADER_LEN);

        let stats = registry.get_source_stats(handler.key()).await.unwrap();
        assert_eq!(stats.consumers, 0);
        assert!(!stats.live);
    }

    #[tokio::test]
    async fn test_upstream_crash_ends_forwarding() {
        let (handler, registry) = handler(fake_config(), "fake://crash");
        let key = handler.key().clone();
        let (viewer, _rx) = ChannelViewer::new(64);

        let reason = tokio::time::timeout(Duration::from_secs(5), handler.handle(viewer))
            .await
            .unwrap();
        assert_eq!(reason, Disconnect::UpstreamEnded);

        let registry_check = Arc::clone(&registry);
        wait_until(move || {
            let registry = Arc::clone(&registry_check);
            let key = key.clone();
            async move { !registry.has_live_process(&key).await }
        })
        .await;
    }

    /// Counter values carried by a batch of fake transcoder chunks
    fn counters(chunks: &[Bytes]) -> Vec<u64> {
        chunks
            .iter()
            .flat_map(|chunk| {
                String::from_utf8_lossy(chunk)
                    .lines()
                    .filter_map(|line| line.trim().parse().ok())
                    .collect::<Vec<u64>>()
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handover_keeps_new_viewer_fed() {
        let (handler, registry) = handler(fake_config(), "fake://steady");
        let key = handler.key().clone();

        let (viewer, mut current) = ChannelViewer::new(64);
        let h = handler.clone();
        let mut task = tokio::spawn(async move { h.handle(viewer).await });
        recv(&mut current).await;
        recv(&mut current).await;

        for _ in 0..20 {
            let (viewer, mut next) = ChannelViewer::new(64);
            let h = handler.clone();
            let next_task = tokio::spawn(async move { h.handle(viewer).await });
            // previous viewer leaves while the next one is joining
            drop(current);

            assert_eq!(recv(&mut next).await.len(), HEADER_LEN);
            for _ in 0..3 {
                recv(&mut next).await;
            }
            assert_ne!(task.await.unwrap(), Disconnect::UpstreamEnded);

            current = next;
            task = next_task;
        }

        let stats = registry.get_source_stats(&key).await.unwrap();
        assert!(stats.live);
        assert_eq!(stats.consumers, 1);

        drop(current);
        task.await.unwrap();
        assert!(!registry.has_live_process(&key).await);
    }

    #[tokio::test]
    async fn test_lagging_viewer_skips_ahead() {
        let config = fake_config().broadcast_capacity(2);
        let (handler, registry) = handler(config, "fake://steady");
        let key = handler.key().clone();
        // room for a single chunk, so the handler blocks while nobody reads
        let (viewer, mut rx) = ChannelViewer::new(1);

        let task = tokio::spawn(async move { handler.handle(viewer).await });
        assert_eq!(recv(&mut rx).await.len(), HEADER_LEN);

        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut chunks = Vec::new();
        for _ in 0..10 {
            chunks.push(recv(&mut rx).await);
        }
        let numbers = counters(&chunks);
        assert!(
            numbers.windows(2).any(|w| w[1] > w[0] + 1),
            "expected a gap after lagging: {:?}",
            numbers
        );
        assert!(numbers.windows(2).all(|w| w[1] > w[0]));
        assert!(!task.is_finished());
        assert!(registry.has_live_process(&key).await);

        drop(rx);
        assert!(matches!(
            task.await.unwrap(),
            Disconnect::ViewerClosed | Disconnect::SendFailed
        ));
    }

    #[tokio::test]
    async fn test_global_scope_counts_all_sources() {
        let config = fake_config().count_scope(CountScope::Global);
        let registry = Arc::new(RelayRegistry::with_config(config));
        let connections = Arc::new(AtomicUsize::new(0));
        let cam1 = ConnectionHandler::new(
            LaunchOptions::new("fake://steady?cam1"),
            Arc::clone(&registry),
            Arc::clone(&connections),
        );
        let cam2 = ConnectionHandler::new(
            LaunchOptions::new("fake://steady?cam2"),
            Arc::clone(&registry),
            Arc::clone(&connections),
        );

        let (v1, mut rx1) = ChannelViewer::new(64);
        let (v2, mut rx2) = ChannelViewer::new(64);
        let key1 = cam1.key().clone();
        let t1 = tokio::spawn(async move { cam1.handle(v1).await });
        let _t2 = tokio::spawn(async move { cam2.handle(v2).await });
        recv(&mut rx1).await;
        recv(&mut rx1).await;
        recv(&mut rx2).await;
        recv(&mut rx2).await;
        assert_eq!(connections.load(Ordering::Relaxed), 2);

        // cam1's last viewer leaves, but the global count still sees cam2's
        drop(rx1);
        t1.await.unwrap();
        assert!(registry.has_live_process(&key1).await);
        assert_eq!(connections.load(Ordering::Relaxed), 1);

        drop(rx2);
    }
}
