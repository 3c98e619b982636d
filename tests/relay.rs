//! Integration tests for rtsp-relay.
//!
//! A shell script in `tests/fixtures` stands in for ffmpeg. For most URLs it
//! prints an increasing counter, one line every 20ms; `fake://crash` prints
//! once and exits with status 3.

#![cfg(unix)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rtsp_relay::{
    ChannelViewer, ConnectionHandler, Disconnect, LaunchOptions, Relay, RelayConfig, StreamHeader,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const FAKE_TRANSCODER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake-transcoder");

fn fake_config() -> RelayConfig {
    RelayConfig::default().transcoder_path(FAKE_TRANSCODER)
}

/// Consumer side of a channel viewer
struct TestViewer {
    rx: mpsc::Receiver<Bytes>,
    pending: String,
}

impl TestViewer {
    async fn recv(&mut self) -> Bytes {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for chunk")
            .expect("viewer channel closed")
    }

    async fn header(&mut self) -> StreamHeader {
        let bytes = self.recv().await;
        assert_eq!(bytes.len(), 8);
        StreamHeader::decode(&bytes).expect("bad preamble")
    }

    /// Read at least `count` counter values
    async fn numbers(&mut self, count: usize) -> Vec<u64> {
        let mut out = Vec::new();
        while out.len() < count {
            let chunk = self.recv().await;
            self.pending
                .push_str(std::str::from_utf8(&chunk).expect("non-utf8 chunk"));
            while let Some(pos) = self.pending.find('\n') {
                let line: String = self.pending.drain(..=pos).collect();
                out.push(line.trim().parse().expect("not a counter line"));
            }
        }
        out
    }
}

fn connect(handler: &ConnectionHandler) -> (TestViewer, JoinHandle<Disconnect>) {
    let (viewer, rx) = ChannelViewer::new(256);
    let handler = handler.clone();
    let task = tokio::spawn(async move { handler.handle(viewer).await });

    (
        TestViewer {
            rx,
            pending: String::new(),
        },
        task,
    )
}

fn assert_consecutive(numbers: &[u64]) {
    assert!(
        numbers.windows(2).all(|w| w[1] == w[0] + 1),
        "out of order or missing chunks: {:?}",
        numbers
    );
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_viewers_share_one_transcoder() {
    let relay = Relay::new(fake_config());
    let handler = relay.proxy(LaunchOptions::new("fake://steady")).unwrap();

    let mut viewers: Vec<_> = (0..8).map(|_| connect(&handler)).collect();
    for (viewer, _) in viewers.iter_mut() {
        assert_eq!(viewer.header().await, StreamHeader::new(0, 0));
        viewer.numbers(1).await;
    }

    let stats = relay.registry().get_source_stats(handler.key()).await.unwrap();
    assert_eq!(stats.spawn_count, 1);
    assert_eq!(stats.consumers, 8);
    assert_eq!(relay.connection_count(), 8);

    for (viewer, task) in viewers {
        drop(viewer);
        task.await.unwrap();
    }
    assert!(!relay.registry().has_live_process(handler.key()).await);
    assert_eq!(relay.connection_count(), 0);
}

#[tokio::test]
async fn test_chunks_reach_every_viewer_in_order() {
    let relay = Relay::new(fake_config());
    let handler = relay.proxy(LaunchOptions::new("fake://steady")).unwrap();

    let (mut a, _ta) = connect(&handler);
    let (mut b, _tb) = connect(&handler);
    let (mut c, _tc) = connect(&handler);
    a.header().await;
    b.header().await;
    c.header().await;

    let seq_a = a.numbers(10).await;
    let seq_b = b.numbers(10).await;
    let seq_c = c.numbers(10).await;

    assert_consecutive(&seq_a);
    assert_consecutive(&seq_b);
    assert_consecutive(&seq_c);
    // one upstream: every viewer sees the same counter
    assert!(seq_b.iter().any(|n| seq_a.contains(n) || seq_c.contains(n)));
}

#[tokio::test]
async fn test_one_of_two_viewers_leaves() {
    let relay = Relay::new(fake_config());
    let handler = relay.proxy(LaunchOptions::new("rtsp://cam1")).unwrap();
    let key = handler.key().clone();

    let (mut stays, _stays_task) = connect(&handler);
    let (mut leaves, leaves_task) = connect(&handler);
    stays.header().await;
    leaves.header().await;
    stays.numbers(2).await;
    leaves.numbers(2).await;

    let before = relay.registry().get_source_stats(&key).await.unwrap();

    drop(leaves);
    assert!(matches!(
        leaves_task.await.unwrap(),
        Disconnect::ViewerClosed | Disconnect::SendFailed
    ));

    let after = relay.registry().get_source_stats(&key).await.unwrap();
    assert!(after.live);
    assert_eq!(after.consumers, 1);
    assert_eq!(after.instance, before.instance);

    assert_consecutive(&stays.numbers(10).await);
}

#[tokio::test]
async fn test_last_viewer_stops_and_next_respawns() {
    let relay = Relay::new(fake_config());
    let handler = relay.proxy(LaunchOptions::new("fake://steady")).unwrap();
    let key = handler.key().clone();

    let (mut first, first_task) = connect(&handler);
    first.header().await;
    first.numbers(1).await;
    let first_instance = relay.registry().get_source_stats(&key).await.unwrap().instance;

    drop(first);
    first_task.await.unwrap();
    assert!(!relay.registry().has_live_process(&key).await);

    let (mut second, _second_task) = connect(&handler);
    second.header().await;
    second.numbers(1).await;

    let stats = relay.registry().get_source_stats(&key).await.unwrap();
    assert!(stats.live);
    assert_eq!(stats.spawn_count, 2);
    assert_ne!(stats.instance, first_instance);
}

#[tokio::test]
async fn test_crash_respawns_on_next_viewer() {
    let relay = Relay::new(fake_config());
    let handler = relay.proxy(LaunchOptions::new("fake://crash")).unwrap();
    let key = handler.key().clone();

    let (mut viewer, task) = connect(&handler);
    viewer.header().await;
    let reason = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, Disconnect::UpstreamEnded);

    let registry = Arc::clone(relay.registry());
    let check_key = key.clone();
    wait_until(move || {
        let registry = Arc::clone(&registry);
        let key = check_key.clone();
        async move { !registry.has_live_process(&key).await }
    })
    .await;

    let (mut again, again_task) = connect(&handler);
    again.header().await;
    tokio::time::timeout(Duration::from_secs(5), again_task)
        .await
        .unwrap()
        .unwrap();

    let stats = relay.registry().get_source_stats(&key).await.unwrap();
    assert_eq!(stats.spawn_count, 2);
}

#[tokio::test]
async fn test_empty_url_rejected_before_spawn() {
    let relay = Relay::new(fake_config());

    assert!(matches!(
        relay.proxy(LaunchOptions::new("")),
        Err(rtsp_relay::Error::MissingUrl)
    ));
    assert!(relay.registry().is_empty().await);
}

#[tokio::test]
async fn test_sources_are_independent() {
    let relay = Relay::new(fake_config());
    let cam1 = relay.proxy(LaunchOptions::new("rtsp://cam1")).unwrap();
    let cam2 = relay.proxy(LaunchOptions::new("rtsp://cam2")).unwrap();

    let (mut v1, t1) = connect(&cam1);
    let (mut v2, _t2) = connect(&cam2);
    v1.header().await;
    v2.header().await;
    v1.numbers(1).await;
    v2.numbers(1).await;

    drop(v1);
    t1.await.unwrap();

    assert!(!relay.registry().has_live_process(cam1.key()).await);
    assert!(relay.registry().has_live_process(cam2.key()).await);
    assert_consecutive(&v2.numbers(5).await);
    assert_eq!(relay.registry().len().await, 2);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_kill_all_reaps_transcoders() {
    // unique marker so transcoders from other tests are left alone
    let marker = format!("reaper-test-{}", std::process::id());
    let relay = Relay::new(fake_config().reap_signature(marker.clone()));
    let handler = relay
        .proxy(LaunchOptions::new("fake://steady").additional_flags(["-metadata", marker.as_str()]))
        .unwrap();

    let (mut viewer, task) = connect(&handler);
    viewer.header().await;
    viewer.numbers(1).await;
    let pid = relay
        .registry()
        .get_source_stats(handler.key())
        .await
        .unwrap()
        .pid
        .unwrap();

    let reaped = relay.kill_all().await.unwrap();
    // may also catch the shell mid-fork of a `sleep`
    assert!(reaped.contains(&pid));

    // the feed ends with the process
    let reason = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, Disconnect::UpstreamEnded);
}
