//! Per-source supervisor
//!
//! Owns zero or one [`UpstreamProcess`] for a source. The process is spawned
//! on first demand, shared by every consumer that acquires while it is live,
//! stopped when the last consumer releases, and forgotten when it dies on
//! its own so the next acquire starts a fresh one.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::upstream::{ExitReason, LaunchOptions, UpstreamProcess};

use super::key::SourceKey;

/// Snapshot of a supervisor's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    /// Consumers attached and not yet detached
    pub consumers: usize,
    /// Whether a running process is held
    pub live: bool,
    /// Processes spawned over the supervisor's lifetime
    pub spawn_count: u64,
    /// Instance id of the held process
    pub instance: Option<u64>,
    /// OS pid of the held process
    pub pid: Option<u32>,
}

#[derive(Default)]
struct SupervisorState {
    process: Option<UpstreamProcess>,
    options: Option<LaunchOptions>,
}

/// Supervisor for a single source
pub struct SourceSupervisor {
    key: SourceKey,
    config: Arc<RelayConfig>,
    state: Mutex<SupervisorState>,
    consumers: AtomicUsize,
    spawn_count: AtomicU64,
    verbose: AtomicBool,
}

impl SourceSupervisor {
    /// Create a supervisor with no process
    pub fn new(key: SourceKey, config: Arc<RelayConfig>) -> Self {
        Self {
            key,
            config,
            state: Mutex::new(SupervisorState::default()),
            consumers: AtomicUsize::new(0),
            spawn_count: AtomicU64::new(0),
            verbose: AtomicBool::new(false),
        }
    }

    /// Source this supervisor serves
    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Get a subscription to the live output, spawning the transcoder if needed
    ///
    /// The liveness check and the spawn happen under one lock, so concurrent
    /// callers share a single process. Does not change the consumer count;
    /// see [`attach`](Self::attach).
    pub async fn acquire(
        self: &Arc<Self>,
        options: &LaunchOptions,
    ) -> Result<broadcast::Receiver<Bytes>> {
        self.verbose.store(options.verbose, Ordering::Relaxed);
        let mut state = self.state.lock().await;

        if let Some(process) = state.process.as_ref().filter(|p| p.is_alive()) {
            return Ok(process.subscribe());
        }

        verbose_log!(options.verbose, info, source = %self.key, "Creating brand new stream");

        let process = match UpstreamProcess::launch(&self.config, options) {
            Ok(process) => process,
            Err(e) => {
                verbose_log!(
                    options.verbose,
                    warn,
                    source = %self.key,
                    error = %e,
                    "Internal error"
                );
                return Err(e);
            }
        };

        self.spawn_count.fetch_add(1, Ordering::Relaxed);
        self.watch_for_crash(&process);

        let rx = process.subscribe();
        state.process = Some(process);
        state.options = Some(options.clone());
        Ok(rx)
    }

    /// Drop the held process if `remaining` is zero
    ///
    /// No-op when no process is held. `remaining` may be stale by the time
    /// the lock is taken, so the process is kept while any consumer is
    /// attached: a consumer always attaches before it acquires, and acquire
    /// waits on the same lock. A process that already exited is left for
    /// the exit watcher or the next acquire.
    pub async fn release(&self, remaining: usize) {
        let verbose = self.verbose.load(Ordering::Relaxed);
        let mut state = self.state.lock().await;

        let Some(process) = state.process.take() else {
            return;
        };

        if remaining == 0 && self.consumer_count() == 0 && process.is_alive() {
            verbose_log!(
                verbose,
                info,
                source = %self.key,
                instance = process.instance(),
                "No clients left; destroying stream"
            );
            process.terminate();
        } else {
            state.process = Some(process);
        }

        // Logged on every release that found a process, including the one above
        verbose_log!(
            verbose,
            info,
            source = %self.key,
            remaining = remaining,
            "There are still some clients so not destroying stream"
        );
    }

    /// Record a consumer joining; returns the new count
    pub fn attach(&self) -> usize {
        self.consumers.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a consumer leaving; returns the remaining count
    pub fn detach(&self) -> usize {
        let prev = self
            .consumers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Consumers attached and not yet detached
    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Relaxed)
    }

    /// Whether a running process is currently held
    pub async fn is_live(&self) -> bool {
        self.state
            .lock()
            .await
            .process
            .as_ref()
            .is_some_and(UpstreamProcess::is_alive)
    }

    /// Launch options of the most recent spawn
    pub async fn last_options(&self) -> Option<LaunchOptions> {
        self.state.lock().await.options.clone()
    }

    /// Get supervisor statistics
    pub async fn stats(&self) -> SourceStats {
        let state = self.state.lock().await;
        let process = state.process.as_ref();

        SourceStats {
            consumers: self.consumer_count(),
            live: process.is_some_and(UpstreamProcess::is_alive),
            spawn_count: self.spawn_count.load(Ordering::Relaxed),
            instance: process.map(UpstreamProcess::instance),
            pid: process.and_then(UpstreamProcess::pid),
        }
    }

    fn watch_for_crash(self: &Arc<Self>, process: &UpstreamProcess) {
        let supervisor: Weak<Self> = Arc::downgrade(self);
        let mut exit_rx = process.exit_receiver();
        let instance = process.instance();

        tokio::spawn(async move {
            if exit_rx.wait_for(Option::is_some).await.is_err() {
                return;
            }
            let reason = *exit_rx.borrow();

            if let (Some(reason), Some(supervisor)) = (reason, supervisor.upgrade()) {
                supervisor.on_exit(instance, reason).await;
            }
        });
    }

    async fn on_exit(&self, instance: u64, reason: ExitReason) {
        if !reason.is_unexpected() {
            return;
        }

        let mut state = self.state.lock().await;
        if state.process.as_ref().map(UpstreamProcess::instance) != Some(instance) {
            return;
        }
        state.process = None;

        verbose_log!(
            self.verbose.load(Ordering::Relaxed),
            warn,
            source = %self.key,
            instance = instance,
            reason = ?reason,
            "Stream died - will recreate when the next client connects"
        );
    }
}

impl std::fmt::Debug for SourceSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSupervisor")
            .field("key", &self.key)
            .field("consumers", &self.consumer_count())
            .finish_non_exhaustive()
    }
}
