//! A single spawned transcoder instance
//!
//! The child process is owned by a background watcher task. Stdout is read
//! in chunks and broadcast verbatim; stderr is drained so the child never
//! blocks on a full pipe. The watcher publishes an [`ExitReason`] once the
//! child is gone.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{broadcast, watch, Notify};

use crate::config::RelayConfig;
use crate::error::{Error, Result};

use super::options::LaunchOptions;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// How an upstream process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stopped on purpose with the graceful-stop signal
    GracefulStop,
    /// Exited on its own (crash, source dropped, bad arguments)
    Unexpected {
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Terminating signal, if any
        signal: Option<i32>,
    },
}

impl ExitReason {
    /// Classify an exit status
    ///
    /// `stop_requested` covers transcoders that trap SIGTERM and exit with
    /// a regular status code instead of dying from the signal.
    pub fn from_status(status: ExitStatus, stop_requested: bool) -> Self {
        let signal = exit_signal(&status);

        if stop_requested || signal == Some(libc::SIGTERM) {
            ExitReason::GracefulStop
        } else {
            ExitReason::Unexpected {
                code: status.code(),
                signal,
            }
        }
    }

    /// Whether this exit should trigger a respawn on next demand
    pub fn is_unexpected(&self) -> bool {
        matches!(self, ExitReason::Unexpected { .. })
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Handle to one running transcoder
///
/// Dropping the handle does not stop the process; call [`terminate`](Self::terminate).
pub struct UpstreamProcess {
    instance: u64,
    pid: Option<u32>,
    // Only ever resubscribed. The pump task owns the sole sender, so every
    // subscription closes when stdout ends.
    output: broadcast::Receiver<Bytes>,
    exit_rx: watch::Receiver<Option<ExitReason>>,
    stop: Arc<Notify>,
}

impl UpstreamProcess {
    /// Spawn the transcoder for `options`
    ///
    /// Must be called from within a tokio runtime. Returns as soon as the
    /// child is spawned; output arrives through [`subscribe`](Self::subscribe).
    pub fn launch(config: &RelayConfig, options: &LaunchOptions) -> Result<Self> {
        let mut cmd = Command::new(&config.transcoder_path);
        cmd.args(options.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            binary: config.transcoder_path.clone(),
            source,
        })?;

        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let (tx, output) = broadcast::channel(config.broadcast_capacity);
        let (exit_tx, exit_rx) = watch::channel(None);
        let stop = Arc::new(Notify::new());

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(stdout, tx, config.read_chunk_size, instance));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_diagnostics(stderr, options.verbose, instance));
        }
        tokio::spawn(watch_exit(child, Arc::clone(&stop), exit_tx, instance));

        tracing::debug!(
            source = %options.url,
            instance = instance,
            pid = ?pid,
            "Transcoder spawned"
        );

        Ok(Self {
            instance,
            pid,
            output,
            exit_rx,
            stop,
        })
    }

    /// Unique id of this spawn
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// OS process id, if the child was still running when spawned
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Subscribe to the output chunks
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.output.resubscribe()
    }

    /// Exit reason, or `None` while the process runs
    pub fn exit_reason(&self) -> Option<ExitReason> {
        *self.exit_rx.borrow()
    }

    /// Whether the process is still running
    pub fn is_alive(&self) -> bool {
        self.exit_reason().is_none()
    }

    /// Watch channel that receives the exit reason
    pub fn exit_receiver(&self) -> watch::Receiver<Option<ExitReason>> {
        self.exit_rx.clone()
    }

    /// Ask the process to stop with the graceful-stop signal
    ///
    /// Fire-and-forget: does not wait for the process to exit.
    pub fn terminate(&self) {
        self.stop.notify_one();
    }
}

impl std::fmt::Debug for UpstreamProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamProcess")
            .field("instance", &self.instance)
            .field("pid", &self.pid)
            .field("exit_reason", &self.exit_reason())
            .finish()
    }
}

async fn pump_output(
    mut stdout: ChildStdout,
    tx: broadcast::Sender<Bytes>,
    chunk_size: usize,
    instance: u64,
) {
    let mut buf = BytesMut::with_capacity(chunk_size);

    loop {
        buf.reserve(chunk_size);
        match stdout.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // No receivers is fine; the chunk is simply dropped
                let _ = tx.send(buf.split().freeze());
            }
            Err(e) => {
                tracing::debug!(instance = instance, error = %e, "Transcoder stdout error");
                break;
            }
        }
    }

    tracing::trace!(instance = instance, "Transcoder stdout closed");
}

async fn drain_diagnostics(stderr: ChildStderr, verbose: bool, instance: u64) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) if verbose => {
                tracing::trace!(
                    instance = instance,
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "transcoder"
                );
            }
            Ok(_) => {}
        }
    }
}

async fn watch_exit(
    mut child: Child,
    stop: Arc<Notify>,
    exit_tx: watch::Sender<Option<ExitReason>>,
    instance: u64,
) {
    let mut stop_requested = false;

    let status = tokio::select! {
        status = child.wait() => status,
        _ = stop.notified() => {
            stop_requested = true;
            send_graceful_stop(&mut child, instance);
            child.wait().await
        }
    };

    let reason = match status {
        Ok(status) => ExitReason::from_status(status, stop_requested),
        Err(e) => {
            tracing::debug!(instance = instance, error = %e, "Failed to wait on transcoder");
            ExitReason::Unexpected {
                code: None,
                signal: None,
            }
        }
    };

    tracing::debug!(instance = instance, reason = ?reason, "Transcoder exited");
    let _ = exit_tx.send(Some(reason));
}

#[cfg(unix)]
fn send_graceful_stop(child: &mut Child, instance: u64) {
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from our own un-reaped Child, so it cannot have
        // been recycled for another process yet.
        #[allow(unsafe_code)]
        let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            tracing::warn!(instance = instance, pid = pid, error = %err, "Failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn send_graceful_stop(child: &mut Child, instance: u64) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(instance = instance, error = %e, "Failed to stop transcoder");
    }
}
