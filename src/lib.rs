//! # rtsp-relay
//!
//! Relays one upstream media source to many viewers through a shared
//! ffmpeg process that is started on demand.
//!
//! - The first viewer of a source spawns `ffmpeg -i <url> -f mpegts
//!   -codec:v mpeg1video -r 30 ... -`; later viewers share it.
//! - Every chunk ffmpeg writes to stdout is broadcast to all attached
//!   viewers, after an 8-byte `jsmp` preamble understood by jsmpeg.
//! - When the last viewer leaves, ffmpeg is stopped with SIGTERM. If it
//!   dies on its own, the next viewer transparently starts a new one.
//! - [`Relay::kill_all`] reaps stray transcoders from the process table.
//!
//! ```text
//! viewer ──► ConnectionHandler ──► RelayRegistry ──► SourceSupervisor ──► UpstreamProcess
//!   ▲                                                        │                 (ffmpeg)
//!   └──────────────── broadcast::Receiver<Bytes> ◄───────────┘
//! ```
//!
//! The transport is abstracted by the [`Viewer`] trait; [`ChannelViewer`]
//! and [`TcpViewer`] are provided, and [`RelayServer`] serves a source
//! over plain TCP.

/// Log at `$level` when `$verbose` is set, at debug otherwise
macro_rules! verbose_log {
    ($verbose:expr, $level:ident, $($arg:tt)+) => {
        if $verbose {
            tracing::$level!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod config;
pub mod error;
pub mod handler;
pub mod reaper;
pub mod registry;
pub mod relay;
pub mod server;
pub mod upstream;

pub use config::{CountScope, RelayConfig};
pub use error::{Error, Result};
pub use handler::{ChannelViewer, ConnectionHandler, Disconnect, StreamHeader, TcpViewer, Viewer};
pub use reaper::FleetReaper;
pub use registry::{RelayRegistry, SourceKey, SourceStats, SourceSupervisor};
pub use relay::Relay;
pub use server::{RelayServer, ServerConfig};
pub use upstream::{ExitReason, LaunchOptions, UpstreamProcess};
