//! Relay entry point
//!
//! [`Relay`] owns the source registry for the lifetime of the application
//! and hands out one [`ConnectionHandler`] per source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::handler::ConnectionHandler;
use crate::reaper::FleetReaper;
use crate::registry::RelayRegistry;
use crate::upstream::LaunchOptions;

/// On-demand transcoding relay
///
/// # Example
/// ```no_run
/// use rtsp_relay::{ChannelViewer, LaunchOptions, Relay, RelayConfig};
///
/// # async fn example() -> rtsp_relay::Result<()> {
/// let relay = Relay::new(RelayConfig::default());
/// let handler = relay.proxy(LaunchOptions::new("rtsp://cam1/stream").verbose(true))?;
///
/// let (viewer, mut chunks) = ChannelViewer::new(64);
/// tokio::spawn(async move { handler.handle(viewer).await });
///
/// while let Some(chunk) = chunks.recv().await {
///     println!("{} bytes", chunk.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Relay {
    registry: Arc<RelayRegistry>,
    connections: Arc<AtomicUsize>,
}

impl Relay {
    /// Create a relay with its own registry
    pub fn new(config: RelayConfig) -> Self {
        Self::with_registry(Arc::new(RelayRegistry::with_config(config)))
    }

    /// Create a relay around an existing registry
    pub fn with_registry(registry: Arc<RelayRegistry>) -> Self {
        Self {
            registry,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get a reference to the source registry
    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.registry
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        self.registry.config()
    }

    /// Viewers currently connected across all sources
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Build the connection handler for a source
    ///
    /// Fails with [`Error::MissingUrl`] when `options.url` is empty. No
    /// process is started until the first viewer connects.
    pub fn proxy(&self, options: LaunchOptions) -> Result<ConnectionHandler> {
        if options.url.is_empty() {
            return Err(Error::MissingUrl);
        }

        Ok(ConnectionHandler::new(
            options,
            Arc::clone(&self.registry),
            Arc::clone(&self.connections),
        ))
    }

    /// Terminate every transcoder this relay could have started
    ///
    /// Scans the OS process table rather than the registry, so it also
    /// catches processes left over from earlier runs. Registry state is not
    /// updated. Returns the pids that were signalled.
    pub async fn kill_all(&self) -> Result<Vec<u32>> {
        FleetReaper::from_config(self.config()).kill_all().await
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
