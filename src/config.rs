//! Relay configuration

use std::path::PathBuf;

use crate::upstream::VIDEO_CODEC;

/// How the remaining consumer count is computed when a viewer leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountScope {
    /// Count only viewers still attached to the same source
    #[default]
    PerSource,
    /// Count every viewer connected through the relay, across all sources
    ///
    /// A disconnect on one source can then stop another source's
    /// transcoder when the global total happens to reach zero.
    Global,
}

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Path to the transcoder executable
    pub transcoder_path: PathBuf,

    /// Capacity of each source's broadcast channel, in chunks
    pub broadcast_capacity: usize,

    /// Maximum bytes read from the transcoder per chunk
    pub read_chunk_size: usize,

    /// Consumer counting used on release
    pub count_scope: CountScope,

    /// Argument that identifies our transcoders in the process table
    pub reap_signature: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transcoder_path: PathBuf::from("ffmpeg"),
            broadcast_capacity: 256,
            read_chunk_size: 64 * 1024, // 64KB
            count_scope: CountScope::PerSource,
            reap_signature: VIDEO_CODEC.to_string(),
        }
    }
}

impl RelayConfig {
    /// Set the transcoder executable
    pub fn transcoder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcoder_path = path.into();
        self
    }

    /// Set the broadcast channel capacity
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Set the read chunk size
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Set the consumer counting scope
    pub fn count_scope(mut self, scope: CountScope) -> Self {
        self.count_scope = scope;
        self
    }

    /// Set the argument used to recognize stray transcoders
    pub fn reap_signature(mut self, signature: impl Into<String>) -> Self {
        self.reap_signature = signature.into();
        self
    }

    /// File name of the transcoder binary (e.g. `ffmpeg`)
    pub fn transcoder_name(&self) -> String {
        self.transcoder_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.transcoder_path.to_string_lossy().into_owned())
    }
}
