//! Source registry and per-source supervision
//!
//! The registry maps each source to a [`SourceSupervisor`], which owns the
//! source's transcoder and fans its output out with `tokio::sync::broadcast`.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<RelayRegistry>
//!                  ┌──────────────────────────┐
//!                  │ sources: HashMap<Key,    │
//!                  │   SourceSupervisor {     │
//!                  │     process: Option<     │
//!                  │       UpstreamProcess>,  │
//!                  │     consumers,           │
//!                  │   }                      │
//!                  │ >                        │
//!                  └────────────┬─────────────┘
//!                               │
//!      ┌────────────────────────┼────────────────────────┐
//!      │                        │                        │
//!      ▼                        ▼                        ▼
//! [ffmpeg stdout]         [Viewer]                 [Viewer]
//!  pump_output()          rx.recv()                rx.recv()
//!      │                        │                        │
//!      └──► broadcast::Sender ──┴──► viewer.send() ──────┘
//! ```
//!
//! # Zero-Copy Fan-out
//!
//! Chunks are `bytes::Bytes`, so every viewer shares the allocation read
//! from the transcoder; the broadcast channel only bumps a reference count.

pub mod key;
pub mod store;
pub mod supervisor;

pub use key::SourceKey;
pub use store::RelayRegistry;
pub use supervisor::{SourceStats, SourceSupervisor};
