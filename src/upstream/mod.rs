//! Upstream transcoder processes
//!
//! An [`UpstreamProcess`] wraps one spawned transcoder. Its stdout is the
//! byte-chunk producer that gets fanned out to viewers; its exit is reported
//! as an [`ExitReason`] so crashes can be told apart from deliberate stops.

pub mod options;
pub mod process;

pub use options::{LaunchOptions, FRAME_RATE, OUTPUT_FORMAT, VIDEO_CODEC};
pub use process::{ExitReason, UpstreamProcess};
