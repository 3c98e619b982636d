//! Per-viewer stream preamble
//!
//! Every viewer first receives 8 bytes understood by jsmpeg:
//!
//! ```text
//! +------+------+------+------+-------+-------+--------+--------+
//! | 'j'  | 's'  | 'm'  | 'p'  | width (u16 BE) | height (u16 BE) |
//! +------+------+------+------+-------+-------+--------+--------+
//! ```
//!
//! The source resolution is not probed, so width and height are sent as 0.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes identifying the stream protocol
pub const MAGIC: &[u8; 4] = b"jsmp";

/// Length of the encoded preamble
pub const HEADER_LEN: usize = 8;

/// Stream preamble sent before any media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamHeader {
    /// Video width in pixels
    pub width: u16,
    /// Video height in pixels
    pub height: u16,
}

impl StreamHeader {
    /// Create a header with an explicit resolution
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Header sent to viewers today (resolution unknown)
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// Encode to wire format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_slice(MAGIC);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.freeze()
    }

    /// Decode from wire format
    ///
    /// Returns `None` if the data is too short or the magic does not match.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN || &data[..4] != MAGIC {
            return None;
        }

        let mut buf = &data[4..HEADER_LEN];
        Some(Self {
            width: buf.get_u16(),
            height: buf.get_u16(),
        })
    }
}
