//! Protocol Error Types

use can_bus::FrameError;
use thiserror::Error;

/// Errors encoding requests or decoding transport frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Identifier does not fit the width the service encodes
    #[error("identifier 0x{identifier:X} does not fit {bits}-bit field")]
    IdentifierTooWide { identifier: u32, bits: u8 },

    /// Request does not fit a single transport frame
    #[error("request of {len} bytes exceeds single frame capacity of {capacity}")]
    RequestTooLong { len: usize, capacity: usize },

    /// Frame shorter than its transport header
    #[error("frame too short for transport header")]
    Truncated,

    /// Single frame declares more bytes than the frame carries
    #[error("single frame declares {declared} bytes, frame carries {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// Protocol control information not understood
    #[error("unsupported protocol control byte 0x{0:02X}")]
    UnsupportedPci(u8),

    /// Could not build the CAN frame
    #[error("invalid CAN frame: {0}")]
    Frame(#[from] FrameError),
}
