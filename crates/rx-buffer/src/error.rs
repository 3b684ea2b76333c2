//! Buffer Error Types

use thiserror::Error;

/// Errors raised by [`RxBuffer`](crate::RxBuffer) operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Appending would exceed the pre-allocated capacity
    #[error("buffer overflow: {requested} bytes requested, capacity is {capacity}")]
    Overflow { requested: usize, capacity: usize },

    /// A read reached past the filled part of the buffer
    #[error("read of {width} bytes at offset {offset} is out of bounds (length {len})")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
}
