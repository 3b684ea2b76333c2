//! Reassembly Buffer
//!
//! Provides a fixed-capacity byte buffer that is allocated once and reused
//! for every poll response, plus checked accessors for decoding its contents.

mod buffer;
mod error;

pub use buffer::{RxBuffer, DEFAULT_CAPACITY};
pub use error::BufferError;
