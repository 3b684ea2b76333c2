//! CAN Frame Types

use crate::{MAX_EXTENDED_ID, MAX_STANDARD_ID};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Logical bus number (can1, can2, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(pub u8);

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can{}", self.0)
    }
}

/// Errors building a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("CAN payload of {0} bytes exceeds 8")]
    PayloadTooLong(usize),

    #[error("CAN identifier 0x{0:X} out of range")]
    InvalidId(u32),
}

/// Classic CAN data frame (up to 8 bytes)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    len: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Maximum classic CAN payload
    pub const MAX_LEN: usize = 8;

    /// Create a frame; identifiers above 0x7FF use the 29-bit format
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, FrameError> {
        Self::build(id, id > MAX_STANDARD_ID, payload)
    }

    /// Create a frame that always uses the 29-bit identifier format
    pub fn new_extended(id: u32, payload: &[u8]) -> Result<Self, FrameError> {
        Self::build(id, true, payload)
    }

    /// Create a frame with the identifier format given by the driver
    pub fn with_format(id: u32, extended: bool, payload: &[u8]) -> Result<Self, FrameError> {
        Self::build(id, extended, payload)
    }

    /// Create a frame from a driver-style `(id, length, payload)` triple
    ///
    /// Only the first `len` bytes of `payload` are used.
    pub fn from_parts(id: u32, len: usize, payload: &[u8]) -> Result<Self, FrameError> {
        if len > Self::MAX_LEN || len > payload.len() {
            return Err(FrameError::PayloadTooLong(len));
        }
        Self::new(id, &payload[..len])
    }

    fn build(id: u32, extended: bool, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > Self::MAX_LEN {
            return Err(FrameError::PayloadTooLong(payload.len()));
        }
        let limit = if extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if id > limit {
            return Err(FrameError::InvalidId(id));
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            extended,
            len: payload.len() as u8,
            data,
        })
    }

    /// Arbitration identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the identifier is 29-bit
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Data length code
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if the frame carries no data
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X} [", self.id)?;
        } else {
            write!(f, "{:03X} [", self.id)?;
        }
        for (i, b) in self.data().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_and_extended_selection() {
        let frame = CanFrame::new(0x7E8, &[0x02, 0x41, 0x0D]).unwrap();
        assert!(!frame.is_extended());
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.data(), &[0x02, 0x41, 0x0D]);

        let frame = CanFrame::new(0x18DA_F110, &[0x01]).unwrap();
        assert!(frame.is_extended());

        let frame = CanFrame::new_extended(0x7E0, &[]).unwrap();
        assert!(frame.is_extended());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_driver_format_is_kept() {
        // 29-bit frame with a small identifier stays extended
        let frame = CanFrame::with_format(0x7E8, true, &[0x01]).unwrap();
        assert!(frame.is_extended());
        assert_ne!(frame, CanFrame::new(0x7E8, &[0x01]).unwrap());

        let frame = CanFrame::with_format(0x7E8, false, &[0x01]).unwrap();
        assert!(!frame.is_extended());
        assert_eq!(
            CanFrame::with_format(0x800, false, &[]),
            Err(FrameError::InvalidId(0x800))
        );
    }

    #[test]
    fn test_invalid_frames_rejected() {
        assert_eq!(
            CanFrame::new(0x7E8, &[0; 9]),
            Err(FrameError::PayloadTooLong(9))
        );
        assert_eq!(
            CanFrame::new(0x2000_0000, &[]),
            Err(FrameError::InvalidId(0x2000_0000))
        );
    }

    #[test]
    fn test_from_parts_uses_declared_length() {
        let payload = [0x10, 0x14, 0x49, 0x02, 0x01, 0x57, 0x30, 0x4C];
        let frame = CanFrame::from_parts(0x7E8, 4, &payload).unwrap();
        assert_eq!(frame.data(), &[0x10, 0x14, 0x49, 0x02]);
        assert!(CanFrame::from_parts(0x7E8, 9, &payload).is_err());
        assert!(CanFrame::from_parts(0x7E8, 3, &payload[..2]).is_err());
    }

    #[test]
    fn test_debug_format() {
        let frame = CanFrame::new(0x7DF, &[0x02, 0x01, 0x0C]).unwrap();
        assert_eq!(format!("{:?}", frame), "7DF [02 01 0C]");
        assert_eq!(BusId(1).to_string(), "can1");
    }
}
