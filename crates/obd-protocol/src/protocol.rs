//! Segmented Transport Variants

use can_bus::{CanFrame, FrameError};
use serde::{Deserialize, Serialize};

/// ISO 15765-2 framing variant used by a poll entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportVariant {
    /// Normal addressing, 11-bit identifiers
    #[default]
    Standard,
    /// Normal addressing, 29-bit identifiers
    ExtendedFrame,
    /// Extended addressing: first data byte carries the target address
    ExtendedAddressing { target: u8 },
}

impl TransportVariant {
    /// Offset of the protocol control byte inside the CAN payload
    pub const fn pci_offset(&self) -> usize {
        match self {
            TransportVariant::ExtendedAddressing { .. } => 1,
            _ => 0,
        }
    }

    /// Payload bytes carried by a single frame
    pub const fn single_frame_capacity(&self) -> usize {
        7 - self.pci_offset()
    }

    /// Payload bytes carried by a first frame
    pub const fn first_frame_capacity(&self) -> usize {
        6 - self.pci_offset()
    }

    /// Payload bytes carried by a consecutive frame
    pub const fn consecutive_frame_capacity(&self) -> usize {
        7 - self.pci_offset()
    }

    /// Check if this variant uses 29-bit identifiers
    pub const fn uses_extended_ids(&self) -> bool {
        matches!(self, TransportVariant::ExtendedFrame)
    }

    /// Build a padded 8-byte frame from transport bytes (PCI onwards)
    pub fn frame(&self, id: u32, transport: &[u8], pad: u8) -> Result<CanFrame, FrameError> {
        let offset = self.pci_offset();
        if transport.len() + offset > CanFrame::MAX_LEN {
            return Err(FrameError::PayloadTooLong(transport.len() + offset));
        }
        let mut data = [pad; CanFrame::MAX_LEN];
        if let TransportVariant::ExtendedAddressing { target } = self {
            data[0] = *target;
        }
        data[offset..offset + transport.len()].copy_from_slice(transport);

        if self.uses_extended_ids() {
            CanFrame::new_extended(id, &data)
        } else {
            CanFrame::new(id, &data)
        }
    }
}
