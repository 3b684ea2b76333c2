//! ISO-TP (ISO 15765-2) Frame Codec
//!
//! Parses received frames into their protocol control variant and builds
//! single, first/consecutive and flow-control frames for transmission.

use crate::error::ProtocolError;
use crate::protocol::TransportVariant;
use can_bus::CanFrame;

/// Largest payload expressible in a 12-bit first frame length
pub const MAX_PAYLOAD: usize = 0xFFF;

/// Flow status "continue to send"
pub const FLOW_CONTINUE: u8 = 0x30;

/// Decoded transport frame
///
/// Payload slices run to the end of the CAN frame and may include padding,
/// except for single frames whose length is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoTpFrame<'a> {
    Single { data: &'a [u8] },
    First { total: usize, data: &'a [u8] },
    Consecutive { seq: u8, data: &'a [u8] },
    FlowControl { status: u8, block_size: u8, st_min: u8 },
}

impl IsoTpFrame<'_> {
    /// Check if this frame starts a new message
    pub fn is_start(&self) -> bool {
        matches!(self, IsoTpFrame::Single { .. } | IsoTpFrame::First { .. })
    }
}

/// Parse the transport layer of a received frame
pub fn parse(frame: &[u8], variant: TransportVariant) -> Result<IsoTpFrame<'_>, ProtocolError> {
    let body = frame
        .get(variant.pci_offset()..)
        .filter(|b| !b.is_empty())
        .ok_or(ProtocolError::Truncated)?;
    let pci = body[0];

    match pci >> 4 {
        0x0 => {
            let declared = (pci & 0x0F) as usize;
            let available = body.len() - 1;
            if declared == 0 {
                return Err(ProtocolError::UnsupportedPci(pci));
            }
            if declared > available {
                return Err(ProtocolError::LengthMismatch {
                    declared,
                    available,
                });
            }
            Ok(IsoTpFrame::Single {
                data: &body[1..1 + declared],
            })
        }
        0x1 => {
            if body.len() < 2 {
                return Err(ProtocolError::Truncated);
            }
            let total = (((pci & 0x0F) as usize) << 8) | body[1] as usize;
            if total == 0 {
                // 32-bit escape length (CAN FD) is not supported
                return Err(ProtocolError::UnsupportedPci(pci));
            }
            Ok(IsoTpFrame::First {
                total,
                data: &body[2..],
            })
        }
        0x2 => Ok(IsoTpFrame::Consecutive {
            seq: pci & 0x0F,
            data: &body[1..],
        }),
        0x3 => Ok(IsoTpFrame::FlowControl {
            status: pci,
            block_size: body.get(1).copied().unwrap_or(0),
            st_min: body.get(2).copied().unwrap_or(0),
        }),
        _ => Err(ProtocolError::UnsupportedPci(pci)),
    }
}

/// Build a single frame carrying `payload`
pub fn single_frame(
    id: u32,
    payload: &[u8],
    variant: TransportVariant,
    pad: u8,
) -> Result<CanFrame, ProtocolError> {
    let capacity = variant.single_frame_capacity();
    if payload.is_empty() || payload.len() > capacity {
        return Err(ProtocolError::RequestTooLong {
            len: payload.len(),
            capacity,
        });
    }
    let mut transport = [0u8; 8];
    transport[0] = payload.len() as u8;
    transport[1..=payload.len()].copy_from_slice(payload);
    Ok(variant.frame(id, &transport[..=payload.len()], pad)?)
}

/// Build a flow-control "continue to send" frame
pub fn flow_control_frame(
    id: u32,
    variant: TransportVariant,
    block_size: u8,
    st_min: u8,
    pad: u8,
) -> Result<CanFrame, ProtocolError> {
    Ok(variant.frame(id, &[FLOW_CONTINUE, block_size, st_min], pad)?)
}

/// Split `payload` into the frames a sender would transmit
///
/// Payloads that fit a single frame produce one frame; longer payloads
/// produce a first frame followed by consecutive frames.
pub fn segment(
    id: u32,
    payload: &[u8],
    variant: TransportVariant,
    pad: u8,
) -> Result<Vec<CanFrame>, ProtocolError> {
    if payload.len() <= variant.single_frame_capacity() {
        return Ok(vec![single_frame(id, payload, variant, pad)?]);
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::RequestTooLong {
            len: payload.len(),
            capacity: MAX_PAYLOAD,
        });
    }

    let first_len = variant.first_frame_capacity();
    let chunk_len = variant.consecutive_frame_capacity();
    let mut frames = Vec::with_capacity(2 + (payload.len() - first_len) / chunk_len);

    let mut transport = [0u8; 8];
    transport[0] = 0x10 | ((payload.len() >> 8) as u8 & 0x0F);
    transport[1] = (payload.len() & 0xFF) as u8;
    transport[2..2 + first_len].copy_from_slice(&payload[..first_len]);
    frames.push(variant.frame(id, &transport[..2 + first_len], pad)?);

    for (i, chunk) in payload[first_len..].chunks(chunk_len).enumerate() {
        let seq = ((i + 1) & 0x0F) as u8;
        transport[0] = 0x20 | seq;
        transport[1..=chunk.len()].copy_from_slice(chunk);
        frames.push(variant.frame(id, &transport[..=chunk.len()], pad)?);
    }
    Ok(frames)
}
