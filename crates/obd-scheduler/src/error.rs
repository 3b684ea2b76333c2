//! Error types for the poller engine

use can_bus::{BusError, BusId};
use obd_protocol::{NegativeResponseCode, ProtocolError, TableError};
use thiserror::Error;

/// Reasons a received frame is rejected by the reassembly path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameFault {
    #[error("continuation frame without a first frame")]
    NoFirstFrame,

    #[error("sequence gap: expected {expected}, got {got}")]
    Sequence { expected: u8, got: u8 },

    #[error("frame carries {got} bytes, {expected} required")]
    Truncated { expected: usize, got: usize },

    #[error("unpadded frame carries {got} bytes, only {remaining} remain")]
    Oversized { remaining: usize, got: usize },

    #[error("first frame declares {total} bytes, which fits a single frame")]
    ShortFirstFrame { total: usize },

    #[error("unexpected flow-control frame")]
    FlowControl,

    #[error(transparent)]
    Transport(#[from] ProtocolError),
}

/// Errors surfaced by the poller and its synchronous facade
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("transmit on {bus} failed: {source}")]
    TxFailure {
        bus: BusId,
        #[source]
        source: BusError,
    },

    #[error("no reply on 0x{rx_id:03X}")]
    Timeout { rx_id: u32 },

    #[error("unexpected reply on 0x{rx_id:03X}")]
    UnexpectedReply { rx_id: u32 },

    #[error("malformed frame on 0x{rx_id:03X}: {fault}")]
    MalformedFrame { rx_id: u32, fault: FrameFault },

    #[error("reply on 0x{rx_id:03X} declares {declared} bytes, buffer holds {capacity}")]
    Overflow {
        rx_id: u32,
        declared: usize,
        capacity: usize,
    },

    #[error("negative response to service 0x{service:02X}: {code}")]
    NegativeResponse {
        service: u8,
        code: NegativeResponseCode,
    },

    #[error("poll state {0} out of range")]
    InvalidState(u8),

    #[error("no bus registered as {0}")]
    UnknownBus(BusId),

    #[error("request encoding failed: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("poller has shut down")]
    Shutdown,
}

/// Vehicle registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("vehicle code {0:?} already registered")]
    Duplicate(String),

    #[error("no vehicle registered for code {0:?}")]
    UnknownVehicle(String),

    #[error("vehicle {code} has an invalid poll table: {source}")]
    InvalidTable {
        code: String,
        #[source]
        source: TableError,
    },
}

impl PollError {
    /// Metric label for the error class
    pub fn class(&self) -> &'static str {
        match self {
            PollError::TxFailure { .. } => "tx_failure",
            PollError::Timeout { .. } => "timeout",
            PollError::UnexpectedReply { .. } => "unexpected_reply",
            PollError::MalformedFrame { .. } => "malformed_frame",
            PollError::Overflow { .. } => "overflow",
            PollError::NegativeResponse { .. } => "negative_response",
            PollError::InvalidState(_) => "invalid_state",
            PollError::UnknownBus(_) => "unknown_bus",
            PollError::Protocol(_) => "protocol",
            PollError::Registry(_) => "registry",
            PollError::Shutdown => "shutdown",
        }
    }
}
