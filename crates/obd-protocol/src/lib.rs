//! OBD-II / UDS Protocol Layer
//!
//! Request service encodings, ISO-TP framing, negative response codes and the
//! declarative poll schedule tables consumed by the poller.

pub mod isotp;
mod error;
mod nrc;
mod pid;
mod protocol;
mod request;
mod table;

pub use error::ProtocolError;
pub use nrc::NegativeResponseCode;
pub use pid::Pid;
pub use protocol::TransportVariant;
pub use request::{IdWidth, RequestType, ResponseKind};
pub use table::{Periods, PollEntry, PollTable, TableError, POLL_STATES};

use std::ops::RangeInclusive;

/// Functional (broadcast) OBD-II request identifier
pub const OBD_BROADCAST_ID: u32 = 0x7DF;

/// Physical response identifiers of OBD-II ECUs
pub const OBD_RESPONSE_IDS: RangeInclusive<u32> = 0x7E8..=0x7EF;

/// Offset from a responder's ID to its physical request ID
pub const OBD_REQUEST_OFFSET: u32 = 8;

/// Diagnostic service bytes
pub mod service {
    /// OBD-II current data
    pub const OBD_CURRENT_DATA: u8 = 0x01;
    /// OBD-II freeze frame data
    pub const OBD_FREEZE_FRAME: u8 = 0x02;
    /// OBD-II vehicle information
    pub const OBD_VEHICLE_INFO: u8 = 0x09;
    /// Diagnostic session control
    pub const DIAGNOSTIC_SESSION: u8 = 0x10;
    /// KWP2000 read data by local identifier
    pub const READ_DATA_BY_LOCAL_ID: u8 = 0x21;
    /// UDS read data by identifier
    pub const READ_DATA_BY_ID: u8 = 0x22;
    /// UDS read scaling data by identifier
    pub const READ_SCALING_BY_ID: u8 = 0x24;
    /// UDS input/output control by identifier
    pub const IO_CONTROL_BY_ID: u8 = 0x2F;
    /// UDS routine control
    pub const ROUTINE_CONTROL: u8 = 0x31;
    /// Tester present
    pub const TESTER_PRESENT: u8 = 0x3E;
    /// Negative response service byte
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
    /// Added to a request service to form its positive response
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
}

/// OBD-II mode 09 info types
pub mod vehicle_info {
    /// Vehicle identification number
    pub const VIN: u8 = 0x02;
    /// Calibration ID
    pub const CALIBRATION_ID: u8 = 0x04;
    /// ECU name
    pub const ECU_NAME: u8 = 0x0A;
}
