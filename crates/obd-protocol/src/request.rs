//! Diagnostic Request Encoding
//!
//! Maps each request type to its service byte and identifier width, builds
//! request payloads, and classifies the first bytes of a response.

use crate::error::ProtocolError;
use crate::service;
use serde::{Deserialize, Serialize};

/// Width of the identifier field following the service byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdWidth {
    Bits8,
    Bits16,
    Bits24,
    Bits32,
}

impl IdWidth {
    /// Number of bytes on the wire
    pub const fn bytes(&self) -> usize {
        match self {
            IdWidth::Bits8 => 1,
            IdWidth::Bits16 => 2,
            IdWidth::Bits24 => 3,
            IdWidth::Bits32 => 4,
        }
    }

    /// Number of bits
    pub const fn bits(&self) -> u8 {
        (self.bytes() * 8) as u8
    }

    /// Check if `identifier` fits this width
    pub const fn fits(&self, identifier: u32) -> bool {
        match self {
            IdWidth::Bits32 => true,
            _ => identifier >> self.bits() == 0,
        }
    }
}

/// Request service encodings supported by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// OBD-II mode 01, current powertrain data
    ObdCurrent,
    /// OBD-II mode 02, freeze frame data
    ObdFreeze,
    /// OBD-II mode 09, vehicle information
    ObdVehicleInfo,
    /// Diagnostic session control; identifier is the session type
    DiagnosticSession,
    /// KWP2000 read data by local identifier
    ReadLocalId,
    /// UDS read data by identifier, also OBD-II extended PIDs
    ReadData,
    /// UDS read scaling data by identifier
    ReadScaling,
    /// UDS input/output control by identifier; control bytes go in `extra`
    IoControl,
    /// UDS routine control; identifier is `sub_function << 16 | routine`
    RoutineControl,
    /// Tester present; identifier is the sub-function
    TesterPresent,
    /// Vendor service with explicit identifier width
    Vendor { service: u8, width: IdWidth },
}

/// How the first bytes of a reply relate to the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Positive response; payload starts after `header_len` bytes
    Positive { header_len: usize },
    /// Negative response `7F <service> <nrc>`
    Negative { nrc: u8 },
    /// Reply to a different service or identifier
    Mismatch,
}

impl RequestType {
    /// Request service byte
    pub const fn service(&self) -> u8 {
        match self {
            RequestType::ObdCurrent => service::OBD_CURRENT_DATA,
            RequestType::ObdFreeze => service::OBD_FREEZE_FRAME,
            RequestType::ObdVehicleInfo => service::OBD_VEHICLE_INFO,
            RequestType::DiagnosticSession => service::DIAGNOSTIC_SESSION,
            RequestType::ReadLocalId => service::READ_DATA_BY_LOCAL_ID,
            RequestType::ReadData => service::READ_DATA_BY_ID,
            RequestType::ReadScaling => service::READ_SCALING_BY_ID,
            RequestType::IoControl => service::IO_CONTROL_BY_ID,
            RequestType::RoutineControl => service::ROUTINE_CONTROL,
            RequestType::TesterPresent => service::TESTER_PRESENT,
            RequestType::Vendor { service, .. } => *service,
        }
    }

    /// Identifier width encoded after the service byte
    pub const fn id_width(&self) -> IdWidth {
        match self {
            RequestType::ObdCurrent
            | RequestType::ObdFreeze
            | RequestType::ObdVehicleInfo
            | RequestType::DiagnosticSession
            | RequestType::ReadLocalId
            | RequestType::TesterPresent => IdWidth::Bits8,
            RequestType::ReadData | RequestType::ReadScaling | RequestType::IoControl => {
                IdWidth::Bits16
            }
            RequestType::RoutineControl => IdWidth::Bits24,
            RequestType::Vendor { width, .. } => *width,
        }
    }

    /// Positive response service byte
    pub const fn positive_response(&self) -> u8 {
        self.service().wrapping_add(service::POSITIVE_RESPONSE_OFFSET)
    }

    /// Length of the positive response header (service + identifier echo)
    pub const fn header_len(&self) -> usize {
        1 + self.id_width().bytes()
    }

    /// Build the request payload: service, identifier (big-endian), extra bytes
    pub fn encode(&self, identifier: u32, extra: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let width = self.id_width();
        if !width.fits(identifier) {
            return Err(ProtocolError::IdentifierTooWide {
                identifier,
                bits: width.bits(),
            });
        }
        let mut payload = Vec::with_capacity(self.header_len() + extra.len());
        payload.push(self.service());
        payload.extend_from_slice(&identifier.to_be_bytes()[4 - width.bytes()..]);
        payload.extend_from_slice(extra);
        Ok(payload)
    }

    /// Classify the start of a reply to `identifier`
    pub fn classify_response(&self, identifier: u32, reply: &[u8]) -> ResponseKind {
        if reply.len() >= 3
            && reply[0] == service::NEGATIVE_RESPONSE
            && reply[1] == self.service()
        {
            return ResponseKind::Negative { nrc: reply[2] };
        }

        let width = self.id_width();
        let header_len = self.header_len();
        if reply.len() < header_len || reply[0] != self.positive_response() {
            return ResponseKind::Mismatch;
        }
        let echo = &identifier.to_be_bytes()[4 - width.bytes()..];
        if &reply[1..header_len] != echo {
            return ResponseKind::Mismatch;
        }
        ResponseKind::Positive { header_len }
    }
}
