//! Negative Response Codes

use std::fmt;

/// UDS/KWP negative response code carried in `7F <service> <nrc>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLength,
    ResponseTooLong,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    ResponsePending,
    SubFunctionNotSupportedInSession,
    ServiceNotSupportedInSession,
    Other(u8),
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLength,
            0x14 => Self::ResponseTooLong,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x78 => Self::ResponsePending,
            0x7E => Self::SubFunctionNotSupportedInSession,
            0x7F => Self::ServiceNotSupportedInSession,
            other => Self::Other(other),
        }
    }
}

impl NegativeResponseCode {
    /// Check if the ECU asks the tester to keep waiting
    pub fn is_response_pending(&self) -> bool {
        matches!(self, Self::ResponsePending)
    }

    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::GeneralReject => "general reject",
            Self::ServiceNotSupported => "service not supported",
            Self::SubFunctionNotSupported => "sub-function not supported",
            Self::IncorrectMessageLength => "incorrect message length or format",
            Self::ResponseTooLong => "response too long",
            Self::BusyRepeatRequest => "busy, repeat request",
            Self::ConditionsNotCorrect => "conditions not correct",
            Self::RequestSequenceError => "request sequence error",
            Self::RequestOutOfRange => "request out of range",
            Self::SecurityAccessDenied => "security access denied",
            Self::ResponsePending => "response pending",
            Self::SubFunctionNotSupportedInSession => "sub-function not supported in active session",
            Self::ServiceNotSupportedInSession => "service not supported in active session",
            Self::Other(_) => "vendor specific",
        }
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "0x{:02X} ({})", code, self.description()),
            _ => f.write_str(self.description()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(NegativeResponseCode::from(0x31), NegativeResponseCode::RequestOutOfRange);
        assert!(NegativeResponseCode::from(0x78).is_response_pending());
        assert_eq!(NegativeResponseCode::from(0x99), NegativeResponseCode::Other(0x99));
    }

    #[test]
    fn test_display() {
        assert_eq!(NegativeResponseCode::from(0x11).to_string(), "service not supported");
        assert_eq!(NegativeResponseCode::Other(0x99).to_string(), "0x99 (vendor specific)");
    }
}
