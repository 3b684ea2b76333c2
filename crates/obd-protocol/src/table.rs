//! Poll Schedule Tables
//!
//! A vehicle declares what to poll as a static, sentinel-terminated slice of
//! [`PollEntry`] rows. [`PollTable::new`] validates the rows once at
//! registration; afterwards the table is immutable.

use crate::error::ProtocolError;
use crate::protocol::TransportVariant;
use crate::request::RequestType;
use crate::{OBD_BROADCAST_ID, OBD_RESPONSE_IDS};
use can_bus::{BusId, MAX_EXTENDED_ID, MAX_STANDARD_ID};
use thiserror::Error;

/// Number of poll states (columns of the period array)
pub const POLL_STATES: usize = 4;

/// Ticks between polls, per poll state; `0` disables polling in that state
pub type Periods = [u16; POLL_STATES];

/// Table validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("entry {index}: all poll periods are zero")]
    NoActivePeriod { index: usize },

    #[error("entry {index}: CAN identifier 0x{id:X} invalid for {variant:?}")]
    InvalidCanId {
        index: usize,
        id: u32,
        variant: TransportVariant,
    },

    #[error("entry {index}: response identifier 0 is only valid for functional broadcast")]
    MissingResponseId { index: usize },

    #[error("entry {index}: {source}")]
    Request {
        index: usize,
        #[source]
        source: ProtocolError,
    },
}

/// One row of a poll schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEntry {
    /// Bus to send on; `None` uses the bus the table is installed for
    pub request_bus: Option<BusId>,
    /// Request arbitration ID; `0` marks the sentinel row
    pub tx_id: u32,
    /// Expected response ID; `0` with `tx_id == 0x7DF` accepts any OBD-II responder
    pub rx_id: u32,
    /// Request service encoding
    pub request_type: RequestType,
    /// Parameter identifier
    pub identifier: u32,
    /// Ticks between polls per poll state
    pub periods: Periods,
    /// Extra request bytes appended after the identifier
    pub extra: &'static [u8],
    /// Segmented transport framing
    pub variant: TransportVariant,
}

impl PollEntry {
    /// Sentinel row terminating a table
    pub const END: PollEntry = PollEntry::new(0, 0, RequestType::ObdCurrent, 0, [0; POLL_STATES]);

    /// Create a row using standard framing on the table's bus
    pub const fn new(
        tx_id: u32,
        rx_id: u32,
        request_type: RequestType,
        identifier: u32,
        periods: Periods,
    ) -> Self {
        Self {
            request_bus: None,
            tx_id,
            rx_id,
            request_type,
            identifier,
            periods,
            extra: &[],
            variant: TransportVariant::Standard,
        }
    }

    /// Send this row on an explicit bus
    pub const fn on_bus(self, bus: BusId) -> Self {
        Self {
            request_bus: Some(bus),
            ..self
        }
    }

    /// Append extra request bytes
    pub const fn with_extra(self, extra: &'static [u8]) -> Self {
        Self { extra, ..self }
    }

    /// Use another transport variant
    pub const fn with_variant(self, variant: TransportVariant) -> Self {
        Self { variant, ..self }
    }

    /// Check if this is the sentinel row
    pub const fn is_sentinel(&self) -> bool {
        self.tx_id == 0
    }

    /// Period for a poll state (0 for states out of range)
    pub fn period(&self, state: usize) -> u16 {
        self.periods.get(state).copied().unwrap_or(0)
    }

    /// Check if the row is a functional broadcast accepting any OBD-II responder
    pub const fn is_broadcast(&self) -> bool {
        self.tx_id == OBD_BROADCAST_ID && self.rx_id == 0
    }

    /// Check if `id` is a valid response identifier for this row
    pub fn accepts(&self, id: u32) -> bool {
        if self.is_broadcast() {
            OBD_RESPONSE_IDS.contains(&id)
        } else {
            id == self.rx_id
        }
    }

    /// Encode the request payload (service, identifier, extra)
    pub fn encode_request(&self) -> Result<Vec<u8>, ProtocolError> {
        self.request_type.encode(self.identifier, self.extra)
    }

    fn validate(&self, index: usize) -> Result<(), TableError> {
        if self.periods.iter().all(|&p| p == 0) {
            return Err(TableError::NoActivePeriod { index });
        }

        let limit = if self.variant.uses_extended_ids() {
            MAX_EXTENDED_ID
        } else {
            MAX_STANDARD_ID
        };
        for id in [self.tx_id, self.rx_id] {
            if id > limit {
                return Err(TableError::InvalidCanId {
                    index,
                    id,
                    variant: self.variant,
                });
            }
        }
        if self.rx_id == 0 && !self.is_broadcast() {
            return Err(TableError::MissingResponseId { index });
        }

        let payload = self
            .encode_request()
            .map_err(|source| TableError::Request { index, source })?;
        let capacity = self.variant.single_frame_capacity();
        if payload.len() > capacity {
            return Err(TableError::Request {
                index,
                source: ProtocolError::RequestTooLong {
                    len: payload.len(),
                    capacity,
                },
            });
        }
        Ok(())
    }
}

/// Validated, immutable poll schedule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PollTable {
    entries: Vec<PollEntry>,
}

impl PollTable {
    /// Validate `rows` up to the first sentinel
    pub fn new(rows: &[PollEntry]) -> Result<Self, TableError> {
        let entries: Vec<PollEntry> = rows
            .iter()
            .take_while(|row| !row.is_sentinel())
            .copied()
            .collect();

        for (index, entry) in entries.iter().enumerate() {
            entry.validate(index)?;
        }
        Ok(Self { entries })
    }

    /// Rows in table order
    pub fn entries(&self) -> &[PollEntry] {
        &self.entries
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if table has no rows
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over rows
    pub fn iter(&self) -> std::slice::Iter<'_, PollEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[PollEntry] = &[
        PollEntry::new(0x7E0, 0x7E8, RequestType::ObdCurrent, 0x0C, [0, 5, 10, 0]),
        PollEntry::new(0x6B4, 0x694, RequestType::ReadData, 0xD815, [0, 5, 1, 999]),
        PollEntry::END,
        PollEntry::new(0x7E0, 0x7E8, RequestType::ObdCurrent, 0x0D, [1, 1, 1, 1]),
    ];

    #[test]
    fn test_table_stops_at_sentinel() {
        let table = PollTable::new(TABLE).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[1].identifier, 0xD815);
    }

    #[test]
    fn test_rejects_entry_without_periods() {
        let rows = [PollEntry::new(0x7E0, 0x7E8, RequestType::ObdCurrent, 0x05, [0; 4])];
        assert_eq!(
            PollTable::new(&rows),
            Err(TableError::NoActivePeriod { index: 0 })
        );
    }

    #[test]
    fn test_rejects_identifier_too_wide() {
        let rows = [PollEntry::new(0x7E0, 0x7E8, RequestType::ObdCurrent, 0x1234, [1, 0, 0, 0])];
        assert!(matches!(
            PollTable::new(&rows),
            Err(TableError::Request {
                index: 0,
                source: ProtocolError::IdentifierTooWide { .. }
            })
        ));
    }

    #[test]
    fn test_rejects_request_longer_than_single_frame() {
        let rows = [PollEntry::new(0x7E0, 0x7E8, RequestType::IoControl, 0x0102, [1, 0, 0, 0])
            .with_extra(&[1, 2, 3, 4, 5])];
        assert!(matches!(
            PollTable::new(&rows),
            Err(TableError::Request {
                source: ProtocolError::RequestTooLong { len: 8, capacity: 7 },
                ..
            })
        ));
    }

    #[test]
    fn test_can_id_width_follows_variant() {
        let rows = [PollEntry::new(0x18DA_10F1, 0x18DA_F110, RequestType::ReadData, 0xF190, [1, 1, 1, 1])];
        assert!(matches!(
            PollTable::new(&rows),
            Err(TableError::InvalidCanId { id: 0x18DA_10F1, .. })
        ));

        let rows = [rows[0].with_variant(TransportVariant::ExtendedFrame)];
        assert!(PollTable::new(&rows).is_ok());
    }

    #[test]
    fn test_broadcast_rows() {
        let row = PollEntry::new(OBD_BROADCAST_ID, 0, RequestType::ObdCurrent, 0x0D, [0, 2, 0, 0]);
        assert!(row.is_broadcast());
        assert!(row.accepts(0x7E8));
        assert!(row.accepts(0x7EF));
        assert!(!row.accepts(0x7F0));
        assert!(PollTable::new(&[row]).is_ok());

        let row = PollEntry::new(0x7E0, 0, RequestType::ObdCurrent, 0x0D, [0, 2, 0, 0]);
        assert_eq!(
            PollTable::new(&[row]),
            Err(TableError::MissingResponseId { index: 0 })
        );
    }

    #[test]
    fn test_period_lookup() {
        let row = TABLE[1];
        assert_eq!(row.period(1), 5);
        assert_eq!(row.period(3), 999);
        assert_eq!(row.period(7), 0);
        assert_eq!(row.on_bus(BusId(2)).request_bus, Some(BusId(2)));
    }
}
