//! Synchronous single requests
//!
//! A single request runs beside the periodic schedule with its own
//! reassembler. Its completion slot is a one-shot channel; a caller that
//! gives up drops the receiver and the poller frees the slot.

use crate::error::PollError;
use crate::job::PollJob;
use crate::reassembly::Reassembler;
use can_bus::BusId;
use obd_protocol::{RequestType, TransportVariant};
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Completion slot of a single request
pub type SingleReply = oneshot::Sender<Result<Vec<u8>, PollError>>;

/// A one-off request outside the poll schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleRequest {
    pub bus: BusId,
    pub tx_id: u32,
    /// Response ID; `0` with `tx_id == 0x7DF` accepts any OBD-II responder
    pub rx_id: u32,
    pub request_type: RequestType,
    pub identifier: u32,
    pub extra: Vec<u8>,
    pub variant: TransportVariant,
    /// Ticks to wait for the reply; `None` uses the poller's response timeout
    pub timeout_ticks: Option<u64>,
}

impl SingleRequest {
    pub fn new(bus: BusId, tx_id: u32, rx_id: u32, request_type: RequestType, identifier: u32) -> Self {
        Self {
            bus,
            tx_id,
            rx_id,
            request_type,
            identifier,
            extra: Vec::new(),
            variant: TransportVariant::Standard,
            timeout_ticks: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<Vec<u8>>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn with_variant(mut self, variant: TransportVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_timeout_ticks(mut self, ticks: u64) -> Self {
        self.timeout_ticks = Some(ticks.max(1));
        self
    }
}

pub(crate) struct PendingSingle {
    pub request: SingleRequest,
    pub reply: SingleReply,
}

pub(crate) struct ActiveSingle {
    pub job: PollJob,
    pub reply: SingleReply,
    pub timeout_ticks: u64,
}

/// In-flight and queued single requests
pub(crate) struct SingleSlot {
    pub active: Option<ActiveSingle>,
    pub queue: VecDeque<PendingSingle>,
    pub reassembler: Reassembler,
}

impl SingleSlot {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            active: None,
            queue: VecDeque::new(),
            reassembler: Reassembler::new(capacity),
        }
    }

    /// Check if the in-flight single request has waited `timeout_ticks` by `tick`
    pub(crate) fn expired(&self, tick: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| tick.saturating_sub(active.job.issued_tick) >= active.timeout_ticks)
    }

    /// Check if a frame belongs to the in-flight single request
    pub(crate) fn accepts(&self, bus: BusId, id: u32) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.job.accepts(bus, id))
    }

    /// Check if replies on `rx_id` would be confused with the in-flight single request
    pub(crate) fn blocks(&self, bus: BusId, tx_id: u32, rx_id: u32) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.job.collides(bus, tx_id, rx_id))
    }
}
