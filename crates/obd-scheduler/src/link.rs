//! Transmit side: registered buses and request/flow-control framing

use crate::config::PollerConfig;
use crate::error::PollError;
use crate::job::PollJob;
use can_bus::{BusId, CanBus, CanFrame};
use obd_protocol::isotp;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub(crate) struct Link {
    buses: BTreeMap<BusId, Box<dyn CanBus>>,
    pad: u8,
    block_size: u8,
    st_min: u8,
}

impl Link {
    pub(crate) fn new(config: &PollerConfig) -> Self {
        Self {
            buses: BTreeMap::new(),
            pad: config.pad_byte,
            block_size: config.flow_control_block_size,
            st_min: config.flow_control_st_min,
        }
    }

    pub(crate) fn add(&mut self, bus: Box<dyn CanBus>) {
        let id = bus.id();
        if self.buses.insert(id, bus).is_some() {
            info!(bus = %id, "Replaced bus");
        } else {
            info!(bus = %id, "Registered bus");
        }
    }

    pub(crate) fn contains(&self, id: BusId) -> bool {
        self.buses.contains_key(&id)
    }

    pub(crate) fn block_size(&self) -> u8 {
        self.block_size
    }

    /// Encode and send the single-frame request for `job`
    pub(crate) fn send_request(&mut self, job: &PollJob, extra: &[u8]) -> Result<(), PollError> {
        let payload = job.request_type.encode(job.identifier, extra)?;
        let frame = isotp::single_frame(job.tx_id, &payload, job.variant, self.pad)?;
        self.send(job.bus, &frame)
    }

    /// Send a "continue to send" flow control for the reply of `job`
    pub(crate) fn send_flow_control(&mut self, job: &PollJob) -> Result<(), PollError> {
        let frame = isotp::flow_control_frame(
            job.flow_control_id(),
            job.variant,
            self.block_size,
            self.st_min,
            self.pad,
        )?;
        debug!(bus = %job.bus, id = format!("0x{:03X}", frame.id()), "Sending flow control");
        self.send(job.bus, &frame)
    }

    fn send(&mut self, bus: BusId, frame: &CanFrame) -> Result<(), PollError> {
        let channel = self.buses.get_mut(&bus).ok_or(PollError::UnknownBus(bus))?;
        channel
            .send(frame)
            .map_err(|source| PollError::TxFailure { bus, source })
    }
}
