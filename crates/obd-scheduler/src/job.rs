//! In-flight request descriptor

use crate::single::SingleRequest;
use can_bus::BusId;
use obd_protocol::{PollEntry, RequestType, TransportVariant, OBD_BROADCAST_ID, OBD_REQUEST_OFFSET, OBD_RESPONSE_IDS};

/// Where a job came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    /// Row index in the active poll table
    Scheduled { entry: usize },
    /// Synchronous request
    Single,
}

/// One request/response exchange in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollJob {
    pub bus: BusId,
    pub tx_id: u32,
    /// Response ID; for a functional broadcast this is `0` until the first reply locks it
    pub rx_id: u32,
    pub request_type: RequestType,
    pub identifier: u32,
    /// Index of the next expected frame of the reply
    pub frame_index: u16,
    /// Bytes still expected after the frames received so far
    pub bytes_remaining: usize,
    pub variant: TransportVariant,
    pub origin: JobOrigin,
    pub(crate) issued_tick: u64,
    pub(crate) header_len: usize,
    broadcast: bool,
}

impl PollJob {
    pub(crate) fn scheduled(index: usize, entry: &PollEntry, bus: BusId, tick: u64) -> Self {
        Self::build(
            bus,
            entry.tx_id,
            entry.rx_id,
            entry.request_type,
            entry.identifier,
            entry.variant,
            JobOrigin::Scheduled { entry: index },
            tick,
        )
    }

    pub(crate) fn single(request: &SingleRequest, tick: u64) -> Self {
        Self::build(
            request.bus,
            request.tx_id,
            request.rx_id,
            request.request_type,
            request.identifier,
            request.variant,
            JobOrigin::Single,
            tick,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        bus: BusId,
        tx_id: u32,
        rx_id: u32,
        request_type: RequestType,
        identifier: u32,
        variant: TransportVariant,
        origin: JobOrigin,
        tick: u64,
    ) -> Self {
        Self {
            bus,
            tx_id,
            rx_id,
            request_type,
            identifier,
            frame_index: 0,
            bytes_remaining: 0,
            variant,
            origin,
            issued_tick: tick,
            header_len: request_type.header_len(),
            broadcast: is_broadcast(tx_id, rx_id),
        }
    }

    /// Check if this job was sent to the functional broadcast address
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Check if a frame with `id` on `bus` belongs to this job
    ///
    /// A broadcast job accepts any OBD-II responder until the first frame
    /// of a reply locks it to one.
    pub fn accepts(&self, bus: BusId, id: u32) -> bool {
        if bus != self.bus {
            return false;
        }
        if self.broadcast && self.frame_index == 0 {
            return OBD_RESPONSE_IDS.contains(&id);
        }
        id == self.rx_id
    }

    /// Check if replies to this job could be confused with replies on `rx_id`
    pub(crate) fn collides(&self, bus: BusId, tx_id: u32, rx_id: u32) -> bool {
        if bus != self.bus {
            return false;
        }
        let other_broadcast = is_broadcast(tx_id, rx_id);
        match (self.broadcast, other_broadcast) {
            (true, true) => true,
            (true, false) => OBD_RESPONSE_IDS.contains(&rx_id),
            (false, true) => OBD_RESPONSE_IDS.contains(&self.rx_id),
            (false, false) => self.rx_id == rx_id,
        }
    }

    /// Destination of flow-control frames for this job
    pub(crate) fn flow_control_id(&self) -> u32 {
        if self.tx_id == OBD_BROADCAST_ID {
            self.rx_id.wrapping_sub(OBD_REQUEST_OFFSET)
        } else {
            self.tx_id
        }
    }

    /// Poll table row index for scheduled jobs
    pub fn entry_index(&self) -> Option<usize> {
        match self.origin {
            JobOrigin::Scheduled { entry } => Some(entry),
            JobOrigin::Single => None,
        }
    }

    /// Tick at which the request was sent (or last acknowledged as pending)
    pub fn issued_tick(&self) -> u64 {
        self.issued_tick
    }
}

fn is_broadcast(tx_id: u32, rx_id: u32) -> bool {
    tx_id == OBD_BROADCAST_ID && rx_id == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tx_id: u32, rx_id: u32) -> PollEntry {
        PollEntry::new(tx_id, rx_id, RequestType::ObdCurrent, 0x0C, [1, 1, 1, 1])
    }

    #[test]
    fn test_physical_job_accepts_own_id_only() {
        let job = PollJob::scheduled(0, &entry(0x7E0, 0x7E8), BusId(1), 3);
        assert!(job.accepts(BusId(1), 0x7E8));
        assert!(!job.accepts(BusId(1), 0x7E9));
        assert!(!job.accepts(BusId(2), 0x7E8));
        assert_eq!(job.flow_control_id(), 0x7E0);
        assert_eq!(job.entry_index(), Some(0));
        assert_eq!(job.header_len, 2);
    }

    #[test]
    fn test_broadcast_job_locks_to_responder() {
        let mut job = PollJob::scheduled(0, &entry(OBD_BROADCAST_ID, 0), BusId(1), 0);
        assert!(job.is_broadcast());
        assert!(job.accepts(BusId(1), 0x7E9));
        assert!(!job.accepts(BusId(1), 0x7F0));

        job.rx_id = 0x7E9;
        job.frame_index = 1;
        assert!(job.accepts(BusId(1), 0x7E9));
        assert!(!job.accepts(BusId(1), 0x7E8));
        assert_eq!(job.flow_control_id(), 0x7E1);
    }

    #[test]
    fn test_collision() {
        let job = PollJob::scheduled(0, &entry(0x7E0, 0x7E8), BusId(1), 0);
        assert!(job.collides(BusId(1), 0x7E0, 0x7E8));
        assert!(job.collides(BusId(1), OBD_BROADCAST_ID, 0));
        assert!(!job.collides(BusId(1), 0x6B4, 0x694));
        assert!(!job.collides(BusId(2), 0x7E0, 0x7E8));

        let broadcast = PollJob::scheduled(0, &entry(OBD_BROADCAST_ID, 0), BusId(1), 0);
        assert!(broadcast.collides(BusId(1), 0x7E1, 0x7E9));
        assert!(!broadcast.collides(BusId(1), 0x6B4, 0x694));
    }
}
