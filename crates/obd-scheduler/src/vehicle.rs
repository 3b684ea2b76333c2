//! Vehicle module interface
//!
//! A vehicle module owns the meaning of poll states and decodes the replies
//! to the rows of its poll table. The poller calls into it from the task
//! that owns all scheduling state, passing a [`PollControl`] so callbacks can
//! move the vehicle between poll states.

use crate::error::PollError;
use crate::job::PollJob;
use can_bus::{BusId, CanFrame};
use obd_protocol::{PollEntry, RequestType, POLL_STATES};
use tracing::info;

/// Poll state owned by the engine, changed by the vehicle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollControl {
    state: u8,
}

impl PollControl {
    /// Current poll state
    pub fn state(&self) -> u8 {
        self.state
    }

    /// Switch poll state; takes effect on the next tick
    pub fn set_state(&mut self, state: u8) -> Result<(), PollError> {
        if state as usize >= POLL_STATES {
            return Err(PollError::InvalidState(state));
        }
        if state != self.state {
            info!(from = self.state, to = state, "Poll state changed");
            self.state = state;
        }
        Ok(())
    }
}

/// How a vehicle wants replies delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyShape {
    /// Once per reply, with the complete payload
    #[default]
    Assembled,
    /// Once per received frame
    PerFrame,
}

/// Whether a callback recognized the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Handled,
    Unrecognized,
}

/// One frame of a reply, as delivered to [`ReplyShape::PerFrame`] vehicles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyPollFrame<'a> {
    pub bus: BusId,
    pub request_type: RequestType,
    pub identifier: u32,
    /// 0 for the frame carrying the response header
    pub frame_index: u16,
    /// Bytes still to come after this frame
    pub bytes_remaining: usize,
    /// Payload of this frame; frame 0 excludes the response header
    pub data: &'a [u8],
}

/// Per-vehicle behavior plugged into the poller
pub trait VehicleModule: Send {
    /// Short registry code, e.g. `"O2"`
    fn code(&self) -> &'static str;

    /// Sentinel-terminated poll table rows
    fn poll_rows(&self) -> &'static [PollEntry] {
        &[]
    }

    /// Bus the poll table is installed for
    fn poll_bus(&self) -> BusId {
        BusId(1)
    }

    fn reply_shape(&self) -> ReplyShape {
        ReplyShape::Assembled
    }

    /// Complete reply to a scheduled request (data after the response header)
    fn on_poll_reply(&mut self, _ctl: &mut PollControl, _job: &PollJob, _data: &[u8]) -> ReplyOutcome {
        ReplyOutcome::Unrecognized
    }

    /// One frame of a reply to a scheduled request
    fn on_poll_frame(&mut self, _ctl: &mut PollControl, _frame: &LegacyPollFrame<'_>) -> ReplyOutcome {
        ReplyOutcome::Unrecognized
    }

    /// A scheduled request failed
    fn on_poll_error(&mut self, _ctl: &mut PollControl, _job: &PollJob, _error: &PollError) {}

    /// A frame not belonging to any poll job
    fn on_raw_frame(&mut self, _ctl: &mut PollControl, _bus: BusId, _frame: &CanFrame) {}

    /// Runs once per tick before scheduling
    fn on_ticker(&mut self, _ctl: &mut PollControl, _tick: u64) {}
}

/// Placeholder installed until a vehicle is activated
#[derive(Debug, Default)]
pub struct NoVehicle;

impl VehicleModule for NoVehicle {
    fn code(&self) -> &'static str {
        "NONE"
    }
}
