//! Reply Dispatcher
//!
//! Hands validated replies of scheduled jobs to the vehicle module in the
//! shape it asked for. A reply the vehicle does not recognize is counted as
//! unexpected and dropped.

use crate::error::PollError;
use crate::job::PollJob;
use crate::stats::PollStats;
use crate::vehicle::{LegacyPollFrame, PollControl, ReplyOutcome, VehicleModule};
use tracing::{debug, warn};

/// Deliver a complete reply (data after the response header)
pub(crate) fn reply(
    vehicle: &mut dyn VehicleModule,
    ctl: &mut PollControl,
    job: &PollJob,
    data: &[u8],
    stats: &mut PollStats,
) {
    debug!(
        bus = %job.bus,
        rx_id = format!("0x{:03X}", job.rx_id),
        identifier = format!("0x{:X}", job.identifier),
        len = data.len(),
        "Poll reply"
    );
    let outcome = vehicle.on_poll_reply(ctl, job, data);
    unrecognized(outcome, job, stats);
}

/// Deliver one frame of a reply
pub(crate) fn frame(
    vehicle: &mut dyn VehicleModule,
    ctl: &mut PollControl,
    job: &PollJob,
    frame_index: u16,
    data: &[u8],
    stats: &mut PollStats,
) {
    let frame = LegacyPollFrame {
        bus: job.bus,
        request_type: job.request_type,
        identifier: job.identifier,
        frame_index,
        bytes_remaining: job.bytes_remaining,
        data,
    };
    let outcome = vehicle.on_poll_frame(ctl, &frame);
    unrecognized(outcome, job, stats);
}

/// Report a failed scheduled job
pub(crate) fn error(
    vehicle: &mut dyn VehicleModule,
    ctl: &mut PollControl,
    job: &PollJob,
    err: &PollError,
    stats: &mut PollStats,
) {
    warn!(
        bus = %job.bus,
        tx_id = format!("0x{:03X}", job.tx_id),
        identifier = format!("0x{:X}", job.identifier),
        error = %err,
        "Poll failed"
    );
    stats.record_error(err);
    vehicle.on_poll_error(ctl, job, err);
}

fn unrecognized(outcome: ReplyOutcome, job: &PollJob, stats: &mut PollStats) {
    if outcome == ReplyOutcome::Unrecognized {
        let err = PollError::UnexpectedReply { rx_id: job.rx_id };
        debug!(
            identifier = format!("0x{:X}", job.identifier),
            %err,
            "Vehicle did not recognize reply"
        );
        stats.record_error(&err);
    }
}
