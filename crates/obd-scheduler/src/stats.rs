//! Poller counters
//!
//! Every event is counted twice: in the [`PollStats`] snapshot the task hands
//! out on request, and as a `metrics` counter for whatever recorder the
//! binary installs.

use crate::error::PollError;
use metrics::counter;
use serde::Serialize;

/// Non-error engine events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollEvent {
    Sent,
    Completed,
    Deferred,
    Single,
    RawFrame,
}

impl PollEvent {
    fn label(&self) -> &'static str {
        match self {
            PollEvent::Sent => "sent",
            PollEvent::Completed => "completed",
            PollEvent::Deferred => "deferred",
            PollEvent::Single => "single",
            PollEvent::RawFrame => "raw_frame",
        }
    }
}

/// Snapshot of poller counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    pub ticks: u64,
    pub requests_sent: u64,
    pub replies_completed: u64,
    pub deferred: u64,
    pub single_requests: u64,
    pub raw_frames: u64,
    pub tx_failures: u64,
    pub timeouts: u64,
    pub unexpected_replies: u64,
    pub malformed_frames: u64,
    pub overflows: u64,
    pub negative_responses: u64,
}

impl PollStats {
    pub(crate) fn tick(&mut self) {
        self.ticks += 1;
    }

    pub(crate) fn record(&mut self, event: PollEvent) {
        let field = match event {
            PollEvent::Sent => &mut self.requests_sent,
            PollEvent::Completed => &mut self.replies_completed,
            PollEvent::Deferred => &mut self.deferred,
            PollEvent::Single => &mut self.single_requests,
            PollEvent::RawFrame => &mut self.raw_frames,
        };
        *field += 1;
        counter!("obd_poller_events_total", "event" => event.label()).increment(1);
    }

    pub(crate) fn record_error(&mut self, err: &PollError) {
        let field = match err {
            PollError::TxFailure { .. } => Some(&mut self.tx_failures),
            PollError::Timeout { .. } => Some(&mut self.timeouts),
            PollError::UnexpectedReply { .. } => Some(&mut self.unexpected_replies),
            PollError::MalformedFrame { .. } => Some(&mut self.malformed_frames),
            PollError::Overflow { .. } => Some(&mut self.overflows),
            PollError::NegativeResponse { .. } => Some(&mut self.negative_responses),
            _ => None,
        };
        if let Some(field) = field {
            *field += 1;
        }
        counter!("obd_poller_errors_total", "class" => err.class()).increment(1);
    }

    /// Total of all error counters
    pub fn errors(&self) -> u64 {
        self.tx_failures
            + self.timeouts
            + self.unexpected_replies
            + self.malformed_frames
            + self.overflows
            + self.negative_responses
    }
}
