//! Reply reassembly
//!
//! [`Reassembler`] rebuilds a segmented reply into its [`RxBuffer`] and keeps
//! the job's `frame_index` / `bytes_remaining` in step. [`receive`] layers the
//! response header check and flow control on top; it is shared by the
//! periodic and the synchronous path, each with its own reassembler.

use crate::error::{FrameFault, PollError};
use crate::job::PollJob;
use crate::link::Link;
use crate::stats::PollStats;
use can_bus::CanFrame;
use obd_protocol::isotp::{self, IsoTpFrame};
use obd_protocol::{NegativeResponseCode, ResponseKind};
use rx_buffer::RxBuffer;
use std::ops::Range;
use tracing::{debug, warn};

/// Result of accepting one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Step {
    /// Index of the frame just accepted
    pub frame_index: u16,
    /// Buffer range written by this frame
    pub chunk: Range<usize>,
    pub start: bool,
    pub complete: bool,
    /// A flow-control frame is owed to the sender
    pub flow_control: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Drop the frame, keep the job
    Ignored(FrameFault),
    /// Drop the frame and the job
    Malformed(FrameFault),
    Overflow { declared: usize, capacity: usize },
}

pub(crate) struct Reassembler {
    buffer: RxBuffer,
    next_seq: u8,
    since_flow_control: u8,
}

impl Reassembler {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: RxBuffer::new(capacity),
            next_seq: 1,
            since_flow_control: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn buffer(&self) -> &RxBuffer {
        &self.buffer
    }

    pub(crate) fn chunk(&self, step: &Step) -> &[u8] {
        &self.buffer.as_slice()[step.chunk.clone()]
    }

    /// Bytes after the response header
    pub(crate) fn payload(&self, header_len: usize) -> &[u8] {
        self.buffer.as_slice().get(header_len..).unwrap_or(&[])
    }

    /// Forget any partial reply and wait for a new first frame
    pub(crate) fn restart(&mut self, job: &mut PollJob) {
        self.buffer.clear();
        self.next_seq = 1;
        self.since_flow_control = 0;
        job.frame_index = 0;
        job.bytes_remaining = 0;
    }

    pub(crate) fn accept(
        &mut self,
        job: &mut PollJob,
        frame: &CanFrame,
        block_size: u8,
    ) -> Result<Step, Fault> {
        let parsed = isotp::parse(frame.data(), job.variant)
            .map_err(|err| Fault::Malformed(FrameFault::Transport(err)))?;
        let padded = frame.len() == CanFrame::MAX_LEN;

        match parsed {
            IsoTpFrame::Single { data } => {
                self.restart(job);
                self.append(data)?;
                job.frame_index = 1;
                Ok(Step {
                    frame_index: 0,
                    chunk: 0..data.len(),
                    start: true,
                    complete: true,
                    flow_control: false,
                })
            }
            IsoTpFrame::First { total, data } => {
                let capacity = self.buffer.capacity();
                if total > capacity {
                    return Err(Fault::Overflow {
                        declared: total,
                        capacity,
                    });
                }
                let first_len = job.variant.first_frame_capacity();
                if total <= first_len {
                    return Err(Fault::Malformed(FrameFault::ShortFirstFrame { total }));
                }
                if data.len() < first_len {
                    return Err(Fault::Malformed(FrameFault::Truncated {
                        expected: first_len,
                        got: data.len(),
                    }));
                }
                self.restart(job);
                self.append(&data[..first_len])?;
                job.frame_index = 1;
                job.bytes_remaining = total - first_len;
                Ok(Step {
                    frame_index: 0,
                    chunk: 0..first_len,
                    start: true,
                    complete: false,
                    flow_control: true,
                })
            }
            IsoTpFrame::Consecutive { seq, data } => {
                if job.frame_index == 0 {
                    return Err(Fault::Ignored(FrameFault::NoFirstFrame));
                }
                if seq != self.next_seq {
                    return Err(Fault::Malformed(FrameFault::Sequence {
                        expected: self.next_seq,
                        got: seq,
                    }));
                }
                let expected = job
                    .bytes_remaining
                    .min(job.variant.consecutive_frame_capacity());
                if data.len() < expected {
                    return Err(Fault::Malformed(FrameFault::Truncated {
                        expected,
                        got: data.len(),
                    }));
                }
                if data.len() > expected && !padded {
                    return Err(Fault::Malformed(FrameFault::Oversized {
                        remaining: job.bytes_remaining,
                        got: data.len(),
                    }));
                }

                let start = self.buffer.len();
                self.append(&data[..expected])?;
                let index = job.frame_index;
                job.frame_index = index.saturating_add(1);
                job.bytes_remaining -= expected;
                self.next_seq = (self.next_seq + 1) & 0x0F;

                let mut flow_control = false;
                if block_size != 0 && job.bytes_remaining > 0 {
                    self.since_flow_control += 1;
                    if self.since_flow_control == block_size {
                        self.since_flow_control = 0;
                        flow_control = true;
                    }
                }
                Ok(Step {
                    frame_index: index,
                    chunk: start..self.buffer.len(),
                    start: false,
                    complete: job.bytes_remaining == 0,
                    flow_control,
                })
            }
            IsoTpFrame::FlowControl { .. } => Err(Fault::Ignored(FrameFault::FlowControl)),
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        let declared = self.buffer.len() + bytes.len();
        self.buffer
            .extend_from_slice(bytes)
            .map_err(|_| Fault::Overflow {
                declared,
                capacity: self.buffer.capacity(),
            })
    }
}

/// Outcome of a frame on a job's response ID
#[derive(Debug)]
pub(crate) enum Advance {
    /// Frame accepted, more to come
    Progress(Step),
    /// Reply complete
    Complete(Step),
    /// Frame dropped, job keeps waiting
    Hold,
    /// Job failed
    Failed(PollError),
}

/// Feed a frame to `job`: reassemble, validate the response header and
/// send owed flow control
pub(crate) fn receive(
    reassembler: &mut Reassembler,
    job: &mut PollJob,
    frame: &CanFrame,
    link: &mut Link,
    stats: &mut PollStats,
    tick: u64,
) -> Advance {
    let rx_id = frame.id();
    if job.is_broadcast() && job.frame_index == 0 {
        job.rx_id = rx_id;
    }

    let step = match reassembler.accept(job, frame, link.block_size()) {
        Ok(step) => step,
        Err(Fault::Ignored(fault)) => {
            let err = PollError::MalformedFrame { rx_id, fault };
            warn!(bus = %job.bus, %err, "Dropping frame");
            stats.record_error(&err);
            return Advance::Hold;
        }
        Err(Fault::Malformed(fault)) => {
            return Advance::Failed(PollError::MalformedFrame { rx_id, fault });
        }
        Err(Fault::Overflow { declared, capacity }) => {
            return Advance::Failed(PollError::Overflow {
                rx_id,
                declared,
                capacity,
            });
        }
    };

    if step.start {
        match job
            .request_type
            .classify_response(job.identifier, reassembler.chunk(&step))
        {
            ResponseKind::Positive { header_len } => job.header_len = header_len,
            ResponseKind::Negative { nrc } => {
                let code = NegativeResponseCode::from(nrc);
                if code.is_response_pending() {
                    debug!(rx_id = format!("0x{:03X}", rx_id), "Response pending, waiting");
                    job.issued_tick = tick;
                    reassembler.restart(job);
                    return Advance::Hold;
                }
                return Advance::Failed(PollError::NegativeResponse {
                    service: job.request_type.service(),
                    code,
                });
            }
            ResponseKind::Mismatch => {
                let err = PollError::UnexpectedReply { rx_id };
                debug!(
                    identifier = format!("0x{:X}", job.identifier),
                    %err,
                    "Reply header does not match request"
                );
                stats.record_error(&err);
                reassembler.restart(job);
                return Advance::Hold;
            }
        }
    }

    if step.flow_control {
        if let Err(err) = link.send_flow_control(job) {
            return Advance::Failed(err);
        }
    }

    if step.complete {
        Advance::Complete(step)
    } else {
        Advance::Progress(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollerConfig;
    use can_bus::{BusId, MockBus};
    use obd_protocol::{PollEntry, RequestType, TransportVariant};
    use proptest::prelude::*;

    fn job(variant: TransportVariant) -> PollJob {
        let entry = PollEntry::new(0x6B4, 0x694, RequestType::ReadData, 0xD815, [0, 5, 1, 999])
            .with_variant(variant);
        PollJob::scheduled(0, &entry, BusId(1), 0)
    }

    fn frames(payload: &[u8], variant: TransportVariant) -> Vec<CanFrame> {
        isotp::segment(0x694, payload, variant, 0xAA).unwrap()
    }

    fn feed(
        reassembler: &mut Reassembler,
        job: &mut PollJob,
        frames: &[CanFrame],
    ) -> Result<Vec<Step>, Fault> {
        frames
            .iter()
            .map(|frame| reassembler.accept(job, frame, 0))
            .collect()
    }

    #[test]
    fn test_twenty_bytes_in_three_frames() {
        let payload: Vec<u8> = (0..20).collect();
        let frames = frames(&payload, TransportVariant::Standard);
        assert_eq!(frames.len(), 3);

        let mut reassembler = Reassembler::new(1024);
        let mut job = job(TransportVariant::Standard);
        let mut remaining = Vec::new();
        for frame in &frames {
            let step = reassembler.accept(&mut job, frame, 0).unwrap();
            remaining.push(job.bytes_remaining);
            assert_eq!(step.complete, job.bytes_remaining == 0);
        }

        assert_eq!(remaining, vec![14, 7, 0]);
        assert_eq!(reassembler.buffer().as_slice(), payload.as_slice());
        assert_eq!(job.frame_index, 3);
    }

    #[test]
    fn test_single_frame() {
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);
        let frame = CanFrame::new(0x694, &[0x05, 0x62, 0xD8, 0x15, 0x01, 0x02, 0xAA, 0xAA]).unwrap();

        let step = reassembler.accept(&mut job, &frame, 0).unwrap();
        assert!(step.start && step.complete);
        assert_eq!(reassembler.payload(3), &[0x01, 0x02]);
    }

    #[test]
    fn test_sequence_gap_is_malformed() {
        let payload: Vec<u8> = (0..30).collect();
        let frames = frames(&payload, TransportVariant::Standard);
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);

        reassembler.accept(&mut job, &frames[0], 0).unwrap();
        let err = reassembler.accept(&mut job, &frames[2], 0).unwrap_err();
        assert_eq!(
            err,
            Fault::Malformed(FrameFault::Sequence {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn test_continuation_before_first_frame_is_ignored() {
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);
        let frame = CanFrame::new(0x694, &[0x21, 1, 2, 3, 4, 5, 6, 7]).unwrap();

        let err = reassembler.accept(&mut job, &frame, 0).unwrap_err();
        assert_eq!(err, Fault::Ignored(FrameFault::NoFirstFrame));
        assert_eq!(job.frame_index, 0);
    }

    #[test]
    fn test_padding_accepted_on_full_frames() {
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);
        // 8 bytes total: 6 in the first frame, 2 in the consecutive frame
        let first = CanFrame::new(0x694, &[0x10, 0x08, 1, 2, 3, 4, 5, 6]).unwrap();
        reassembler.accept(&mut job, &first, 0).unwrap();

        let padded = CanFrame::new(0x694, &[0x21, 7, 8, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]).unwrap();
        let step = reassembler.accept(&mut job, &padded, 0).unwrap();
        assert!(step.complete);
        assert_eq!(reassembler.buffer().as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_unpadded_oversized_frame_is_malformed() {
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);
        let first = CanFrame::new(0x694, &[0x10, 0x08, 1, 2, 3, 4, 5, 6]).unwrap();
        reassembler.accept(&mut job, &first, 0).unwrap();

        let frame = CanFrame::new(0x694, &[0x21, 7, 8, 9]).unwrap();
        let err = reassembler.accept(&mut job, &frame, 0).unwrap_err();
        assert_eq!(
            err,
            Fault::Malformed(FrameFault::Oversized {
                remaining: 2,
                got: 3
            })
        );
    }

    #[test]
    fn test_short_consecutive_frame_is_malformed() {
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);
        let first = CanFrame::new(0x694, &[0x10, 0x14, 1, 2, 3, 4, 5, 6]).unwrap();
        reassembler.accept(&mut job, &first, 0).unwrap();

        let frame = CanFrame::new(0x694, &[0x21, 7, 8]).unwrap();
        let err = reassembler.accept(&mut job, &frame, 0).unwrap_err();
        assert_eq!(
            err,
            Fault::Malformed(FrameFault::Truncated {
                expected: 7,
                got: 2
            })
        );
    }

    #[test]
    fn test_first_frame_overflow() {
        let mut reassembler = Reassembler::new(16);
        let mut job = job(TransportVariant::Standard);
        let first = CanFrame::new(0x694, &[0x10, 0x14, 1, 2, 3, 4, 5, 6]).unwrap();

        let err = reassembler.accept(&mut job, &first, 0).unwrap_err();
        assert_eq!(
            err,
            Fault::Overflow {
                declared: 20,
                capacity: 16
            }
        );
        assert!(reassembler.buffer().is_empty());
    }

    #[test]
    fn test_new_first_frame_restarts_reply() {
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);
        let stale = frames(&[0xEE; 20], TransportVariant::Standard);
        reassembler.accept(&mut job, &stale[0], 0).unwrap();
        reassembler.accept(&mut job, &stale[1], 0).unwrap();

        let payload: Vec<u8> = (0..15).collect();
        feed(&mut reassembler, &mut job, &frames(&payload, TransportVariant::Standard)).unwrap();
        assert_eq!(reassembler.buffer().as_slice(), payload.as_slice());
    }

    #[test]
    fn test_block_size_requests_flow_control() {
        let payload: Vec<u8> = (0..40).collect();
        let frames = frames(&payload, TransportVariant::Standard);
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);

        let owed: Vec<bool> = frames
            .iter()
            .map(|frame| reassembler.accept(&mut job, frame, 2).unwrap().flow_control)
            .collect();
        // FF, CF1, CF2 (block end), CF3, CF4 (block end), CF5 (last)
        assert_eq!(owed, vec![true, false, true, false, true, false]);
    }

    #[test]
    fn test_extended_addressing() {
        let variant = TransportVariant::ExtendedAddressing { target: 0xF1 };
        let payload: Vec<u8> = (0..17).collect();
        let mut reassembler = Reassembler::new(64);
        let mut job = job(variant);

        let steps = feed(&mut reassembler, &mut job, &frames(&payload, variant)).unwrap();
        assert!(steps.last().unwrap().complete);
        assert_eq!(reassembler.buffer().as_slice(), payload.as_slice());
    }

    #[test]
    fn test_receive_checks_header_and_sends_flow_control() {
        let config = PollerConfig::default();
        let mock = MockBus::new(BusId(1));
        let handle = mock.handle();
        let mut link = Link::new(&config);
        link.add(Box::new(mock));
        let mut stats = PollStats::default();
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);

        let mut reply = vec![0x62, 0xD8, 0x15];
        reply.extend(0..10u8);
        let frames = frames(&reply, TransportVariant::Standard);

        let first = receive(&mut reassembler, &mut job, &frames[0], &mut link, &mut stats, 0);
        assert!(matches!(first, Advance::Progress(_)));
        let sent = handle.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), 0x6B4);
        assert_eq!(&sent[0].data()[..3], &[0x30, 0x00, 0x00]);

        let last = receive(&mut reassembler, &mut job, &frames[1], &mut link, &mut stats, 0);
        assert!(matches!(last, Advance::Complete(_)));
        assert_eq!(reassembler.payload(job.header_len), (0..10u8).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_receive_header_mismatch_keeps_waiting() {
        let config = PollerConfig::default();
        let mut link = Link::new(&config);
        link.add(Box::new(MockBus::new(BusId(1))));
        let mut stats = PollStats::default();
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);

        // Reply to another identifier
        let frame = CanFrame::new(0x694, &[0x04, 0x62, 0xF1, 0x90, 0x01]).unwrap();
        let advance = receive(&mut reassembler, &mut job, &frame, &mut link, &mut stats, 0);
        assert!(matches!(advance, Advance::Hold));
        assert_eq!(stats.unexpected_replies, 1);
        assert_eq!(job.frame_index, 0);
    }

    #[test]
    fn test_receive_negative_and_pending() {
        let config = PollerConfig::default();
        let mut link = Link::new(&config);
        let mut stats = PollStats::default();
        let mut reassembler = Reassembler::new(64);
        let mut job = job(TransportVariant::Standard);

        let pending = CanFrame::new(0x694, &[0x03, 0x7F, 0x22, 0x78]).unwrap();
        let advance = receive(&mut reassembler, &mut job, &pending, &mut link, &mut stats, 7);
        assert!(matches!(advance, Advance::Hold));
        assert_eq!(job.issued_tick(), 7);

        let rejected = CanFrame::new(0x694, &[0x03, 0x7F, 0x22, 0x31]).unwrap();
        let advance = receive(&mut reassembler, &mut job, &rejected, &mut link, &mut stats, 8);
        match advance {
            Advance::Failed(PollError::NegativeResponse { service, code }) => {
                assert_eq!(service, 0x22);
                assert_eq!(code, NegativeResponseCode::RequestOutOfRange);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_reassembly_yields_original_bytes(payload in prop::collection::vec(any::<u8>(), 1..=1024)) {
            let variant = TransportVariant::Standard;
            let frames = frames(&payload, variant);
            prop_assume!(frames.len() <= 1024 / 7);

            let mut reassembler = Reassembler::new(1024);
            let mut job = job(variant);
            let steps = feed(&mut reassembler, &mut job, &frames).unwrap();

            prop_assert!(steps.last().unwrap().complete);
            prop_assert_eq!(job.bytes_remaining, 0);
            prop_assert_eq!(reassembler.buffer().as_slice(), payload.as_slice());
        }
    }
}
