//! Poller Engine
//!
//! Ties the schedule, the transmit link and the two reassembly paths
//! together. The poller itself is synchronous: [`Poller::tick`] and
//! [`Poller::deliver`] are called by whoever owns it (normally
//! [`PollerTask`](crate::PollerTask)), with the active vehicle passed in.

use crate::config::PollerConfig;
use crate::dispatch;
use crate::error::{FrameFault, PollError};
use crate::job::PollJob;
use crate::link::Link;
use crate::reassembly::{self, Advance, Reassembler, Step};
use crate::scheduler::Schedule;
use crate::single::{ActiveSingle, PendingSingle, SingleReply, SingleRequest, SingleSlot};
use crate::stats::{PollEvent, PollStats};
use crate::vehicle::{PollControl, ReplyShape, VehicleModule};
use can_bus::{BusId, CanBus, CanFrame};
use obd_protocol::isotp::{self, IsoTpFrame};
use obd_protocol::{PollEntry, PollTable};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Poll scheduling and reply reassembly engine
pub struct Poller {
    link: Link,
    control: PollControl,
    schedule: Option<Schedule>,
    job: Option<PollJob>,
    reassembler: Reassembler,
    single: SingleSlot,
    stats: PollStats,
    response_timeout_ticks: u64,
    ticks: u64,
}

impl Poller {
    /// Create a poller with no buses and no schedule
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            link: Link::new(config),
            control: PollControl::default(),
            schedule: None,
            job: None,
            reassembler: Reassembler::new(config.buffer_capacity),
            single: SingleSlot::new(config.buffer_capacity),
            stats: PollStats::default(),
            response_timeout_ticks: u64::from(config.response_timeout_ticks.max(1)),
            ticks: 0,
        }
    }

    /// Register a bus; a bus with the same ID is replaced
    pub fn add_bus(&mut self, bus: Box<dyn CanBus>) {
        self.link.add(bus);
    }

    /// Install `table` for `bus`, or clear the schedule with `None`
    ///
    /// Any in-flight scheduled job is abandoned and all countdowns restart.
    pub fn set_poll_schedule(
        &mut self,
        bus: BusId,
        table: Option<Arc<PollTable>>,
    ) -> Result<(), PollError> {
        if let Some(table) = &table {
            let unknown = std::iter::once(bus)
                .chain(table.iter().filter_map(|entry| entry.request_bus))
                .find(|bus| !self.link.contains(*bus));
            if let Some(bus) = unknown {
                return Err(PollError::UnknownBus(bus));
            }
        }
        if let Some(job) = self.job.take() {
            debug!(
                tx_id = format!("0x{:03X}", job.tx_id),
                identifier = format!("0x{:X}", job.identifier),
                "Abandoning in-flight poll"
            );
        }

        self.schedule = match table {
            Some(table) => {
                info!(bus = %bus, entries = table.len(), "Poll schedule installed");
                Some(Schedule::new(table, bus))
            }
            None => {
                info!("Poll schedule cleared");
                None
            }
        };
        self.service_single();
        Ok(())
    }

    /// Active schedule, if any
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn poll_state(&self) -> u8 {
        self.control.state()
    }

    /// Change poll state; takes effect on the next tick
    pub fn set_poll_state(&mut self, state: u8) -> Result<(), PollError> {
        self.control.set_state(state)
    }

    /// Scheduled job in flight
    pub fn job(&self) -> Option<&PollJob> {
        self.job.as_ref()
    }

    /// Single request in flight
    pub fn single_job(&self) -> Option<&PollJob> {
        self.single.active.as_ref().map(|active| &active.job)
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one scheduler tick
    pub fn tick(&mut self, vehicle: &mut dyn VehicleModule) {
        self.ticks += 1;
        self.stats.tick();
        vehicle.on_ticker(&mut self.control, self.ticks);

        self.expire_job(vehicle);
        self.expire_single();
        self.service_single();

        let state = usize::from(self.control.state());
        let Some(schedule) = self.schedule.as_mut() else {
            return;
        };
        if schedule.advance(state) == 0 {
            return;
        }

        if let Some(job) = &self.job {
            debug!(
                in_flight = format!("0x{:X}", job.identifier),
                "Due polls deferred, job in flight"
            );
            self.stats.record(PollEvent::Deferred);
            return;
        }

        let single = &self.single;
        let candidate = schedule
            .due()
            .find(|(_, entry)| !single.blocks(schedule.bus_for(entry), entry.tx_id, entry.rx_id))
            .map(|(index, entry)| (index, *entry, schedule.bus_for(entry)));

        match candidate {
            Some((index, entry, bus)) => self.issue(index, entry, bus, state, vehicle),
            None => {
                debug!("Due polls deferred, single request in flight");
                self.stats.record(PollEvent::Deferred);
            }
        }
    }

    /// Route a received frame
    pub fn deliver(&mut self, bus: BusId, frame: &CanFrame, vehicle: &mut dyn VehicleModule) {
        let id = frame.id();
        if self.single.accepts(bus, id) {
            self.deliver_single(frame);
        } else if self.job.as_ref().is_some_and(|job| job.accepts(bus, id)) {
            self.deliver_job(frame, vehicle);
        } else if let Some(entry) = self
            .schedule
            .as_ref()
            .and_then(|schedule| schedule.reply_entry(bus, id))
        {
            let entry = *entry;
            self.drop_orphan(bus, frame, &entry);
        } else {
            self.stats.record(PollEvent::RawFrame);
            vehicle.on_raw_frame(&mut self.control, bus, frame);
        }
    }

    /// Queue a single request; the outcome is sent on `reply`
    pub fn submit_single_request(&mut self, request: SingleRequest, reply: SingleReply) {
        debug!(
            bus = %request.bus,
            tx_id = format!("0x{:03X}", request.tx_id),
            identifier = format!("0x{:X}", request.identifier),
            "Single request queued"
        );
        self.stats.record(PollEvent::Single);
        self.single.queue.push_back(PendingSingle { request, reply });
        self.service_single();
    }

    fn issue(
        &mut self,
        index: usize,
        entry: PollEntry,
        bus: BusId,
        state: usize,
        vehicle: &mut dyn VehicleModule,
    ) {
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.mark_issued(index, state);
        }
        let job = PollJob::scheduled(index, &entry, bus, self.ticks);
        match self.link.send_request(&job, entry.extra) {
            Ok(()) => {
                debug!(
                    bus = %bus,
                    tx_id = format!("0x{:03X}", job.tx_id),
                    identifier = format!("0x{:X}", job.identifier),
                    "Poll sent"
                );
                self.stats.record(PollEvent::Sent);
                self.job = Some(job);
            }
            Err(err) => dispatch::error(vehicle, &mut self.control, &job, &err, &mut self.stats),
        }
    }

    fn expire_job(&mut self, vehicle: &mut dyn VehicleModule) {
        let expired = self
            .job
            .as_ref()
            .is_some_and(|job| self.ticks.saturating_sub(job.issued_tick) >= self.response_timeout_ticks);
        if !expired {
            return;
        }
        if let Some(job) = self.job.take() {
            let err = PollError::Timeout { rx_id: job.rx_id };
            dispatch::error(vehicle, &mut self.control, &job, &err, &mut self.stats);
        }
    }

    fn expire_single(&mut self) {
        if !self.single.expired(self.ticks) {
            return;
        }
        if let Some(active) = self.single.active.take() {
            let err = PollError::Timeout { rx_id: active.job.rx_id };
            debug!(
                tx_id = format!("0x{:03X}", active.job.tx_id),
                rx_id = format!("0x{:03X}", active.job.rx_id),
                "Single request timed out"
            );
            self.stats.record_error(&err);
            if active.reply.send(Err(err)).is_err() {
                debug!("Single request caller already gone");
            }
        }
    }

    fn deliver_job(&mut self, frame: &CanFrame, vehicle: &mut dyn VehicleModule) {
        let Some(mut job) = self.job.take() else {
            return;
        };
        let advance = reassembly::receive(
            &mut self.reassembler,
            &mut job,
            frame,
            &mut self.link,
            &mut self.stats,
            self.ticks,
        );
        match advance {
            Advance::Hold => self.job = Some(job),
            Advance::Progress(step) => {
                self.dispatch_frame(&job, &step, vehicle);
                self.job = Some(job);
            }
            Advance::Complete(step) => {
                self.dispatch_frame(&job, &step, vehicle);
                if vehicle.reply_shape() == ReplyShape::Assembled {
                    let data = self.reassembler.payload(job.header_len);
                    dispatch::reply(vehicle, &mut self.control, &job, data, &mut self.stats);
                }
                self.stats.record(PollEvent::Completed);
                self.service_single();
            }
            Advance::Failed(err) => {
                dispatch::error(vehicle, &mut self.control, &job, &err, &mut self.stats);
                self.service_single();
            }
        }
    }

    fn dispatch_frame(&mut self, job: &PollJob, step: &Step, vehicle: &mut dyn VehicleModule) {
        if vehicle.reply_shape() != ReplyShape::PerFrame {
            return;
        }
        let chunk = self.reassembler.chunk(step);
        let data = if step.start {
            chunk.get(job.header_len..).unwrap_or(&[])
        } else {
            chunk
        };
        dispatch::frame(vehicle, &mut self.control, job, step.frame_index, data, &mut self.stats);
    }

    fn deliver_single(&mut self, frame: &CanFrame) {
        let Some(mut active) = self.single.active.take() else {
            return;
        };
        let advance = reassembly::receive(
            &mut self.single.reassembler,
            &mut active.job,
            frame,
            &mut self.link,
            &mut self.stats,
            self.ticks,
        );
        match advance {
            Advance::Hold | Advance::Progress(_) => self.single.active = Some(active),
            Advance::Complete(_) => {
                let data = self.single.reassembler.payload(active.job.header_len).to_vec();
                debug!(
                    rx_id = format!("0x{:03X}", active.job.rx_id),
                    len = data.len(),
                    "Single request complete"
                );
                self.stats.record(PollEvent::Completed);
                if active.reply.send(Ok(data)).is_err() {
                    debug!("Single request caller already gone");
                }
                self.service_single();
            }
            Advance::Failed(err) => {
                warn!(
                    tx_id = format!("0x{:03X}", active.job.tx_id),
                    error = %err,
                    "Single request failed"
                );
                self.stats.record_error(&err);
                if active.reply.send(Err(err)).is_err() {
                    debug!("Single request caller already gone");
                }
                self.service_single();
            }
        }
    }

    /// Free an abandoned single request slot and start the next queued one
    fn service_single(&mut self) {
        let abandoned = self
            .single
            .active
            .as_ref()
            .is_some_and(|active| active.reply.is_closed());
        if abandoned {
            if let Some(active) = self.single.active.take() {
                debug!(
                    rx_id = format!("0x{:03X}", active.job.rx_id),
                    "Single request abandoned by caller"
                );
            }
        }
        if self.single.active.is_some() {
            return;
        }

        while let Some(pending) = self.single.queue.pop_front() {
            if pending.reply.is_closed() {
                continue;
            }
            let request = &pending.request;
            if self
                .job
                .as_ref()
                .is_some_and(|job| job.collides(request.bus, request.tx_id, request.rx_id))
            {
                debug!(
                    rx_id = format!("0x{:03X}", request.rx_id),
                    "Single request waits for in-flight poll"
                );
                self.single.queue.push_front(pending);
                return;
            }

            let job = PollJob::single(request, self.ticks);
            let timeout_ticks = request.timeout_ticks.unwrap_or(self.response_timeout_ticks);
            match self.link.send_request(&job, &request.extra) {
                Ok(()) => {
                    self.stats.record(PollEvent::Sent);
                    self.single.active = Some(ActiveSingle {
                        job,
                        reply: pending.reply,
                        timeout_ticks,
                    });
                    return;
                }
                Err(err) => {
                    warn!(bus = %job.bus, error = %err, "Single request not sent");
                    self.stats.record_error(&err);
                    if pending.reply.send(Err(err)).is_err() {
                        debug!("Single request caller already gone");
                    }
                }
            }
        }
    }

    /// Classify and drop a reply-shaped frame that arrived with no job waiting for it
    fn drop_orphan(&mut self, bus: BusId, frame: &CanFrame, entry: &PollEntry) {
        let rx_id = frame.id();
        let err = match isotp::parse(frame.data(), entry.variant) {
            Ok(IsoTpFrame::Single { .. }) | Ok(IsoTpFrame::First { .. }) => {
                PollError::UnexpectedReply { rx_id }
            }
            Ok(IsoTpFrame::Consecutive { .. }) => PollError::MalformedFrame {
                rx_id,
                fault: FrameFault::NoFirstFrame,
            },
            Ok(IsoTpFrame::FlowControl { .. }) => PollError::MalformedFrame {
                rx_id,
                fault: FrameFault::FlowControl,
            },
            Err(source) => PollError::MalformedFrame {
                rx_id,
                fault: FrameFault::Transport(source),
            },
        };
        debug!(bus = %bus, %err, "Dropping reply, no job in flight");
        self.stats.record_error(&err);
    }
}
