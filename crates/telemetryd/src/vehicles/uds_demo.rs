//! UDS battery demo vehicle
//!
//! Polls a battery management system with read data by identifier and takes
//! replies frame by frame, collecting each reply in its own buffer before
//! decoding it.

use can_bus::BusId;
use metrics::gauge;
use obd_protocol::{PollEntry, RequestType};
use obd_scheduler::{
    LegacyPollFrame, PollControl, PollError, PollJob, ReplyOutcome, ReplyShape, VehicleModule,
};
use rx_buffer::{BufferError, RxBuffer};
use tracing::{debug, info, warn};

pub const CODE: &str = "UDS";

const REQUEST_ID: u32 = 0x7E4;
const REPLY_ID: u32 = 0x7EC;

/// Data identifiers served by the battery management system
pub mod did {
    /// State of charge, 0.01 %
    pub const SOC: u16 = 0xD815;
    /// Pack voltage, 0.1 V
    pub const PACK_VOLTAGE: u16 = 0xD816;
    /// Pack current, signed 0.1 A, negative while charging
    pub const PACK_CURRENT: u16 = 0xD817;
    /// Cell temperatures, one signed byte per sensor
    pub const CELL_TEMPS: u16 = 0xD818;
    /// Vehicle identification number
    pub const VIN: u16 = 0xF190;
}

pub const STATE_OFF: u8 = 0;
pub const STATE_ON: u8 = 1;
pub const STATE_CHARGING: u8 = 2;
/// Keep-alive polling of the state of charge only
pub const STATE_PING: u8 = 3;

/// Consecutive timeouts before the pack is considered asleep
const MAX_MISSED: u8 = 5;

const ROWS: &[PollEntry] = &[
    PollEntry::new(REQUEST_ID, REPLY_ID, RequestType::ReadData, did::SOC as u32, [60, 5, 10, 999]),
    PollEntry::new(REQUEST_ID, REPLY_ID, RequestType::ReadData, did::PACK_VOLTAGE as u32, [0, 5, 2, 0]),
    PollEntry::new(REQUEST_ID, REPLY_ID, RequestType::ReadData, did::PACK_CURRENT as u32, [0, 5, 2, 0]),
    PollEntry::new(REQUEST_ID, REPLY_ID, RequestType::ReadData, did::CELL_TEMPS as u32, [0, 20, 10, 0]),
    PollEntry::END,
];

/// Decoded battery values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryReadings {
    pub soc_pct: Option<f64>,
    pub pack_voltage: Option<f64>,
    pub pack_current: Option<f64>,
    pub cell_temp_min: Option<i8>,
    pub cell_temp_max: Option<i8>,
}

pub struct UdsDemo {
    buffer: RxBuffer,
    readings: BatteryReadings,
    missed: u8,
}

pub fn create() -> Box<dyn VehicleModule> {
    Box::new(UdsDemo::new())
}

impl UdsDemo {
    pub fn new() -> Self {
        Self {
            buffer: RxBuffer::with_default_capacity(),
            readings: BatteryReadings::default(),
            missed: 0,
        }
    }

    pub fn readings(&self) -> &BatteryReadings {
        &self.readings
    }

    fn decode(&mut self, ctl: &mut PollControl, identifier: u16) -> Result<ReplyOutcome, BufferError> {
        match identifier {
            did::SOC => {
                let soc = self.buffer.read_u16_be(0)? as f64 / 100.0;
                gauge!("battery_soc_pct").set(soc);
                self.readings.soc_pct = Some(soc);
                if ctl.state() == STATE_OFF {
                    info!(soc, "Battery awake");
                    switch(ctl, STATE_ON);
                }
            }
            did::PACK_VOLTAGE => {
                let voltage = self.buffer.read_u16_be(0)? as f64 / 10.0;
                gauge!("battery_pack_voltage_v").set(voltage);
                self.readings.pack_voltage = Some(voltage);
            }
            did::PACK_CURRENT => {
                let current = self.buffer.read_i16_be(0)? as f64 / 10.0;
                gauge!("battery_pack_current_a").set(current);
                self.readings.pack_current = Some(current);
                match ctl.state() {
                    STATE_ON if current < 0.0 => switch(ctl, STATE_CHARGING),
                    STATE_CHARGING if current >= 0.0 => switch(ctl, STATE_ON),
                    _ => {}
                }
            }
            did::CELL_TEMPS => {
                let mut min = i8::MAX;
                let mut max = i8::MIN;
                for offset in 0..self.buffer.len() {
                    let temp = self.buffer.read_i8(offset)?;
                    min = min.min(temp);
                    max = max.max(temp);
                }
                if self.buffer.is_empty() {
                    return Ok(ReplyOutcome::Unrecognized);
                }
                gauge!("battery_cell_temp_min_c").set(min as f64);
                gauge!("battery_cell_temp_max_c").set(max as f64);
                self.readings.cell_temp_min = Some(min);
                self.readings.cell_temp_max = Some(max);
            }
            _ => return Ok(ReplyOutcome::Unrecognized),
        }
        Ok(ReplyOutcome::Handled)
    }
}

impl Default for UdsDemo {
    fn default() -> Self {
        Self::new()
    }
}

fn switch(ctl: &mut PollControl, state: u8) {
    if let Err(err) = ctl.set_state(state) {
        warn!("Cannot enter poll state {}: {}", state, err);
    }
}

impl VehicleModule for UdsDemo {
    fn code(&self) -> &'static str {
        CODE
    }

    fn poll_rows(&self) -> &'static [PollEntry] {
        ROWS
    }

    fn poll_bus(&self) -> BusId {
        BusId(1)
    }

    fn reply_shape(&self) -> ReplyShape {
        ReplyShape::PerFrame
    }

    fn on_poll_frame(&mut self, ctl: &mut PollControl, frame: &LegacyPollFrame<'_>) -> ReplyOutcome {
        if frame.frame_index == 0 {
            self.buffer.clear();
        }
        if let Err(err) = self.buffer.extend_from_slice(frame.data) {
            warn!(did = format!("0x{:04X}", frame.identifier), "Reply dropped: {}", err);
            return ReplyOutcome::Handled;
        }
        if frame.bytes_remaining > 0 {
            return ReplyOutcome::Handled;
        }

        self.missed = 0;
        match self.decode(ctl, frame.identifier as u16) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(did = format!("0x{:04X}", frame.identifier), "Short reply: {}", err);
                ReplyOutcome::Handled
            }
        }
    }

    fn on_poll_error(&mut self, ctl: &mut PollControl, job: &PollJob, error: &PollError) {
        debug!(did = format!("0x{:04X}", job.identifier), "Poll failed: {}", error);
        if !matches!(error, PollError::Timeout { .. }) || ctl.state() == STATE_OFF {
            return;
        }
        self.missed = self.missed.saturating_add(1);
        if self.missed >= MAX_MISSED {
            info!(missed = self.missed, "Battery silent, assuming asleep");
            self.missed = 0;
            switch(ctl, STATE_OFF);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{self, SimulatedEcu};
    use can_bus::{inbound_channel, FrameReceiver, MockBus};
    use obd_protocol::PollTable;
    use obd_scheduler::{Poller, PollerConfig};
    use std::sync::Arc;

    const BUS: BusId = BusId(1);

    fn rig(signals: &sim::SharedSignals) -> (Poller, FrameReceiver) {
        let (inbound, frames) = inbound_channel(64);
        let bus = MockBus::new(BUS).with_responder(
            inbound,
            sim::responder(vec![SimulatedEcu::battery(signals.clone())]),
        );
        let mut poller = Poller::new(&PollerConfig::default());
        poller.add_bus(Box::new(bus));
        let table = PollTable::new(ROWS).unwrap();
        poller.set_poll_schedule(BUS, Some(Arc::new(table))).unwrap();
        (poller, frames)
    }

    fn run(poller: &mut Poller, frames: &mut FrameReceiver, vehicle: &mut UdsDemo, ticks: u32) {
        for _ in 0..ticks {
            poller.tick(vehicle);
            while let Ok(received) = frames.try_recv() {
                poller.deliver(received.bus, &received.frame, vehicle);
            }
        }
    }

    #[test]
    fn test_wakes_and_reads_pack() {
        let signals = sim::shared_signals();
        let (mut poller, mut frames) = rig(&signals);
        let mut vehicle = UdsDemo::new();

        run(&mut poller, &mut frames, &mut vehicle, 60);
        assert_eq!(poller.poll_state(), STATE_ON);
        assert_eq!(vehicle.readings().soc_pct, Some(71.5));

        run(&mut poller, &mut frames, &mut vehicle, 40);
        let readings = vehicle.readings();
        assert_eq!(readings.pack_voltage, Some(signals.lock().pack_voltage));
        assert_eq!(readings.pack_current, Some(0.0));
        // Multi-frame reply assembled from per-frame callbacks
        assert_eq!(readings.cell_temp_min, Some(21));
        assert_eq!(readings.cell_temp_max, Some(21));
    }

    #[test]
    fn test_negative_current_enters_charging() {
        let signals = sim::shared_signals();
        signals.lock().pack_current = -32.0;
        let (mut poller, mut frames) = rig(&signals);
        let mut vehicle = UdsDemo::new();

        run(&mut poller, &mut frames, &mut vehicle, 80);
        assert_eq!(poller.poll_state(), STATE_CHARGING);

        signals.lock().pack_current = 12.0;
        run(&mut poller, &mut frames, &mut vehicle, 10);
        assert_eq!(poller.poll_state(), STATE_ON);
    }

    #[test]
    fn test_silence_puts_pack_to_sleep() {
        let mut poller = Poller::new(&PollerConfig::default());
        poller.add_bus(Box::new(MockBus::new(BUS)));
        let table = PollTable::new(ROWS).unwrap();
        poller.set_poll_schedule(BUS, Some(Arc::new(table))).unwrap();
        poller.set_poll_state(STATE_ON).unwrap();
        let mut vehicle = UdsDemo::new();

        for _ in 0..200 {
            poller.tick(&mut vehicle);
        }
        assert_eq!(poller.poll_state(), STATE_OFF);
        assert!(poller.stats().timeouts >= MAX_MISSED as u64);
    }
}
