//! Generic OBD-II vehicle
//!
//! Polls standard mode 01 PIDs from the engine controller, deriving the poll
//! state from engine speed and road speed. Engine speed silence is taken as
//! the ignition being off.

use can_bus::BusId;
use metrics::gauge;
use obd_protocol::{vehicle_info, Pid, PollEntry, RequestType, OBD_BROADCAST_ID};
use obd_scheduler::{
    PollControl, PollError, PollJob, PollerHandle, ReplyOutcome, SingleRequest, VehicleModule,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CODE: &str = "O2";

const ENGINE_REQUEST_ID: u32 = 0x7E0;
const ENGINE_REPLY_ID: u32 = 0x7E8;

pub const STATE_ENGINE_OFF: u8 = 0;
pub const STATE_IDLE: u8 = 1;
pub const STATE_DRIVING: u8 = 2;

/// Engine speed timeouts in a row before the engine counts as off
const MAX_MISSED_RPM: u8 = 3;

/// Ticks between summary log lines
const SUMMARY_TICKS: u64 = 600;

const VIN_LEN: usize = 17;

const ROWS: &[PollEntry] = &[
    PollEntry::new(ENGINE_REQUEST_ID, ENGINE_REPLY_ID, RequestType::ObdCurrent, 0x0C, [10, 2, 2, 0]),
    PollEntry::new(OBD_BROADCAST_ID, 0, RequestType::ObdCurrent, 0x0D, [0, 5, 4, 0]),
    PollEntry::new(ENGINE_REQUEST_ID, ENGINE_REPLY_ID, RequestType::ObdCurrent, 0x05, [0, 20, 10, 0]),
    PollEntry::new(ENGINE_REQUEST_ID, ENGINE_REPLY_ID, RequestType::ObdCurrent, 0x04, [0, 10, 2, 0]),
    PollEntry::new(ENGINE_REQUEST_ID, ENGINE_REPLY_ID, RequestType::ObdCurrent, 0x2F, [0, 50, 50, 0]),
    PollEntry::new(ENGINE_REQUEST_ID, ENGINE_REPLY_ID, RequestType::ObdCurrent, 0x42, [30, 30, 30, 0]),
    PollEntry::END,
];

pub struct ObdVehicle {
    values: BTreeMap<u8, f64>,
    missed_rpm: u8,
}

pub fn create() -> Box<dyn VehicleModule> {
    Box::new(ObdVehicle::new())
}

impl ObdVehicle {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            missed_rpm: 0,
        }
    }

    /// Last decoded value of `pid`
    pub fn value(&self, pid: Pid) -> Option<f64> {
        self.values.get(&pid.code()).copied()
    }

    fn update_state(&self, ctl: &mut PollControl) {
        let rpm = self.value(Pid::Rpm).unwrap_or(0.0);
        let speed = self.value(Pid::Speed).unwrap_or(0.0);
        let state = if rpm <= 0.0 {
            STATE_ENGINE_OFF
        } else if speed > 0.0 {
            STATE_DRIVING
        } else {
            STATE_IDLE
        };
        if let Err(err) = ctl.set_state(state) {
            warn!("Cannot enter poll state {}: {}", state, err);
        }
    }
}

impl Default for ObdVehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl VehicleModule for ObdVehicle {
    fn code(&self) -> &'static str {
        CODE
    }

    fn poll_rows(&self) -> &'static [PollEntry] {
        ROWS
    }

    fn poll_bus(&self) -> BusId {
        BusId(1)
    }

    fn on_poll_reply(&mut self, ctl: &mut PollControl, job: &PollJob, data: &[u8]) -> ReplyOutcome {
        let Some(pid) = u8::try_from(job.identifier).ok().and_then(Pid::from_code) else {
            return ReplyOutcome::Unrecognized;
        };
        let Some(value) = pid.decode(data) else {
            warn!(pid = format!("0x{:02X}", pid.code()), len = data.len(), "Short PID reply");
            return ReplyOutcome::Handled;
        };

        gauge!(pid.metric_name()).set(value);
        self.values.insert(pid.code(), value);

        match pid {
            Pid::Rpm => {
                self.missed_rpm = 0;
                self.update_state(ctl);
            }
            Pid::Speed if ctl.state() != STATE_ENGINE_OFF => self.update_state(ctl),
            _ => {}
        }
        ReplyOutcome::Handled
    }

    fn on_poll_error(&mut self, ctl: &mut PollControl, job: &PollJob, error: &PollError) {
        if job.identifier != Pid::Rpm.code() as u32 || !matches!(error, PollError::Timeout { .. }) {
            return;
        }
        self.missed_rpm = self.missed_rpm.saturating_add(1);
        if self.missed_rpm >= MAX_MISSED_RPM && ctl.state() != STATE_ENGINE_OFF {
            info!(missed = self.missed_rpm, "Engine silent, assuming ignition off");
            self.values.remove(&Pid::Rpm.code());
            if let Err(err) = ctl.set_state(STATE_ENGINE_OFF) {
                warn!("Cannot enter poll state {}: {}", STATE_ENGINE_OFF, err);
            }
        }
    }

    fn on_ticker(&mut self, ctl: &mut PollControl, tick: u64) {
        if tick % SUMMARY_TICKS != 0 {
            return;
        }
        info!(
            state = ctl.state(),
            rpm = ?self.value(Pid::Rpm),
            speed_kmh = ?self.value(Pid::Speed),
            coolant_c = ?self.value(Pid::CoolantTemp),
            voltage = ?self.value(Pid::ModuleVoltage),
            "Engine summary"
        );
    }
}

/// Extract the VIN from a mode 09 info type 02 reply (data after `49 02`)
pub fn parse_vin(data: &[u8]) -> Option<String> {
    // Leading data item count, absent on some older controllers
    let bytes = match data.len() {
        len if len == VIN_LEN + 1 => &data[1..],
        VIN_LEN => data,
        _ => return None,
    };
    if !bytes.iter().all(u8::is_ascii_alphanumeric) {
        return None;
    }
    String::from_utf8(bytes.to_vec()).ok()
}

/// Ask every OBD-II controller on `bus` for the VIN
pub async fn read_vin(handle: &PollerHandle, bus: BusId, timeout: Duration) -> Result<Option<String>, PollError> {
    let request = SingleRequest::new(
        bus,
        OBD_BROADCAST_ID,
        0,
        RequestType::ObdVehicleInfo,
        vehicle_info::VIN as u32,
    );
    let data = handle.send_single_request(request, timeout).await?;
    let vin = parse_vin(&data);
    if vin.is_none() {
        debug!(len = data.len(), "Unusable VIN reply");
    }
    Ok(vin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{self, SimulatedEcu};
    use can_bus::{inbound_channel, FrameReceiver, MockBus, MockBusHandle};
    use obd_protocol::PollTable;
    use obd_scheduler::{Poller, PollerConfig};
    use std::sync::Arc;

    const BUS: BusId = BusId(1);

    fn rig(signals: &sim::SharedSignals) -> (Poller, FrameReceiver, MockBusHandle) {
        let (inbound, frames) = inbound_channel(64);
        let bus = MockBus::new(BUS)
            .with_responder(inbound, sim::responder(vec![SimulatedEcu::engine(signals.clone())]));
        let handle = bus.handle();
        let mut poller = Poller::new(&PollerConfig::default());
        poller.add_bus(Box::new(bus));
        let table = PollTable::new(ROWS).unwrap();
        poller.set_poll_schedule(BUS, Some(Arc::new(table))).unwrap();
        (poller, frames, handle)
    }

    fn run(poller: &mut Poller, frames: &mut FrameReceiver, vehicle: &mut ObdVehicle, ticks: u32) {
        for _ in 0..ticks {
            poller.tick(vehicle);
            while let Ok(received) = frames.try_recv() {
                poller.deliver(received.bus, &received.frame, vehicle);
            }
        }
    }

    #[test]
    fn test_engine_start_moves_to_idle_then_driving() {
        let signals = sim::shared_signals();
        let (mut poller, mut frames, _) = rig(&signals);
        let mut vehicle = ObdVehicle::new();

        run(&mut poller, &mut frames, &mut vehicle, 10);
        assert_eq!(vehicle.value(Pid::Rpm), Some(0.0));
        assert_eq!(poller.poll_state(), STATE_ENGINE_OFF);

        signals.lock().rpm = 800.0;
        run(&mut poller, &mut frames, &mut vehicle, 10);
        assert_eq!(poller.poll_state(), STATE_IDLE);
        assert_eq!(vehicle.value(Pid::Rpm), Some(800.0));

        signals.lock().speed_kmh = 42.0;
        run(&mut poller, &mut frames, &mut vehicle, 10);
        assert_eq!(poller.poll_state(), STATE_DRIVING);
        // Speed is polled functionally; the engine controller answers
        assert_eq!(vehicle.value(Pid::Speed), Some(42.0));
        assert!(vehicle.value(Pid::EngineLoad).is_some());
    }

    #[test]
    fn test_rpm_silence_turns_engine_off() {
        let mut poller = Poller::new(&PollerConfig::default());
        poller.add_bus(Box::new(MockBus::new(BUS)));
        poller
            .set_poll_schedule(BUS, Some(Arc::new(PollTable::new(ROWS).unwrap())))
            .unwrap();
        poller.set_poll_state(STATE_DRIVING).unwrap();
        let mut vehicle = ObdVehicle::new();

        for _ in 0..40 {
            poller.tick(&mut vehicle);
        }
        assert_eq!(poller.poll_state(), STATE_ENGINE_OFF);
        assert_eq!(vehicle.value(Pid::Rpm), None);
    }

    #[test]
    fn test_every_row_recognized() {
        let mut vehicle = ObdVehicle::new();
        let (mut poller, mut frames, bus) = rig(&sim::shared_signals());
        run(&mut poller, &mut frames, &mut vehicle, 10);
        assert_eq!(poller.stats().unexpected_replies, 0);
        assert!(!bus.sent().is_empty());
    }

    #[test]
    fn test_parse_vin() {
        let mut data = vec![0x01];
        data.extend_from_slice(b"1HGBH41JXMN109186");
        assert_eq!(parse_vin(&data).as_deref(), Some("1HGBH41JXMN109186"));
        assert_eq!(parse_vin(&data[1..]).as_deref(), Some("1HGBH41JXMN109186"));
        assert_eq!(parse_vin(&data[..10]), None);

        data[5] = 0x00;
        assert_eq!(parse_vin(&data), None);
    }
}
