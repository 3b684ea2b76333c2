//! Simulated ECUs
//!
//! Stand-ins for an engine controller and a battery management system,
//! answering requests on the mock bus from a shared set of signals that a
//! background task walks through a repeating drive cycle. Multi-frame replies
//! hold their consecutive frames until the tester's flow control arrives.

use crate::vehicles::uds_demo::did;
use can_bus::{CanFrame, Responder};
use obd_protocol::isotp::{self, IsoTpFrame};
use obd_protocol::{service, vehicle_info, Pid, TransportVariant, OBD_BROADCAST_ID};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Engine controller physical request ID
pub const ENGINE_REQUEST_ID: u32 = 0x7E0;
/// Engine controller response ID
pub const ENGINE_REPLY_ID: u32 = 0x7E8;
/// Battery management physical request ID
pub const BATTERY_REQUEST_ID: u32 = 0x7E4;
/// Battery management response ID
pub const BATTERY_REPLY_ID: u32 = 0x7EC;

/// Steps in one drive cycle
pub const DRIVE_CYCLE_STEPS: u64 = 600;

const PAD: u8 = 0xAA;
const NRC_SERVICE_NOT_SUPPORTED: u8 = 0x11;
const NRC_REQUEST_OUT_OF_RANGE: u8 = 0x31;

/// Segment of the drive cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivePhase {
    Parked,
    Idle,
    Driving,
    Charging,
}

impl DrivePhase {
    fn at(step: u64) -> Self {
        match step % DRIVE_CYCLE_STEPS {
            0..=59 => DrivePhase::Parked,
            60..=119 => DrivePhase::Idle,
            120..=419 => DrivePhase::Driving,
            _ => DrivePhase::Charging,
        }
    }
}

/// Physical values the simulated ECUs report
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    pub rpm: f64,
    pub speed_kmh: f64,
    pub coolant_c: f64,
    pub load_pct: f64,
    pub fuel_pct: f64,
    pub module_voltage: f64,
    pub soc_pct: f64,
    pub pack_voltage: f64,
    /// Positive while discharging
    pub pack_current: f64,
    pub cell_temps_c: [i8; 6],
    pub vin: String,
    step: u64,
}

impl Default for Signals {
    fn default() -> Self {
        Self {
            rpm: 0.0,
            speed_kmh: 0.0,
            coolant_c: 20.0,
            load_pct: 0.0,
            fuel_pct: 62.0,
            module_voltage: 12.4,
            soc_pct: 71.5,
            pack_voltage: 358.0,
            pack_current: 0.0,
            cell_temps_c: [21; 6],
            vin: "1HGBH41JXMN109186".to_string(),
            step: 0,
        }
    }
}

/// Signals shared between the drive task and the ECUs
pub type SharedSignals = Arc<Mutex<Signals>>;

pub fn shared_signals() -> SharedSignals {
    Arc::new(Mutex::new(Signals::default()))
}

impl Signals {
    pub fn phase(&self) -> DrivePhase {
        DrivePhase::at(self.step)
    }

    /// Move one step through the drive cycle
    pub fn advance(&mut self) {
        self.step = self.step.wrapping_add(1);

        match self.phase() {
            DrivePhase::Parked => {
                self.rpm = 0.0;
                self.speed_kmh = 0.0;
                self.load_pct = 0.0;
                self.module_voltage = 12.4;
                self.pack_current = 0.0;
            }
            DrivePhase::Idle => {
                self.rpm = 780.0 + (self.step % 7) as f64 * 5.0;
                self.speed_kmh = 0.0;
                self.load_pct = 18.0;
                self.module_voltage = 14.1;
                self.pack_current = 2.5;
            }
            DrivePhase::Driving => {
                let t = (self.step % DRIVE_CYCLE_STEPS - 120) as f64;
                self.speed_kmh = (90.0 * (PI * t / 300.0).sin()).max(0.0);
                self.rpm = 800.0 + self.speed_kmh * 28.0;
                self.load_pct = 25.0 + self.speed_kmh * 0.5;
                self.module_voltage = 14.2;
                self.pack_current = 20.0 + self.speed_kmh * 0.6;
                self.fuel_pct = (self.fuel_pct - 0.01).max(0.0);
                self.soc_pct = (self.soc_pct - 0.005).max(0.0);
            }
            DrivePhase::Charging => {
                self.rpm = 0.0;
                self.speed_kmh = 0.0;
                self.load_pct = 0.0;
                self.module_voltage = 12.6;
                self.pack_current = -32.0;
                self.soc_pct = (self.soc_pct + 0.02).min(100.0);
            }
        }

        let target = if self.rpm > 0.0 { 90.0 } else { 20.0 };
        self.coolant_c += (target - self.coolant_c) * 0.02;
        self.pack_voltage = 320.0 + self.soc_pct * 0.8 - self.pack_current * 0.05;
        let heat = (self.pack_current.abs() / 8.0) as i8;
        for (index, temp) in self.cell_temps_c.iter_mut().enumerate() {
            *temp = 21 + heat + (index % 3) as i8;
        }
    }

    fn pid_value(&self, pid: Pid) -> f64 {
        match pid {
            Pid::EngineLoad => self.load_pct,
            Pid::CoolantTemp => self.coolant_c,
            Pid::ShortFuelTrim | Pid::LongFuelTrim => 0.0,
            Pid::IntakeManifoldPressure => 30.0 + self.load_pct * 0.7,
            Pid::Rpm => self.rpm,
            Pid::Speed => self.speed_kmh,
            Pid::Maf => self.rpm / 100.0,
            Pid::ThrottlePosition => self.load_pct * 0.8,
            Pid::FuelLevel => self.fuel_pct,
            Pid::ModuleVoltage => self.module_voltage,
        }
    }

    fn did_value(&self, identifier: u16) -> Option<Vec<u8>> {
        let bytes = match identifier {
            did::SOC => ((self.soc_pct * 100.0) as u16).to_be_bytes().to_vec(),
            did::PACK_VOLTAGE => ((self.pack_voltage * 10.0) as u16).to_be_bytes().to_vec(),
            did::PACK_CURRENT => ((self.pack_current * 10.0) as i16).to_be_bytes().to_vec(),
            did::CELL_TEMPS => self.cell_temps_c.iter().map(|&t| t as u8).collect(),
            did::VIN => self.vin.as_bytes().to_vec(),
            _ => return None,
        };
        Some(bytes)
    }
}

/// Encode a mode 01 value with the inverse of its SAE J1979 formula
fn encode_pid(pid: Pid, value: f64) -> Vec<u8> {
    let byte = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    let word = |v: f64| (v.round().clamp(0.0, 65535.0) as u16).to_be_bytes().to_vec();
    match pid {
        Pid::EngineLoad | Pid::ThrottlePosition | Pid::FuelLevel => vec![byte(value * 255.0 / 100.0)],
        Pid::CoolantTemp => vec![byte(value + 40.0)],
        Pid::ShortFuelTrim | Pid::LongFuelTrim => vec![byte(value * 128.0 / 100.0 + 128.0)],
        Pid::IntakeManifoldPressure | Pid::Speed => vec![byte(value)],
        Pid::Rpm => word(value * 4.0),
        Pid::Maf => word(value * 100.0),
        Pid::ModuleVoltage => word(value * 1000.0),
    }
}

/// Walk `signals` through the drive cycle, one step per `step`
pub async fn drive(signals: SharedSignals, step: Duration) {
    let mut interval = time::interval(step);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        signals.lock().advance();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EcuKind {
    Engine,
    Battery,
}

/// One simulated control unit on the mock bus
pub struct SimulatedEcu {
    kind: EcuKind,
    request_ids: &'static [u32],
    reply_id: u32,
    signals: SharedSignals,
    pending: VecDeque<CanFrame>,
}

impl SimulatedEcu {
    /// Engine controller answering OBD-II modes 01 and 09, physically and functionally
    pub fn engine(signals: SharedSignals) -> Self {
        Self {
            kind: EcuKind::Engine,
            request_ids: &[ENGINE_REQUEST_ID, OBD_BROADCAST_ID],
            reply_id: ENGINE_REPLY_ID,
            signals,
            pending: VecDeque::new(),
        }
    }

    /// Battery management system answering UDS read data by identifier
    pub fn battery(signals: SharedSignals) -> Self {
        Self {
            kind: EcuKind::Battery,
            request_ids: &[BATTERY_REQUEST_ID],
            reply_id: BATTERY_REPLY_ID,
            signals,
            pending: VecDeque::new(),
        }
    }

    pub fn reply_id(&self) -> u32 {
        self.reply_id
    }

    /// Frames sent in answer to `frame`
    pub fn handle(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
        if !self.request_ids.contains(&frame.id()) {
            return Vec::new();
        }
        match isotp::parse(frame.data(), TransportVariant::Standard) {
            Ok(IsoTpFrame::FlowControl { block_size, .. }) => self.release(block_size),
            Ok(IsoTpFrame::Single { data }) => {
                let functional = frame.id() == OBD_BROADCAST_ID;
                self.respond(data, functional)
            }
            Ok(_) => {
                debug!(
                    ecu = format!("0x{:03X}", self.reply_id),
                    "Segmented requests are not simulated"
                );
                Vec::new()
            }
            Err(err) => {
                debug!(ecu = format!("0x{:03X}", self.reply_id), "Unparseable request: {}", err);
                Vec::new()
            }
        }
    }

    fn respond(&mut self, request: &[u8], functional: bool) -> Vec<CanFrame> {
        let reply = match self.kind {
            EcuKind::Engine => self.engine_reply(request, functional),
            EcuKind::Battery => self.battery_reply(request),
        };
        let Some(reply) = reply else {
            return Vec::new();
        };

        self.pending.clear();
        match isotp::segment(self.reply_id, &reply, TransportVariant::Standard, PAD) {
            Ok(frames) => {
                let mut frames = frames.into_iter();
                let first = frames.next();
                self.pending.extend(frames);
                first.into_iter().collect()
            }
            Err(err) => {
                warn!(ecu = format!("0x{:03X}", self.reply_id), "Cannot segment reply: {}", err);
                Vec::new()
            }
        }
    }

    /// Release held consecutive frames; a block size of 0 releases all
    fn release(&mut self, block_size: u8) -> Vec<CanFrame> {
        let count = match block_size {
            0 => self.pending.len(),
            n => self.pending.len().min(n as usize),
        };
        self.pending.drain(..count).collect()
    }

    fn engine_reply(&self, request: &[u8], functional: bool) -> Option<Vec<u8>> {
        let (&service_id, rest) = request.split_first()?;
        match (service_id, rest) {
            (service::OBD_CURRENT_DATA, [code, ..]) => match Pid::from_code(*code) {
                Some(pid) => {
                    let value = self.signals.lock().pid_value(pid);
                    let mut reply = vec![positive(service_id), pid.code()];
                    reply.extend(encode_pid(pid, value));
                    Some(reply)
                }
                // Functional requests for unsupported PIDs go unanswered
                None if functional => None,
                None => Some(negative(service_id, NRC_REQUEST_OUT_OF_RANGE)),
            },
            (service::OBD_VEHICLE_INFO, [vehicle_info::VIN, ..]) => {
                let mut reply = vec![positive(service_id), vehicle_info::VIN, 0x01];
                reply.extend_from_slice(self.signals.lock().vin.as_bytes());
                Some(reply)
            }
            _ if functional => None,
            _ => Some(negative(service_id, NRC_SERVICE_NOT_SUPPORTED)),
        }
    }

    fn battery_reply(&self, request: &[u8]) -> Option<Vec<u8>> {
        let (&service_id, rest) = request.split_first()?;
        match (service_id, rest) {
            (service::READ_DATA_BY_ID, [hi, lo, ..]) => {
                let identifier = u16::from_be_bytes([*hi, *lo]);
                match self.signals.lock().did_value(identifier) {
                    Some(data) => {
                        let mut reply = vec![positive(service_id), *hi, *lo];
                        reply.extend(data);
                        Some(reply)
                    }
                    None => Some(negative(service_id, NRC_REQUEST_OUT_OF_RANGE)),
                }
            }
            _ => Some(negative(service_id, NRC_SERVICE_NOT_SUPPORTED)),
        }
    }
}

fn positive(service_id: u8) -> u8 {
    service_id.wrapping_add(service::POSITIVE_RESPONSE_OFFSET)
}

fn negative(service_id: u8, nrc: u8) -> Vec<u8> {
    vec![service::NEGATIVE_RESPONSE, service_id, nrc]
}

/// Mock bus responder fanning each transmitted frame out to `ecus`
pub fn responder(mut ecus: Vec<SimulatedEcu>) -> Responder {
    Box::new(move |frame: &CanFrame| ecus.iter_mut().flat_map(|ecu| ecu.handle(frame)).collect::<Vec<_>>())
}
