//! OBD-II PID Definitions and Decoding
//!
//! Standard mode 01 Parameter IDs and their SAE J1979 decoding formulas.
//! Vehicle modules polling these PIDs can decode replies here instead of
//! duplicating the arithmetic.

use serde::{Deserialize, Serialize};

/// Standard OBD-II PIDs for Mode 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrim = 0x07,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Mass air flow rate (0x10)
    Maf = 0x10,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Fuel tank level (0x2F)
    FuelLevel = 0x2F,
    /// Control module voltage (0x42)
    ModuleVoltage = 0x42,
}

impl Pid {
    /// All known PIDs
    pub const ALL: [Pid; 11] = [
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::ShortFuelTrim,
        Pid::LongFuelTrim,
        Pid::IntakeManifoldPressure,
        Pid::Rpm,
        Pid::Speed,
        Pid::Maf,
        Pid::ThrottlePosition,
        Pid::FuelLevel,
        Pid::ModuleVoltage,
    ];

    /// Look up a PID by its code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|pid| pid.code() == code)
    }

    /// Get the PID code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Rpm | Pid::Maf | Pid::ModuleVoltage => 2,
            _ => 1,
        }
    }

    /// Metric name for the decoded value
    pub fn metric_name(&self) -> &'static str {
        match self {
            Pid::EngineLoad => "engine_load_pct",
            Pid::CoolantTemp => "coolant_temp_c",
            Pid::ShortFuelTrim => "fuel_trim_short_pct",
            Pid::LongFuelTrim => "fuel_trim_long_pct",
            Pid::IntakeManifoldPressure => "intake_pressure_kpa",
            Pid::Rpm => "engine_rpm",
            Pid::Speed => "vehicle_speed_kmh",
            Pid::Maf => "maf_gs",
            Pid::ThrottlePosition => "throttle_pct",
            Pid::FuelLevel => "fuel_level_pct",
            Pid::ModuleVoltage => "module_voltage_v",
        }
    }

    /// Decode reply data (bytes after `41 <pid>`); `None` if too short
    pub fn decode(&self, bytes: &[u8]) -> Option<f64> {
        if bytes.len() < self.response_bytes() {
            return None;
        }
        let a = bytes[0] as f64;
        let ab = || (bytes[0] as f64 * 256.0) + bytes[1] as f64;
        let value = match self {
            // A * 100 / 255 (%)
            Pid::EngineLoad | Pid::ThrottlePosition | Pid::FuelLevel => a * 100.0 / 255.0,
            // A - 40 (°C)
            Pid::CoolantTemp => a - 40.0,
            // (A - 128) * 100 / 128 (%)
            Pid::ShortFuelTrim | Pid::LongFuelTrim => (a - 128.0) * 100.0 / 128.0,
            // A (kPa, km/h)
            Pid::IntakeManifoldPressure | Pid::Speed => a,
            // ((A*256)+B)/4
            Pid::Rpm => ab() / 4.0,
            // ((A*256)+B) / 100 (g/s)
            Pid::Maf => ab() / 100.0,
            // ((A*256)+B) / 1000 (V)
            Pid::ModuleVoltage => ab() / 1000.0,
        };
        Some(value)
    }
}
