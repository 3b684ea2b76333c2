//! Daemon configuration
//!
//! Loaded from an optional TOML file (`telemetryd.toml`, or the path in
//! `TELEMETRYD_CONFIG`) with `TELEMETRYD__*` environment overrides, e.g.
//! `TELEMETRYD__VEHICLE=UDS` or `TELEMETRYD__POLLER__RESPONSE_TIMEOUT_TICKS=3`.

use can_bus::BusId;
use config::{Config, Environment, File};
use obd_scheduler::PollerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "TELEMETRYD_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "telemetryd";
const ENV_PREFIX: &str = "TELEMETRYD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no buses configured")]
    NoBuses,

    #[error("bus {0} configured twice")]
    DuplicateBus(BusId),

    #[error("socketcan bus {0} needs an interface name")]
    MissingInterface(BusId),

    #[error("tick interval must be at least 1 ms")]
    ZeroTickInterval,
}

/// Bus driver backing a logical bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-memory bus answered by simulated ECUs
    #[default]
    Mock,
    /// Linux SocketCAN interface
    Socketcan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub id: BusId,
    #[serde(default)]
    pub backend: BusBackend,
    /// Interface name such as `can0` (socketcan only)
    #[serde(default)]
    pub interface: Option<String>,
}

impl BusConfig {
    pub fn mock(id: BusId) -> Self {
        Self {
            id,
            backend: BusBackend::Mock,
            interface: None,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Registry code of the vehicle to activate
    pub vehicle: String,
    /// Maximum log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Scheduler heartbeat
    pub tick_interval_ms: u64,
    /// Wait for the VIN read at startup
    pub vin_timeout_ms: u64,
    /// Drive cycle step of the simulated ECUs
    pub sim_step_ms: u64,
    pub buses: Vec<BusConfig>,
    pub poller: PollerConfig,
    /// Serve Prometheus metrics on this address
    pub prometheus_listen: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            vehicle: "O2".to_string(),
            log_level: "info".to_string(),
            tick_interval_ms: 100,
            vin_timeout_ms: 1000,
            sim_step_ms: 1000,
            buses: vec![BusConfig::mock(BusId(1))],
            poller: PollerConfig::default(),
            prometheus_listen: None,
        }
    }
}

impl TelemetryConfig {
    /// Load from the configuration file and environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let settings = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: Config) -> Result<Self, ConfigError> {
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.buses.is_empty() {
            return Err(ConfigError::NoBuses);
        }
        let mut seen = BTreeSet::new();
        for bus in &self.buses {
            if !seen.insert(bus.id) {
                return Err(ConfigError::DuplicateBus(bus.id));
            }
            if bus.backend == BusBackend::Socketcan && bus.interface.is_none() {
                return Err(ConfigError::MissingInterface(bus.id));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn vin_timeout(&self) -> Duration {
        Duration::from_millis(self.vin_timeout_ms)
    }

    pub fn sim_step(&self) -> Duration {
        Duration::from_millis(self.sim_step_ms.max(1))
    }

    /// Bus for requests not tied to a poll table, the first one configured
    pub fn primary_bus(&self) -> Option<BusId> {
        self.buses.first().map(|bus| bus.id)
    }

    pub fn uses_mock(&self) -> bool {
        self.buses.iter().any(|bus| bus.backend == BusBackend::Mock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Result<TelemetryConfig, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        TelemetryConfig::from_settings(settings)
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, TelemetryConfig::default());
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.primary_bus(), Some(BusId(1)));
        assert!(config.uses_mock());
    }

    #[test]
    fn test_file_overrides() {
        let config = parse(
            r#"
            vehicle = "UDS"
            log_level = "debug"
            prometheus_listen = "127.0.0.1:9100"

            [poller]
            response_timeout_ticks = 5
            flow_control_block_size = 4

            [[buses]]
            id = 2
            backend = "socketcan"
            interface = "can0"
            "#,
        )
        .unwrap();

        assert_eq!(config.vehicle, "UDS");
        assert_eq!(config.poller.response_timeout_ticks, 5);
        assert_eq!(config.poller.flow_control_block_size, 4);
        assert_eq!(config.poller.buffer_capacity, PollerConfig::default().buffer_capacity);
        assert_eq!(config.buses[0].backend, BusBackend::Socketcan);
        assert_eq!(config.primary_bus(), Some(BusId(2)));
        assert_eq!(config.prometheus_listen, Some("127.0.0.1:9100".parse().unwrap()));
        assert!(!config.uses_mock());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            parse("[[buses]]\nid = 1\nbackend = \"socketcan\""),
            Err(ConfigError::MissingInterface(BusId(1)))
        ));
        assert!(matches!(
            parse("[[buses]]\nid = 1\n[[buses]]\nid = 1"),
            Err(ConfigError::DuplicateBus(BusId(1)))
        ));
        assert!(matches!(parse("tick_interval_ms = 0"), Err(ConfigError::ZeroTickInterval)));

        let config = TelemetryConfig {
            buses: Vec::new(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoBuses)));
    }
}
