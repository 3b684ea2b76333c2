//! Vehicle Telemetry Daemon
//!
//! Wires configured CAN buses into the poller task, activates a vehicle
//! module, reads the VIN and keeps polling until interrupted. Mock buses are
//! answered by simulated ECUs.

pub mod config;
pub mod sim;
pub mod vehicles;

pub use crate::config::{BusBackend, BusConfig, ConfigError, TelemetryConfig};

use anyhow::Context;
use can_bus::{inbound_channel, CanBus, FrameSender, MockBus};
use metrics_exporter_prometheus::PrometheusBuilder;
use obd_scheduler::{Poller, PollerTask};
use sim::{SharedSignals, SimulatedEcu};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("invalid log level {level:?}"))?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;
    Ok(())
}

/// Open the bus driver for one configured bus
pub fn open_bus(
    bus: &BusConfig,
    inbound: &FrameSender,
    signals: &SharedSignals,
) -> anyhow::Result<Box<dyn CanBus>> {
    match bus.backend {
        BusBackend::Mock => {
            let ecus = vec![
                SimulatedEcu::engine(signals.clone()),
                SimulatedEcu::battery(signals.clone()),
            ];
            info!(bus = %bus.id, "Opened simulated bus");
            let mock = MockBus::new(bus.id).with_responder(inbound.clone(), sim::responder(ecus));
            Ok(Box::new(mock))
        }
        BusBackend::Socketcan => open_socketcan(bus, inbound),
    }
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
fn open_socketcan(bus: &BusConfig, inbound: &FrameSender) -> anyhow::Result<Box<dyn CanBus>> {
    let interface = bus
        .interface
        .as_deref()
        .with_context(|| format!("bus {} has no interface", bus.id))?;
    let socket = can_bus::SocketCanBus::open(bus.id, interface, inbound.clone())
        .with_context(|| format!("failed to open {interface} for bus {}", bus.id))?;
    info!(bus = %bus.id, interface, "Opened SocketCAN bus");
    Ok(Box::new(socket))
}

#[cfg(not(all(feature = "socketcan", target_os = "linux")))]
fn open_socketcan(bus: &BusConfig, _inbound: &FrameSender) -> anyhow::Result<Box<dyn CanBus>> {
    anyhow::bail!(
        "bus {} uses socketcan but this build has no SocketCAN support",
        bus.id
    )
}

/// Run the daemon until Ctrl-C
pub async fn run(config: TelemetryConfig) -> anyhow::Result<()> {
    if let Some(addr) = config.prometheus_listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Serving Prometheus metrics");
    }

    let registry = Arc::new(vehicles::builtin_registry()?);
    let signals = sim::shared_signals();
    let (inbound, frames) = inbound_channel(config.poller.frame_queue_depth);

    let mut poller = Poller::new(&config.poller);
    for bus in &config.buses {
        poller.add_bus(open_bus(bus, &inbound, &signals)?);
    }
    drop(inbound);

    let (task, handle) = PollerTask::new(
        poller,
        registry,
        frames,
        config.tick_interval(),
        config.poller.command_queue_depth,
    );
    let worker = tokio::spawn(task.run());
    let simulator = config
        .uses_mock()
        .then(|| tokio::spawn(sim::drive(signals, config.sim_step())));

    handle
        .activate_vehicle(&config.vehicle)
        .await
        .with_context(|| format!("failed to activate vehicle {:?}", config.vehicle))?;

    if let Some(bus) = config.primary_bus() {
        match vehicles::obdii::read_vin(&handle, bus, config.vin_timeout()).await {
            Ok(Some(vin)) => info!(%vin, "Vehicle identified"),
            Ok(None) => warn!("VIN reply unusable"),
            Err(err) => warn!("VIN read failed: {}", err),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    info!("Shutting down");

    match handle.stats().await {
        Ok(stats) => info!(
            ticks = stats.ticks,
            sent = stats.requests_sent,
            completed = stats.replies_completed,
            timeouts = stats.timeouts,
            errors = stats.errors(),
            "Final poll statistics"
        ),
        Err(err) => warn!("Poller stopped early: {}", err),
    }
    handle.shutdown().await;
    worker.await.context("poller task failed")?;
    if let Some(simulator) = simulator {
        simulator.abort();
    }
    Ok(())
}
