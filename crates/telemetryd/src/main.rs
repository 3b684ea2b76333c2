//! Vehicle Telemetry Daemon - Main Entry Point

use telemetryd::{init_logging, run, TelemetryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TelemetryConfig::load()?;
    init_logging(&config.log_level)?;

    info!("=== Vehicle Telemetry Poller v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        vehicle = %config.vehicle,
        buses = config.buses.len(),
        tick_ms = config.tick_interval_ms,
        "Starting telemetry daemon"
    );

    run(config).await
}
