//! Built-in vehicle modules

pub mod obdii;
pub mod uds_demo;

use obd_scheduler::{RegistryError, VehicleRegistry};

/// Registry holding every vehicle module shipped with the daemon
pub fn builtin_registry() -> Result<VehicleRegistry, RegistryError> {
    let mut registry = VehicleRegistry::new();
    registry.register(obdii::CODE, "Generic OBD-II", obdii::create)?;
    registry.register(uds_demo::CODE, "UDS battery demo", uds_demo::create)?;
    Ok(registry)
}
