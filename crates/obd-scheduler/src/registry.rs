//! Vehicle registry
//!
//! Built once at startup and shared with the poller task. Codes are
//! case-insensitive.

use crate::error::RegistryError;
use crate::vehicle::VehicleModule;
use obd_protocol::PollTable;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Constructor for a vehicle module
pub type VehicleFactory = fn() -> Box<dyn VehicleModule>;

struct Registration {
    name: &'static str,
    factory: VehicleFactory,
}

/// Vehicle modules by short code
#[derive(Default)]
pub struct VehicleRegistry {
    vehicles: BTreeMap<String, Registration>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vehicle module under `code`
    pub fn register(
        &mut self,
        code: &str,
        name: &'static str,
        factory: VehicleFactory,
    ) -> Result<(), RegistryError> {
        let key = code.to_ascii_uppercase();
        if self.vehicles.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        debug!(code = %key, name, "Registered vehicle");
        self.vehicles.insert(key, Registration { name, factory });
        Ok(())
    }

    /// Create the module for `code` and validate its poll table
    pub fn create(
        &self,
        code: &str,
    ) -> Result<(Box<dyn VehicleModule>, Option<Arc<PollTable>>), RegistryError> {
        let key = code.to_ascii_uppercase();
        let registration = self
            .vehicles
            .get(&key)
            .ok_or_else(|| RegistryError::UnknownVehicle(key.clone()))?;

        let vehicle = (registration.factory)();
        let rows = vehicle.poll_rows();
        let table = if rows.is_empty() {
            None
        } else {
            let table = PollTable::new(rows).map_err(|source| RegistryError::InvalidTable {
                code: key.clone(),
                source,
            })?;
            Some(Arc::new(table))
        };
        Ok((vehicle, table))
    }

    /// Display name for `code`
    pub fn name(&self, code: &str) -> Option<&'static str> {
        self.vehicles
            .get(&code.to_ascii_uppercase())
            .map(|registration| registration.name)
    }

    /// Registered codes in sorted order
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.vehicles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}
