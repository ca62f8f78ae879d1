//! Device configuration store.
//!
//! Owns the device → configuration → location → sensor tree and every
//! mutation of it. Creates validate first and fail fast; updates strip
//! a fixed list of immutable fields before merging; every successful
//! mutation re-serialises the whole tree through the persistence port
//! (write-through — a failed write is logged, and memory stays the
//! source of truth until the next successful one).
//!
//! Lookups are linear scans: the tree is capped at 3 configurations and
//! a handful of locations/sensors each, so indexing would buy nothing.

pub mod model;
pub mod pinmap;
pub mod validate;

use log::{info, warn};
use serde_json::Value;

use crate::app::ports::ConfigPersistence;
use crate::error::{Error, Result, ValidationError};
use model::{
    ConfigurationUpdate, DeviceConfig, DeviceConfiguration, DeviceUpdate, Location,
    LocationUpdate, Sensor, SensorUpdate,
};

/// Immutable fields stripped from update payloads, per entity.
const FORBIDDEN_DEVICE_FIELDS: &[&str] = &["id", "createdAt", "status", "configurations"];
const FORBIDDEN_CONFIGURATION_FIELDS: &[&str] = &["id", "createdAt", "locations"];
const FORBIDDEN_LOCATION_FIELDS: &[&str] = &["id", "createdAt", "sensors"];
const FORBIDDEN_SENSOR_FIELDS: &[&str] = &["id", "createdAt"];

pub struct ConfigStore {
    device: DeviceConfig,
    persistence: Box<dyn ConfigPersistence>,
}

impl ConfigStore {
    /// Load the stored tree, or create and persist the first-boot tree.
    pub fn open(persistence: Box<dyn ConfigPersistence>) -> Self {
        let device = match persistence.load() {
            Ok(Some(device)) => device,
            Ok(None) => {
                info!("no stored configuration, creating first-boot tree");
                let device = DeviceConfig::first_boot();
                if let Err(e) = persistence.save(&device) {
                    warn!("failed to persist first-boot configuration: {e}");
                }
                device
            }
            Err(e) => {
                warn!("failed to load configuration, starting from first-boot tree: {e}");
                DeviceConfig::first_boot()
            }
        };
        Self {
            device,
            persistence,
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    /// The whole tree as JSON, for `refresh_device_data` payloads.
    pub fn tree(&self) -> Value {
        serde_json::to_value(&self.device).unwrap_or(Value::Null)
    }

    /// Every configuration matching the id. The caller decides whether
    /// zero or multiple matches is an error.
    pub fn configurations_by_id(&self, id: &str) -> Vec<&DeviceConfiguration> {
        self.device
            .configurations
            .iter()
            .filter(|c| c.id == id)
            .collect()
    }

    // ── Device ────────────────────────────────────────────────

    pub fn update_device(&mut self, mut data: Value) -> Result<()> {
        strip_forbidden(&mut data, FORBIDDEN_DEVICE_FIELDS);
        let update: DeviceUpdate = decode(data)?;
        if let Some(name) = update.name {
            self.device.name = name;
        }
        self.persist();
        Ok(())
    }

    // ── Configurations ────────────────────────────────────────

    pub fn add_configuration(&mut self, data: Value) -> Result<()> {
        validate::validate_device_configuration(&data)?;
        let configuration: DeviceConfiguration = decode(data)?;
        if self
            .device
            .configurations
            .iter()
            .any(|c| c.id == configuration.id)
        {
            return Err(ValidationError::DuplicateId(configuration.id).into());
        }
        self.device
            .configurations
            .push(configuration)
            .map_err(|_| Error::Validation(ValidationError::ConfigurationLimit))?;
        self.persist();
        Ok(())
    }

    pub fn update_configuration(&mut self, mut data: Value, id: &str) -> Result<()> {
        strip_forbidden(&mut data, FORBIDDEN_CONFIGURATION_FIELDS);
        let update: ConfigurationUpdate = decode(data)?;
        let configuration = self.configuration_mut(id)?;
        if let Some(name) = update.name {
            configuration.name = name;
        }
        self.persist();
        Ok(())
    }

    pub fn delete_configuration(&mut self, id: &str) -> Result<()> {
        let index = self
            .device
            .configurations
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("configuration {id} not found")))?;
        self.device.configurations.remove(index);
        self.persist();
        Ok(())
    }

    // ── Locations ─────────────────────────────────────────────

    pub fn add_location(&mut self, data: Value, configuration_id: &str) -> Result<()> {
        validate::validate_location(&data)?;
        let location: Location = decode(data)?;
        let configuration = self.configuration_mut(configuration_id)?;
        if configuration.locations.iter().any(|l| l.id == location.id) {
            return Err(ValidationError::DuplicateId(location.id).into());
        }
        configuration.locations.push(location);
        self.persist();
        Ok(())
    }

    pub fn update_location(
        &mut self,
        mut data: Value,
        configuration_id: &str,
        location_id: &str,
    ) -> Result<()> {
        strip_forbidden(&mut data, FORBIDDEN_LOCATION_FIELDS);
        let update: LocationUpdate = decode(data)?;
        let location = self.location_mut(configuration_id, location_id)?;
        if let Some(name) = update.name {
            location.name = name;
        }
        self.persist();
        Ok(())
    }

    pub fn delete_location(&mut self, configuration_id: &str, location_id: &str) -> Result<()> {
        let configuration = self.configuration_mut(configuration_id)?;
        let index = configuration
            .locations
            .iter()
            .position(|l| l.id == location_id)
            .ok_or_else(|| Error::NotFound(format!("location {location_id} not found")))?;
        configuration.locations.remove(index);
        self.persist();
        Ok(())
    }

    // ── Sensors ───────────────────────────────────────────────

    pub fn add_sensor(
        &mut self,
        data: Value,
        configuration_id: &str,
        location_id: &str,
    ) -> Result<()> {
        validate::validate_sensor(&data)?;
        let sensor: Sensor = decode(data)?;
        let location = self.location_mut(configuration_id, location_id)?;
        if location.sensors.iter().any(|s| s.id == sensor.id) {
            return Err(ValidationError::DuplicateId(sensor.id).into());
        }
        location.sensors.push(sensor);
        self.persist();
        Ok(())
    }

    pub fn update_sensor(
        &mut self,
        mut data: Value,
        configuration_id: &str,
        location_id: &str,
        sensor_id: &str,
    ) -> Result<()> {
        strip_forbidden(&mut data, FORBIDDEN_SENSOR_FIELDS);
        validate::validate_sensor_update(&data)?;
        let update: SensorUpdate = decode(data)?;
        let sensor = self.sensor_mut(configuration_id, location_id, sensor_id)?;
        sensor.apply(update);
        self.persist();
        Ok(())
    }

    pub fn delete_sensor(
        &mut self,
        configuration_id: &str,
        location_id: &str,
        sensor_id: &str,
    ) -> Result<()> {
        let location = self.location_mut(configuration_id, location_id)?;
        let index = location
            .sensors
            .iter()
            .position(|s| s.id == sensor_id)
            .ok_or_else(|| Error::NotFound(format!("sensor {sensor_id} not found")))?;
        location.sensors.remove(index);
        self.persist();
        Ok(())
    }

    // ── Internal ──────────────────────────────────────────────

    fn configuration_mut(&mut self, id: &str) -> Result<&mut DeviceConfiguration> {
        self.device
            .configurations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("configuration {id} not found")))
    }

    fn location_mut(&mut self, configuration_id: &str, location_id: &str) -> Result<&mut Location> {
        self.configuration_mut(configuration_id)?
            .locations
            .iter_mut()
            .find(|l| l.id == location_id)
            .ok_or_else(|| Error::NotFound(format!("location {location_id} not found")))
    }

    fn sensor_mut(
        &mut self,
        configuration_id: &str,
        location_id: &str,
        sensor_id: &str,
    ) -> Result<&mut Sensor> {
        self.location_mut(configuration_id, location_id)?
            .sensors
            .iter_mut()
            .find(|s| s.id == sensor_id)
            .ok_or_else(|| Error::NotFound(format!("sensor {sensor_id} not found")))
    }

    /// Write-through. Failure is logged, never propagated: the command
    /// has already mutated memory and memory stays authoritative.
    fn persist(&mut self) {
        if let Err(e) = self.persistence.save(&self.device) {
            warn!("failed to persist configuration tree: {e}");
        }
    }
}

/// Remove immutable fields from an update payload, logging each one.
fn strip_forbidden(data: &mut Value, forbidden: &[&str]) {
    if let Some(object) = data.as_object_mut() {
        for key in forbidden {
            if object.remove(*key).is_some() {
                info!("update payload carries immutable field {key}, dropping it");
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::Validation(ValidationError::BadPayload(e.to_string())))
}
