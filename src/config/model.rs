//! The device configuration tree and its partial-update forms.
//!
//! Device → configurations → locations → sensors. Ids and `createdAt`
//! stamps are assigned by whoever creates a record and are immutable
//! afterwards; updates arrive as all-optional structs merged field by
//! field after the immutable keys have been stripped.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::events::PumpKind;

/// Hard cap on configurations per device; enforced by the collection
/// type itself — a fourth push fails.
pub const MAX_DEVICE_CONFIGURATIONS: usize = 3;

// ───────────────────────────────────────────────────────────────
// Tree records
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Ready,
    Running,
    /// Reserved; not reachable through the command set.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub status: DeviceStatus,
    pub configurations: heapless::Vec<DeviceConfiguration, MAX_DEVICE_CONFIGURATIONS>,
}

impl DeviceConfig {
    /// The tree written on first boot, before any supervisor contact.
    pub fn first_boot() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "pH Monitor Device".to_string(),
            created_at: Utc::now().to_rfc3339(),
            status: DeviceStatus::Ready,
            configurations: heapless::Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfiguration {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub locations: Vec<Location>,
}

/// A physical reservoir with one wired pH probe and two dosing pumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub sensors: Vec<Sensor>,
}

impl Location {
    /// The sensor wired to the control loop. Only the first is driven;
    /// additional records are stored but inert.
    pub fn active_sensor(&self) -> Option<&Sensor> {
        self.sensors.first()
    }
}

/// Which direction(s) of correction a controller may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    Acidic,
    Alkaline,
    Auto,
}

impl SensorMode {
    /// Whether this mode permits driving the given pump.
    pub fn allows(self, pump: PumpKind) -> bool {
        match (self, pump) {
            (Self::Auto, _) => true,
            (Self::Acidic, PumpKind::Acidic) | (Self::Alkaline, PumpKind::Alkaline) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: String,
    pub mode: SensorMode,
    /// Tolerance band around the target; no actuation inside it.
    pub margin: f64,
    /// Upper bound on a single pump window, seconds.
    pub max_valve_time_open: f64,
    pub target_ph: f64,
    /// Logical input id (`i1..i4`) resolved through the input pin map.
    #[serde(alias = "probePort")]
    pub device_port: String,
    /// Decision cadence, seconds.
    #[serde(alias = "checkInterval")]
    pub ph_monitor_frequency: u32,
    pub created_at: String,
}

// ───────────────────────────────────────────────────────────────
// Partial updates
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigurationUpdate {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationUpdate {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorUpdate {
    pub mode: Option<SensorMode>,
    pub margin: Option<f64>,
    pub max_valve_time_open: Option<f64>,
    pub target_ph: Option<f64>,
    #[serde(alias = "probePort")]
    pub device_port: Option<String>,
    #[serde(alias = "checkInterval")]
    pub ph_monitor_frequency: Option<u32>,
}

impl Sensor {
    /// Merge an update field by field; absent fields leave the record
    /// untouched. Range validation happens before this is called.
    pub fn apply(&mut self, update: SensorUpdate) {
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(margin) = update.margin {
            self.margin = margin;
        }
        if let Some(max_open) = update.max_valve_time_open {
            self.max_valve_time_open = max_open;
        }
        if let Some(target) = update.target_ph {
            self.target_ph = target;
        }
        if let Some(port) = update.device_port {
            self.device_port = port;
        }
        if let Some(freq) = update.ph_monitor_frequency {
            self.ph_monitor_frequency = freq;
        }
    }
}
