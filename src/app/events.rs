//! Outbound supervisor events.
//!
//! The orchestrator emits these through the
//! [`TransportLink`](super::ports::TransportLink) port. Field names
//! follow the supervisor's wire protocol (camelCase, `deviceID`-style
//! identifiers), so every struct serialises directly into an event
//! payload.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire channel names, one per outbound event.
pub mod channel {
    pub const SENSOR_DATA: &str = "sensor_data";
    pub const EXPERIMENT_STATUS: &str = "update_experiment_status";
    pub const EXPERIMENT_LOG: &str = "update_experiment_log";
    pub const PUMP_STATUS: &str = "update_pump_status";
    pub const REFRESH_DEVICE_DATA: &str = "refresh_device_data";
    pub const ERROR: &str = "error";
    /// Replayed experiment snapshots after a reconnect.
    pub const EXPERIMENT_BACKUP: &str = "experiment_backup";
}

/// Log severity as the supervisor understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Error,
}

/// Which dosing pump a status or command refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpKind {
    Acidic,
    Alkaline,
}

impl fmt::Display for PumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acidic => write!(f, "acidic"),
            Self::Alkaline => write!(f, "alkaline"),
        }
    }
}

/// One telemetry point on the wire: location id, experiment second, pH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub id: String,
    pub x: u64,
    pub y: f64,
}

/// `sensor_data` — one batch of readings from a single tick.
#[derive(Debug, Clone, Serialize)]
pub struct SensorDataEvent {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub data: Vec<SeriesPoint>,
}

/// `update_experiment_status` — the duration heartbeat.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExperimentStatusEvent {
    pub duration: u64,
}

/// `update_pump_status` — a pump opened or closed.
#[derive(Debug, Clone, Serialize)]
pub struct PumpStatusEvent {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub location: String,
    pub pump: PumpKind,
    pub status: bool,
}

/// `error` — a command or subsystem failure reported to the sender.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(rename = "deviceID")]
    pub device_id: String,
}
