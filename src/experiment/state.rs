//! Experiment state — the blackboard the whole run writes into and the
//! exact shape of a durable snapshot.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::app::events::LogKind;
use crate::config::model::DeviceStatus;

/// One telemetry point inside a location's buffer: experiment second
/// and pH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: u64,
    pub y: f64,
}

/// One location's in-memory telemetry buffer, cleared after every
/// snapshot so memory stays bounded however long the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSeries {
    pub id: String,
    pub data: Vec<DataPoint>,
}

/// A log line: emitted immediately and retained until the next
/// snapshot clears the buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub desc: String,
    pub created_at: String,
    pub location: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, desc: &str, location: &str) -> Self {
        Self {
            kind,
            desc: desc.to_string(),
            created_at: Utc::now().to_rfc3339(),
            location: location.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentState {
    pub duration: u64,
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(rename = "projectID")]
    pub project_id: Option<String>,
    pub data_acquisition_interval: Option<u32>,
    #[serde(rename = "configurationID")]
    pub configuration_id: Option<String>,
    #[serde(rename = "userID")]
    pub user_id: Option<String>,
    pub status: DeviceStatus,
    pub locations: Vec<LocationSeries>,
    pub logs: Vec<LogEntry>,
    pub created_at: Option<String>,
}

impl ExperimentState {
    /// The empty Ready shape: what exists before a run and what `stop`
    /// always returns to.
    pub fn initial(device_id: &str) -> Self {
        Self {
            duration: 0,
            device_id: device_id.to_string(),
            project_id: None,
            data_acquisition_interval: None,
            configuration_id: None,
            user_id: None,
            status: DeviceStatus::Ready,
            locations: Vec::new(),
            logs: Vec::new(),
            created_at: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::initial(&self.device_id);
    }

    /// Drop buffered telemetry and logs after a snapshot; the location
    /// slots themselves survive so later points land in the right one.
    pub fn clear_buffers(&mut self) {
        for series in &mut self.locations {
            series.data.clear();
        }
        self.logs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_shape_is_empty_and_ready() {
        let state = ExperimentState::initial("dev-1");
        assert_eq!(state.duration, 0);
        assert_eq!(state.status, DeviceStatus::Ready);
        assert!(state.locations.is_empty());
        assert!(state.logs.is_empty());
        assert!(state.created_at.is_none());
    }

    #[test]
    fn reset_returns_to_initial_regardless_of_contents() {
        let mut state = ExperimentState::initial("dev-1");
        state.duration = 42;
        state.status = DeviceStatus::Running;
        state.locations.push(LocationSeries {
            id: "l1".into(),
            data: vec![DataPoint { x: 1, y: 7.0 }],
        });
        state.logs.push(LogEntry::new(LogKind::Info, "x", "Device"));
        state.reset();
        assert_eq!(state, ExperimentState::initial("dev-1"));
    }

    #[test]
    fn clear_buffers_keeps_location_slots() {
        let mut state = ExperimentState::initial("dev-1");
        state.locations.push(LocationSeries {
            id: "l1".into(),
            data: vec![DataPoint { x: 1, y: 7.0 }],
        });
        state.logs.push(LogEntry::new(LogKind::Info, "x", "Device"));
        state.clear_buffers();
        assert_eq!(state.locations.len(), 1);
        assert!(state.locations[0].data.is_empty());
        assert!(state.logs.is_empty());
    }

    #[test]
    fn snapshot_wire_shape() {
        let state = ExperimentState::initial("dev-1");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["deviceID"], "dev-1");
        assert_eq!(json["status"], "ready");
        assert!(json["dataAcquisitionInterval"].is_null());
    }
}
