//! Inbound commands from the supervisor.
//!
//! Two envelope families arrive over the link: configuration operations
//! (`{context, operation, data}`) and experiment lifecycle commands
//! (`{cmd, data}`). A third inbound event, `toggle_pump`, carries a
//! manual pump request. The router validates shape before anything here
//! is decoded, so these types stay free of defensive checks.

use serde::Deserialize;
use serde_json::Value;

use crate::app::events::PumpKind;
use crate::config::model::Sensor;

// ───────────────────────────────────────────────────────────────
// Configuration-operation envelope
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigContext {
    Device,
    Configuration,
    Location,
    Sensor,
}

impl ConfigContext {
    pub const ALL: [&'static str; 4] = ["device", "configuration", "location", "sensor"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Configuration => "configuration",
            Self::Location => "location",
            Self::Sensor => "sensor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOperation {
    Create,
    Read,
    Update,
    Delete,
}

impl ConfigOperation {
    pub const ALL: [&'static str; 4] = ["create", "read", "update", "delete"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// `{context, operation, data}` — mutates the device configuration tree.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigEnvelope {
    pub context: ConfigContext,
    pub operation: ConfigOperation,
    pub data: Value,
}

// ───────────────────────────────────────────────────────────────
// Lifecycle commands
// ───────────────────────────────────────────────────────────────

/// Lifecycle command names as they appear in the `cmd` field.
pub mod lifecycle {
    pub const START_EXPERIMENT: &str = "startExperiment";
    pub const PAUSE_EXPERIMENT: &str = "pauseExperiment";
    pub const RESUME_EXPERIMENT: &str = "resumeExperiment";
    pub const STOP_EXPERIMENT: &str = "stopExperiment";
}

/// `{cmd, data}` — drives the experiment state machine.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub cmd: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload of `startExperiment`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExperimentData {
    #[serde(rename = "configurationID")]
    pub configuration_id: String,
    pub data_acquisition_interval: u32,
    #[serde(rename = "projectID", default)]
    pub project_id: Option<String>,
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
}

/// Payload of `resumeExperiment`. The interval is accepted for wire
/// compatibility but the cadence stored at start wins.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeExperimentData {
    #[serde(default)]
    pub data_acquisition_interval: Option<u32>,
}

// ───────────────────────────────────────────────────────────────
// Manual pump toggle
// ───────────────────────────────────────────────────────────────

/// `toggle_pump` — operator-initiated open/close, independent of the
/// regulation decision. Carries the full selected location so a pump
/// can be driven even when no experiment is live.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TogglePumpRequest {
    pub selected_location: SelectedLocation,
    pub pump: PumpKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedLocation {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_acid_pumping: bool,
    #[serde(default)]
    pub is_base_pumping: bool,
    pub sensors: Vec<Sensor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_envelope_decodes() {
        let envelope: ConfigEnvelope = serde_json::from_value(json!({
            "context": "sensor",
            "operation": "delete",
            "data": {"configurationID": "c1", "locationID": "l1", "sensorID": "s1"}
        }))
        .unwrap();
        assert_eq!(envelope.context, ConfigContext::Sensor);
        assert_eq!(envelope.operation, ConfigOperation::Delete);
        assert_eq!(envelope.data["sensorID"], "s1");
    }

    #[test]
    fn start_data_reads_wire_ids() {
        let data: StartExperimentData = serde_json::from_value(json!({
            "configurationID": "c1",
            "dataAcquisitionInterval": 5,
            "projectID": "p1",
            "userID": "u1"
        }))
        .unwrap();
        assert_eq!(data.configuration_id, "c1");
        assert_eq!(data.data_acquisition_interval, 5);
        assert_eq!(data.project_id.as_deref(), Some("p1"));
    }

    #[test]
    fn toggle_request_defaults_pump_flags() {
        let req: TogglePumpRequest = serde_json::from_value(json!({
            "selectedLocation": {"name": "Tank A", "sensors": []},
            "pump": "acidic"
        }))
        .unwrap();
        assert_eq!(req.pump, PumpKind::Acidic);
        assert!(!req.selected_location.is_acid_pumping);
        assert!(req.selected_location.id.is_none());
    }
}
