//! Integration tests: command envelopes → router → config tree →
//! outbound events.

use std::sync::Arc;

use serde_json::{json, Value};

use phdose::adapters::mock::{
    MemoryBackupStore, MemoryConfigPersistence, MockAnalogDriver, MockPinDriver,
    MockTransportLink,
};
use phdose::app::events::channel;
use phdose::config::pinmap::InputPinMap;
use phdose::config::ConfigStore;
use phdose::experiment::{ExperimentOrchestrator, OrchestratorDeps};
use phdose::rpc::CommandRouter;

struct Rig {
    router: CommandRouter,
    link: Arc<MockTransportLink>,
    pins: Arc<MockPinDriver>,
}

fn rig() -> Rig {
    let link = Arc::new(MockTransportLink::connected());
    let pins = Arc::new(MockPinDriver::new());
    let config = ConfigStore::open(Box::new(MemoryConfigPersistence::new()));
    let device_id = config.device().id.clone();
    let orchestrator = ExperimentOrchestrator::new(
        device_id,
        InputPinMap::default(),
        OrchestratorDeps {
            link: Arc::clone(&link) as _,
            backup: Arc::new(MemoryBackupStore::new()) as _,
            pins: Arc::clone(&pins) as _,
            analog: Arc::new(MockAnalogDriver::constant(20_000.0)) as _,
        },
    );
    Rig {
        router: CommandRouter::new(config, orchestrator),
        link,
        pins,
    }
}

fn sensor_json(id: &str) -> Value {
    json!({
        "id": id,
        "mode": "auto",
        "margin": 0.1,
        "maxValveTimeOpen": 30.0,
        "targetPh": 7.0,
        "devicePort": "i1",
        "phMonitorFrequency": 10,
        "createdAt": "2026-01-01T00:00:00Z"
    })
}

fn configuration_json(id: &str) -> Value {
    json!({
        "id": id,
        "name": "Batch",
        "createdAt": "2026-01-01T00:00:00Z",
        "locations": [{
            "id": "l1",
            "name": "Tank A",
            "createdAt": "2026-01-01T00:00:00Z",
            "sensors": [sensor_json("s1")]
        }]
    })
}

fn envelope(context: &str, operation: &str, data: Value) -> Value {
    json!({"context": context, "operation": operation, "data": data})
}

#[test]
fn sensor_delete_updates_tree_and_refreshes() {
    let mut rig = rig();
    rig.router
        .handle_config_envelope(envelope("configuration", "create", configuration_json("c1")));

    rig.router.handle_config_envelope(envelope(
        "sensor",
        "delete",
        json!({"configurationID": "c1", "locationID": "l1", "sensorID": "s1"}),
    ));

    // The stored tree no longer contains the sensor.
    let sensors = &rig.router.config().device().configurations[0].locations[0].sensors;
    assert!(sensors.iter().all(|s| s.id != "s1"));

    // A refresh event carrying the new tree went out.
    let refreshes = rig.link.events_on(channel::REFRESH_DEVICE_DATA);
    let last = refreshes.last().unwrap();
    assert_eq!(
        last["configurations"][0]["locations"][0]["sensors"],
        json!([])
    );
    assert!(rig.link.events_on(channel::ERROR).is_empty());
}

#[test]
fn update_cannot_forge_identity_fields() {
    let mut rig = rig();
    rig.router
        .handle_config_envelope(envelope("configuration", "create", configuration_json("c1")));

    rig.router.handle_config_envelope(envelope(
        "sensor",
        "update",
        json!({
            "configurationID": "c1",
            "locationID": "l1",
            "sensorID": "s1",
            "id": "forged",
            "createdAt": "1999-01-01T00:00:00Z",
            "margin": 0.5
        }),
    ));

    let sensor = &rig.router.config().device().configurations[0].locations[0].sensors[0];
    assert_eq!(sensor.id, "s1");
    assert_eq!(sensor.created_at, "2026-01-01T00:00:00Z");
    assert_eq!(sensor.margin, 0.5);
}

#[test]
fn fourth_configuration_is_rejected_and_reported() {
    let mut rig = rig();
    for id in ["c1", "c2", "c3"] {
        rig.router
            .handle_config_envelope(envelope("configuration", "create", configuration_json(id)));
    }
    assert!(rig.link.events_on(channel::ERROR).is_empty());

    rig.router
        .handle_config_envelope(envelope("configuration", "create", configuration_json("c4")));

    assert_eq!(rig.router.config().device().configurations.len(), 3);
    let errors = rig.link.events_on(channel::ERROR);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["message"]
        .as_str()
        .unwrap()
        .contains("maximum number of configurations"));
}

#[test]
fn out_of_range_sensor_create_reports_and_leaves_tree_alone() {
    let mut rig = rig();
    rig.router
        .handle_config_envelope(envelope("configuration", "create", configuration_json("c1")));

    let mut bad = sensor_json("s2");
    bad["margin"] = json!(3.0);
    rig.router.handle_config_envelope(envelope(
        "sensor",
        "create",
        {
            let mut data = bad;
            data["configurationID"] = json!("c1");
            data["locationID"] = json!("l1");
            data
        },
    ));

    let sensors = &rig.router.config().device().configurations[0].locations[0].sensors;
    assert_eq!(sensors.len(), 1);
    assert_eq!(rig.link.events_on(channel::ERROR).len(), 1);
}

#[test]
fn toggle_pump_event_drives_pin_and_reports_status() {
    let mut rig = rig();
    rig.router.handle_toggle_pump(json!({
        "selectedLocation": {
            "id": "l1",
            "name": "Tank A",
            "isAcidPumping": false,
            "isBasePumping": false,
            "sensors": [sensor_json("s1")]
        },
        "pump": "acidic"
    }));

    assert_eq!(
        rig.pins.level(17),
        Some(phdose::app::ports::PinLevel::High)
    );
    let statuses = rig.link.events_on(channel::PUMP_STATUS);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["location"], "Tank A");
    assert_eq!(statuses[0]["pump"], "acidic");
    assert_eq!(statuses[0]["status"], true);
}

#[test]
fn write_through_lands_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device_config.json");
    let link = Arc::new(MockTransportLink::connected());
    let config = ConfigStore::open(Box::new(
        phdose::adapters::fs_store::FileConfigStore::new(&path),
    ));
    let device_id = config.device().id.clone();
    let orchestrator = ExperimentOrchestrator::new(
        device_id.clone(),
        InputPinMap::default(),
        OrchestratorDeps {
            link: Arc::clone(&link) as _,
            backup: Arc::new(MemoryBackupStore::new()) as _,
            pins: Arc::new(MockPinDriver::new()) as _,
            analog: Arc::new(MockAnalogDriver::constant(20_000.0)) as _,
        },
    );
    let mut router = CommandRouter::new(config, orchestrator);

    router.handle_config_envelope(envelope("configuration", "create", configuration_json("c1")));

    let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk["id"], device_id.as_str());
    assert_eq!(on_disk["configurations"][0]["id"], "c1");
}
