//! Command router.
//!
//! The single dispatch surface for everything the supervisor sends:
//! configuration operations, lifecycle commands, and manual pump
//! toggles. Envelopes are validated before dispatch; configuration
//! routes live in a static table keyed by `(context, operation)` with a
//! declared positional-argument list each, so an unknown pair or a
//! missing argument fails with a descriptive error before any handler
//! runs. Every failure funnels into one `error` event plus a durable
//! error-log entry — a bad command never mutates state and never
//! crashes the process.

use std::sync::Arc;

use log::{error, info};
use serde_json::Value;

use crate::app::commands::{
    lifecycle, CommandEnvelope, ConfigContext, ConfigEnvelope, ConfigOperation,
    ResumeExperimentData, StartExperimentData, TogglePumpRequest,
};
use crate::app::events::channel;
use crate::config::{validate, ConfigStore};
use crate::error::{Error, Result, ValidationError};
use crate::experiment::{ExperimentCore, ExperimentOrchestrator};

// ───────────────────────────────────────────────────────────────
// Route table
// ───────────────────────────────────────────────────────────────

type Handler = fn(&mut ConfigStore, &[String], Value) -> Result<()>;

struct Route {
    context: ConfigContext,
    operation: ConfigOperation,
    /// Argument names extracted positionally from `data` before the
    /// handler runs.
    arg_names: &'static [&'static str],
    run: Handler,
}

static ROUTES: &[Route] = &[
    Route {
        context: ConfigContext::Device,
        operation: ConfigOperation::Read,
        arg_names: &[],
        run: device_read,
    },
    Route {
        context: ConfigContext::Device,
        operation: ConfigOperation::Update,
        arg_names: &[],
        run: device_update,
    },
    Route {
        context: ConfigContext::Configuration,
        operation: ConfigOperation::Create,
        arg_names: &[],
        run: configuration_create,
    },
    Route {
        context: ConfigContext::Configuration,
        operation: ConfigOperation::Update,
        arg_names: &["id"],
        run: configuration_update,
    },
    Route {
        context: ConfigContext::Configuration,
        operation: ConfigOperation::Delete,
        arg_names: &["configurationID"],
        run: configuration_delete,
    },
    Route {
        context: ConfigContext::Location,
        operation: ConfigOperation::Create,
        arg_names: &["configurationID"],
        run: location_create,
    },
    Route {
        context: ConfigContext::Location,
        operation: ConfigOperation::Update,
        arg_names: &["configurationID", "locationID"],
        run: location_update,
    },
    Route {
        context: ConfigContext::Location,
        operation: ConfigOperation::Delete,
        arg_names: &["configurationID", "locationID"],
        run: location_delete,
    },
    Route {
        context: ConfigContext::Sensor,
        operation: ConfigOperation::Create,
        arg_names: &["configurationID", "locationID"],
        run: sensor_create,
    },
    Route {
        context: ConfigContext::Sensor,
        operation: ConfigOperation::Update,
        arg_names: &["configurationID", "locationID", "sensorID"],
        run: sensor_update,
    },
    Route {
        context: ConfigContext::Sensor,
        operation: ConfigOperation::Delete,
        arg_names: &["configurationID", "locationID", "sensorID"],
        run: sensor_delete,
    },
];

fn device_read(_config: &mut ConfigStore, _args: &[String], _data: Value) -> Result<()> {
    // The refresh emitted after every route answers the read.
    Ok(())
}

fn device_update(config: &mut ConfigStore, _args: &[String], data: Value) -> Result<()> {
    config.update_device(data)
}

fn configuration_create(config: &mut ConfigStore, _args: &[String], data: Value) -> Result<()> {
    config.add_configuration(data)
}

fn configuration_update(config: &mut ConfigStore, args: &[String], data: Value) -> Result<()> {
    config.update_configuration(data, &args[0])
}

fn configuration_delete(config: &mut ConfigStore, args: &[String], _data: Value) -> Result<()> {
    config.delete_configuration(&args[0])
}

fn location_create(config: &mut ConfigStore, args: &[String], data: Value) -> Result<()> {
    config.add_location(data, &args[0])
}

fn location_update(config: &mut ConfigStore, args: &[String], data: Value) -> Result<()> {
    config.update_location(data, &args[0], &args[1])
}

fn location_delete(config: &mut ConfigStore, args: &[String], _data: Value) -> Result<()> {
    config.delete_location(&args[0], &args[1])
}

fn sensor_create(config: &mut ConfigStore, args: &[String], data: Value) -> Result<()> {
    config.add_sensor(data, &args[0], &args[1])
}

fn sensor_update(config: &mut ConfigStore, args: &[String], data: Value) -> Result<()> {
    config.update_sensor(data, &args[0], &args[1], &args[2])
}

fn sensor_delete(config: &mut ConfigStore, args: &[String], _data: Value) -> Result<()> {
    config.delete_sensor(&args[0], &args[1], &args[2])
}

// ───────────────────────────────────────────────────────────────
// Router
// ───────────────────────────────────────────────────────────────

pub struct CommandRouter {
    config: ConfigStore,
    orchestrator: ExperimentOrchestrator,
    reporter: Arc<ExperimentCore>,
}

impl CommandRouter {
    pub fn new(config: ConfigStore, orchestrator: ExperimentOrchestrator) -> Self {
        let reporter = orchestrator.reporter();
        Self {
            config,
            orchestrator,
            reporter,
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn orchestrator(&self) -> &ExperimentOrchestrator {
        &self.orchestrator
    }

    /// `updateDeviceConfig` — a configuration-operation envelope.
    pub fn handle_config_envelope(&mut self, payload: Value) {
        if let Err(e) = self.try_config_envelope(payload) {
            self.report(&e);
        }
    }

    /// `command` — an experiment lifecycle envelope.
    pub fn handle_command(&mut self, payload: Value) {
        if let Err(e) = self.try_command(payload) {
            self.report(&e);
        }
    }

    /// `toggle_pump` — a manual pump request.
    pub fn handle_toggle_pump(&mut self, payload: Value) {
        if let Err(e) = self.try_toggle_pump(payload) {
            self.report(&e);
        }
    }

    /// The transport reports a fresh connection: push the current tree
    /// and replay any snapshots written while the link was down.
    pub fn handle_connect(&mut self) {
        info!("link established, refreshing supervisor state");
        self.emit_refresh();
        self.orchestrator.replay_backups();
    }

    /// Orderly shutdown: stop any live experiment so the pins end up
    /// released and the state snapshot-clean.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.orchestrator.stop_experiment() {
            error!("shutdown: failed to stop experiment: {e}");
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn try_config_envelope(&mut self, payload: Value) -> Result<()> {
        validate::validate_command_envelope(&payload)?;
        let envelope: ConfigEnvelope = serde_json::from_value(payload)
            .map_err(|e| ValidationError::BadPayload(e.to_string()))?;

        let route = ROUTES
            .iter()
            .find(|r| r.context == envelope.context && r.operation == envelope.operation)
            .ok_or_else(|| {
                ValidationError::UnknownRoute(format!(
                    "{}|{}",
                    envelope.context.as_str(),
                    envelope.operation.as_str()
                ))
            })?;

        let args = extract_args(&envelope.data, route.arg_names)?;
        info!(
            "config operation {}|{}",
            envelope.context.as_str(),
            envelope.operation.as_str()
        );
        (route.run)(&mut self.config, &args, envelope.data)?;

        // Every configuration route answers with the fresh tree.
        self.emit_refresh();
        Ok(())
    }

    fn try_command(&mut self, payload: Value) -> Result<()> {
        if payload.get("cmd").and_then(Value::as_str).is_none() {
            return Err(ValidationError::MissingField("cmd").into());
        }
        let envelope: CommandEnvelope = serde_json::from_value(payload)
            .map_err(|e| ValidationError::BadPayload(e.to_string()))?;
        info!("lifecycle command {}", envelope.cmd);

        match envelope.cmd.as_str() {
            lifecycle::START_EXPERIMENT => {
                let data: StartExperimentData = serde_json::from_value(envelope.data)
                    .map_err(|e| ValidationError::BadPayload(e.to_string()))?;
                self.orchestrator.start_experiment(&self.config, data)
            }
            lifecycle::PAUSE_EXPERIMENT => self.orchestrator.pause_experiment(),
            lifecycle::RESUME_EXPERIMENT => {
                let data: ResumeExperimentData = serde_json::from_value(envelope.data)
                    .unwrap_or_default();
                self.orchestrator.resume_experiment(data)
            }
            lifecycle::STOP_EXPERIMENT => self.orchestrator.stop_experiment(),
            other => Err(ValidationError::UnknownCommand(other.to_string()).into()),
        }
    }

    fn try_toggle_pump(&mut self, payload: Value) -> Result<()> {
        let request: TogglePumpRequest = serde_json::from_value(payload)
            .map_err(|e| ValidationError::BadPayload(e.to_string()))?;
        self.orchestrator.toggle_pump(&request)
    }

    fn emit_refresh(&self) {
        self.reporter
            .emit(channel::REFRESH_DEVICE_DATA, &self.config.tree());
    }

    fn report(&self, err: &Error) {
        error!("command failed: {err}");
        self.reporter.report_error(&err.to_string());
    }
}

/// Pull the route's declared arguments out of `data`, in order.
fn extract_args(data: &Value, names: &'static [&'static str]) -> Result<Vec<String>> {
    names
        .iter()
        .map(|name| {
            data.get(*name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Validation(ValidationError::MissingArgument(name)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{
        MemoryBackupStore, MemoryConfigPersistence, MockAnalogDriver, MockPinDriver,
        MockTransportLink,
    };
    use crate::config::pinmap::InputPinMap;
    use crate::experiment::OrchestratorDeps;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        router: CommandRouter,
        link: Arc<MockTransportLink>,
    }

    fn fixture() -> Fixture {
        let link = Arc::new(MockTransportLink::connected());
        let config = ConfigStore::open(Box::new(MemoryConfigPersistence::new()));
        let device_id = config.device().id.clone();
        let orchestrator = ExperimentOrchestrator::new(
            device_id,
            InputPinMap::default(),
            OrchestratorDeps {
                link: Arc::clone(&link) as _,
                backup: Arc::new(MemoryBackupStore::new()) as _,
                pins: Arc::new(MockPinDriver::new()) as _,
                analog: Arc::new(MockAnalogDriver::constant(20_000.0)) as _,
            },
        );
        Fixture {
            router: CommandRouter::new(config, orchestrator),
            link,
        }
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
                "sensors": [{
                    "id": "s1",
                    "mode": "auto",
                    "margin": 0.1,
                    "maxValveTimeOpen": 30.0,
                    "targetPh": 7.0,
                    "devicePort": "i1",
                    "phMonitorFrequency": 10,
                    "createdAt": "2026-01-01T00:00:00Z"
                }]
            }]
        })
    }

    #[test]
    fn create_and_delete_route_through_the_table() {
        let mut f = fixture();
        f.router.handle_config_envelope(json!({
            "context": "configuration",
            "operation": "create",
            "data": configuration_json("c1")
        }));
        assert_eq!(f.router.config().device().configurations.len(), 1);

        f.router.handle_config_envelope(json!({
            "context": "sensor",
            "operation": "delete",
            "data": {"configurationID": "c1", "locationID": "l1", "sensorID": "s1"}
        }));
        let sensors = &f.router.config().device().configurations[0].locations[0].sensors;
        assert!(sensors.is_empty());
        assert!(f.link.events_on(channel::ERROR).is_empty());
    }

    #[test]
    fn every_config_route_refreshes_the_tree() {
        let mut f = fixture();
        f.router.handle_config_envelope(json!({
            "context": "device",
            "operation": "read",
            "data": {}
        }));
        let refreshes = f.link.events_on(channel::REFRESH_DEVICE_DATA);
        assert_eq!(refreshes.len(), 1);
        assert_eq!(refreshes[0]["status"], "ready");

        f.router.handle_config_envelope(json!({
            "context": "configuration",
            "operation": "create",
            "data": configuration_json("c1")
        }));
        let refreshes = f.link.events_on(channel::REFRESH_DEVICE_DATA);
        assert_eq!(refreshes.len(), 2);
        assert_eq!(refreshes[1]["configurations"][0]["id"], "c1");
    }

    #[test]
    fn unknown_route_reports_an_error() {
        let mut f = fixture();
        f.router.handle_config_envelope(json!({
            "context": "device",
            "operation": "delete",
            "data": {}
        }));
        let errors = f.link.events_on(channel::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("device|delete"));
        // Failed routes do not refresh.
        assert!(f.link.events_on(channel::REFRESH_DEVICE_DATA).is_empty());
    }

    #[test]
    fn invalid_envelope_shape_reports_an_error() {
        let mut f = fixture();
        f.router
            .handle_config_envelope(json!({"context": "warehouse", "operation": "read", "data": {}}));
        f.router.handle_config_envelope(json!({"operation": "read", "data": {}}));
        assert_eq!(f.link.events_on(channel::ERROR).len(), 2);
    }

    #[test]
    fn missing_positional_argument_reports_an_error() {
        let mut f = fixture();
        f.router.handle_config_envelope(json!({
            "context": "location",
            "operation": "update",
            "data": {"configurationID": "c1", "name": "renamed"}
        }));
        let errors = f.link.events_on(channel::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("locationID"));
    }

    #[test]
    fn validation_failure_mutates_nothing() {
        let mut f = fixture();
        let mut bad = configuration_json("c1");
        bad["locations"][0]["sensors"][0]["targetPh"] = json!(20.0);
        f.router.handle_config_envelope(json!({
            "context": "configuration",
            "operation": "create",
            "data": bad
        }));
        assert!(f.router.config().device().configurations.is_empty());
        assert_eq!(f.link.events_on(channel::ERROR).len(), 1);
    }

    #[test]
    fn unknown_lifecycle_command_reports_an_error() {
        let mut f = fixture();
        f.router
            .handle_command(json!({"cmd": "restartExperiment", "data": {}}));
        let errors = f.link.events_on(channel::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("restartExperiment"));
    }

    #[test]
    fn lifecycle_round_trip_through_the_router() {
        let mut f = fixture();
        f.router.handle_config_envelope(json!({
            "context": "configuration",
            "operation": "create",
            "data": configuration_json("c1")
        }));
        f.router.handle_command(json!({
            "cmd": "startExperiment",
            "data": {"configurationID": "c1", "dataAcquisitionInterval": 5}
        }));
        assert_eq!(
            f.router.orchestrator().phase(),
            crate::experiment::ExperimentPhase::Running
        );

        f.router.handle_command(json!({"cmd": "pauseExperiment", "data": {}}));
        assert_eq!(
            f.router.orchestrator().phase(),
            crate::experiment::ExperimentPhase::Paused
        );

        f.router.handle_command(json!({"cmd": "stopExperiment", "data": {}}));
        assert_eq!(
            f.router.orchestrator().phase(),
            crate::experiment::ExperimentPhase::Ready
        );
        assert!(f.link.events_on(channel::ERROR).is_empty());
    }

    #[test]
    fn start_against_unknown_configuration_reports_not_found() {
        let mut f = fixture();
        f.router.handle_command(json!({
            "cmd": "startExperiment",
            "data": {"configurationID": "ghost", "dataAcquisitionInterval": 5}
        }));
        let errors = f.link.events_on(channel::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("more than one configuration"));
    }

    #[test]
    fn connect_refreshes_tree() {
        let mut f = fixture();
        f.router.handle_connect();
        assert_eq!(f.link.events_on(channel::REFRESH_DEVICE_DATA).len(), 1);
    }
}
