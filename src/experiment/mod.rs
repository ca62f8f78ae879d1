//! Experiment orchestration.
//!
//! The top-level state machine over a run: ready → running → paused →
//! running → ready. Owns the experiment blackboard, the scheduler that
//! drives the actuators, and the durable snapshot cadence that stands
//! in for per-event replay while the link is down.
//!
//! Split in two: [`ExperimentCore`] is the shared half the loop thread
//! and actuation workers report into (it implements [`ControlSink`]);
//! [`ExperimentOrchestrator`] is the single-threaded command-path
//! facade that drives lifecycle transitions.

pub mod state;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::app::commands::{ResumeExperimentData, StartExperimentData, TogglePumpRequest};
use crate::app::events::{
    channel, ErrorEvent, ExperimentStatusEvent, LogKind, PumpKind, PumpStatusEvent,
    SensorDataEvent, SeriesPoint,
};
use crate::app::ports::{AnalogDriver, BackupStore, ControlSink, LocationReading, PinDriver,
    TransportLink};
use crate::config::model::{DeviceStatus, Location};
use crate::config::pinmap::InputPinMap;
use crate::config::ConfigStore;
use crate::control::{ControlDeps, ControlScheduler};
use crate::error::{Error, Result, ValidationError};
use crate::sync::lock;
use state::{DataPoint, ExperimentState, LocationSeries, LogEntry};

/// Duration ticks between durable snapshots. Each snapshot clears the
/// in-memory buffers, bounding memory for arbitrarily long runs. A
/// crash between snapshot and emit can duplicate or drop at most one
/// interval of telemetry; that window is accepted, not hidden.
pub const DATA_BACKUP_PERIOD: u64 = 10;

/// Where the run currently sits in its lifecycle. `Paused` is a
/// runtime-only notion; the serialized status stays `running` while
/// paused, matching the supervisor's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentPhase {
    Ready,
    Running,
    Paused,
}

// ───────────────────────────────────────────────────────────────
// Shared core
// ───────────────────────────────────────────────────────────────

/// The half of the orchestrator shared with the loop thread and the
/// actuation workers.
pub(crate) struct ExperimentCore {
    device_id: String,
    backup_period: u64,
    state: Mutex<ExperimentState>,
    link: Arc<dyn TransportLink>,
    backup: Arc<dyn BackupStore>,
}

impl ExperimentCore {
    /// Emit if connected; silently skip otherwise. Recovery while the
    /// link is down is the snapshot store's job.
    pub(crate) fn emit(&self, event_channel: &str, payload: &Value) {
        if self.link.connected() {
            self.link.emit(event_channel, payload);
        }
    }

    fn emit_event<T: Serialize>(&self, event_channel: &str, event: &T) {
        match serde_json::to_value(event) {
            Ok(payload) => self.emit(event_channel, &payload),
            Err(e) => warn!("failed to serialise {event_channel} event: {e}"),
        }
    }

    /// Append a log entry and emit it immediately.
    fn push_log(&self, kind: LogKind, desc: &str, location: &str) {
        let entry = LogEntry::new(kind, desc, location);
        lock(&self.state).logs.push(entry.clone());
        self.emit_event(channel::EXPERIMENT_LOG, &entry);
    }

    /// Command-path failures funnel here: one `error` event plus a
    /// durable error log entry.
    pub(crate) fn report_error(&self, message: &str) {
        self.push_log(LogKind::Error, message, "Device");
        self.emit_event(
            channel::ERROR,
            &ErrorEvent {
                message: message.to_string(),
                device_id: self.device_id.clone(),
            },
        );
    }

    fn snapshot(&self, state: &mut ExperimentState) {
        match serde_json::to_value(&*state) {
            Ok(blob) => {
                if let Err(e) = self.backup.write_snapshot(&blob) {
                    warn!("snapshot write failed: {e}");
                }
            }
            Err(e) => warn!("snapshot serialisation failed: {e}"),
        }
        state.clear_buffers();
    }
}

impl ControlSink for ExperimentCore {
    /// The duration heartbeat: one second elapsed, status emitted,
    /// snapshot taken every `backup_period` ticks.
    fn second_elapsed(&self) {
        let mut state = lock(&self.state);
        state.duration += 1;
        let duration = state.duration;
        if duration % self.backup_period == 0 {
            self.snapshot(&mut state);
        }
        drop(state);
        self.emit_event(channel::EXPERIMENT_STATUS, &ExperimentStatusEvent { duration });
    }

    /// Stamp a batch with the current duration, buffer it per location,
    /// and emit it as one `sensor_data` event.
    fn batch_read(&self, readings: Vec<LocationReading>) {
        let mut state = lock(&self.state);
        let x = state.duration;
        let mut points = Vec::with_capacity(readings.len());
        for reading in readings {
            if let Some(series) = state
                .locations
                .iter_mut()
                .find(|s| s.id == reading.location_id)
            {
                series.data.push(DataPoint { x, y: reading.ph });
            }
            points.push(SeriesPoint {
                id: reading.location_id,
                x,
                y: reading.ph,
            });
        }
        drop(state);
        self.emit_event(
            channel::SENSOR_DATA,
            &SensorDataEvent {
                device_id: self.device_id.clone(),
                data: points,
            },
        );
    }

    fn log(&self, kind: LogKind, desc: &str, location: &str) {
        self.push_log(kind, desc, location);
    }

    fn pump_status(&self, location: &str, pump: PumpKind, open: bool) {
        info!("pump status: {location} {pump} -> {}", if open { "open" } else { "closed" });
        self.emit_event(
            channel::PUMP_STATUS,
            &PumpStatusEvent {
                device_id: self.device_id.clone(),
                location: location.to_string(),
                pump,
                status: open,
            },
        );
    }
}

// ───────────────────────────────────────────────────────────────
// Orchestrator
// ───────────────────────────────────────────────────────────────

/// External collaborators the orchestrator is wired to at construction;
/// no ambient globals.
pub struct OrchestratorDeps {
    pub link: Arc<dyn TransportLink>,
    pub backup: Arc<dyn BackupStore>,
    pub pins: Arc<dyn PinDriver>,
    pub analog: Arc<dyn AnalogDriver>,
}

pub struct ExperimentOrchestrator {
    core: Arc<ExperimentCore>,
    scheduler: ControlScheduler,
    phase: ExperimentPhase,
}

impl ExperimentOrchestrator {
    pub fn new(device_id: String, pinmap: InputPinMap, deps: OrchestratorDeps) -> Self {
        let core = Arc::new(ExperimentCore {
            state: Mutex::new(ExperimentState::initial(&device_id)),
            device_id,
            backup_period: DATA_BACKUP_PERIOD,
            link: deps.link,
            backup: Arc::clone(&deps.backup),
        });
        let scheduler = ControlScheduler::new(
            ControlDeps {
                pins: deps.pins,
                analog: deps.analog,
                sink: Arc::clone(&core) as Arc<dyn ControlSink>,
            },
            pinmap,
        );
        Self {
            core,
            scheduler,
            phase: ExperimentPhase::Ready,
        }
    }

    pub fn phase(&self) -> ExperimentPhase {
        self.phase
    }

    /// A copy of the current experiment state (tests, status queries).
    pub fn experiment(&self) -> ExperimentState {
        lock(&self.core.state).clone()
    }

    pub(crate) fn reporter(&self) -> Arc<ExperimentCore> {
        Arc::clone(&self.core)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Resolve the configuration, initialise per-location buffers,
    /// register and start the control loop, mark the run live.
    pub fn start_experiment(
        &mut self,
        config: &ConfigStore,
        data: StartExperimentData,
    ) -> Result<()> {
        if self.phase != ExperimentPhase::Ready {
            return Err(ValidationError::WrongPhase("an experiment is already running").into());
        }
        info!("starting the experiment");
        let locations = experiment_locations(config, &data.configuration_id)?;
        // Register first: a bad port or missing sensor must leave the
        // experiment untouched in its Ready shape.
        self.scheduler.register_sensors(&locations)?;

        {
            let mut state = lock(&self.core.state);
            state.duration = 0;
            state.project_id = data.project_id;
            state.user_id = data.user_id;
            state.configuration_id = Some(data.configuration_id);
            state.data_acquisition_interval = Some(data.data_acquisition_interval);
            state.status = DeviceStatus::Running;
            state.created_at = Some(Utc::now().to_rfc3339());
            state.locations = locations
                .iter()
                .map(|l| LocationSeries {
                    id: l.id.clone(),
                    data: Vec::new(),
                })
                .collect();
            state.logs.clear();
        }

        self.scheduler.start(data.data_acquisition_interval);
        self.phase = ExperimentPhase::Running;
        self.core
            .push_log(LogKind::Info, "Experiment started", "Device");
        Ok(())
    }

    /// Freeze the duration and the tick loop; telemetry state and
    /// actuator claims survive. In-flight pump windows finish.
    pub fn pause_experiment(&mut self) -> Result<()> {
        if self.phase != ExperimentPhase::Running {
            return Err(ValidationError::WrongPhase("no running experiment to pause").into());
        }
        info!("pausing the experiment");
        self.scheduler.pause();
        self.phase = ExperimentPhase::Paused;
        Ok(())
    }

    /// Restart the loop with the cadence stored at start.
    pub fn resume_experiment(&mut self, data: ResumeExperimentData) -> Result<()> {
        if self.phase != ExperimentPhase::Paused {
            return Err(ValidationError::WrongPhase("no paused experiment to resume").into());
        }
        info!("resuming the experiment");
        self.scheduler
            .start(data.data_acquisition_interval.unwrap_or(1));
        self.phase = ExperimentPhase::Running;
        Ok(())
    }

    /// Stop the loop, release the actuators, drop the run's snapshots,
    /// and return the state to its initial Ready shape. Accepted in any
    /// phase; stopping an idle device is a no-op that still resets.
    pub fn stop_experiment(&mut self) -> Result<()> {
        info!("stopping the experiment");
        self.scheduler.stop();
        if let Err(e) = self.core.backup.delete_all_snapshots() {
            warn!("failed to clear experiment snapshots: {e}");
        }
        lock(&self.core.state).reset();
        self.phase = ExperimentPhase::Ready;
        Ok(())
    }

    // ── Telemetry / logs (also reachable from the command path) ──

    pub fn record_telemetry(&self, readings: Vec<LocationReading>) {
        self.core.batch_read(readings);
    }

    pub fn record_log(&self, kind: LogKind, desc: &str, location: &str) {
        self.core.push_log(kind, desc, location);
    }

    /// One duration tick, exactly as the loop thread reports it.
    pub fn update_duration(&self) {
        self.core.second_elapsed();
    }

    // ── Manual pump control ───────────────────────────────────

    pub fn toggle_pump(&mut self, request: &TogglePumpRequest) -> Result<()> {
        let (location, pump, status) = self.scheduler.toggle_pump(request)?;
        info!("manual toggle: {location} {pump} -> {status}");
        Ok(())
    }

    // ── Reconnect recovery ────────────────────────────────────

    /// Replay every stored snapshot to the supervisor, oldest first,
    /// then drop them. Called when the transport reports a fresh
    /// connection.
    pub fn replay_backups(&self) {
        match self.core.backup.list_snapshots() {
            Ok(snapshots) => {
                if snapshots.is_empty() {
                    return;
                }
                info!("replaying {} experiment snapshot(s)", snapshots.len());
                for snapshot in &snapshots {
                    self.core.emit(channel::EXPERIMENT_BACKUP, snapshot);
                }
                if let Err(e) = self.core.backup.delete_all_snapshots() {
                    warn!("failed to delete replayed snapshots: {e}");
                }
            }
            Err(e) => warn!("failed to enumerate snapshots for replay: {e}"),
        }
    }
}

/// The locations behind a configuration id; exactly one configuration
/// must match.
fn experiment_locations(config: &ConfigStore, configuration_id: &str) -> Result<Vec<Location>> {
    let matches = config.configurations_by_id(configuration_id);
    if matches.len() != 1 {
        return Err(Error::NotFound(
            "no configuration or more than one configuration found".to_string(),
        ));
    }
    Ok(matches[0].locations.clone())
}
