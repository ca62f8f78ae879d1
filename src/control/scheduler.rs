//! Control scheduler.
//!
//! Owns the set of live actuators for the current experiment and the
//! loop that drives them: one pass per second of experiment time,
//! sampling each location at the acquisition cadence and running its
//! regulation decision at the sensor's own monitor cadence. The loop
//! thread sleeps to the next whole-second deadline, so the cadence does
//! not drift with tick cost.
//!
//! `tick` is the pure unit the loop thread calls once per second; tests
//! drive it directly to get deterministic cadences.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info};

use crate::app::commands::TogglePumpRequest;
use crate::app::events::{LogKind, PumpKind};
use crate::app::ports::{AnalogDriver, ControlSink, LocationReading, PinDriver};
use crate::config::model::Location;
use crate::config::pinmap::InputPinMap;
use crate::control::actuator::{ActuatorDeps, PumpActuator};
use crate::error::{Error, Result};
use crate::sync::lock;

/// Hardware handles and the reporting sink the scheduler wires into
/// every actuator it builds.
#[derive(Clone)]
pub struct ControlDeps {
    pub pins: Arc<dyn PinDriver>,
    pub analog: Arc<dyn AnalogDriver>,
    pub sink: Arc<dyn ControlSink>,
}

struct ActuatorEntry {
    location_id: String,
    /// Decision cadence in seconds, from the wired sensor.
    monitor_frequency: u32,
    actuator: Arc<PumpActuator>,
}

pub struct ControlScheduler {
    deps: ActuatorDeps,
    pinmap: InputPinMap,
    entries: Arc<Mutex<Vec<ActuatorEntry>>>,
    running: Arc<AtomicBool>,
    /// Acquisition cadence, fixed per experiment: the first `start`
    /// wins and `resume` reuses it.
    acquisition_interval: Option<u32>,
    worker: Option<JoinHandle<()>>,
}

impl ControlScheduler {
    pub fn new(deps: ControlDeps, pinmap: InputPinMap) -> Self {
        Self {
            deps: ActuatorDeps {
                pins: deps.pins,
                analog: deps.analog,
                pin_gate: Arc::new(Mutex::new(())),
                sink: deps.sink,
            },
            pinmap,
            entries: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            acquisition_interval: None,
            worker: None,
        }
    }

    /// Build one actuator per location from its wired (first) sensor,
    /// replacing any previous registration.
    pub fn register_sensors(&mut self, locations: &[Location]) -> Result<()> {
        let mut entries = lock(&self.entries);
        entries.clear();
        for location in locations {
            let sensor = location.active_sensor().ok_or_else(|| {
                Error::NotFound(format!("location {} has no sensor", location.name))
            })?;
            let assignment = self.pinmap.resolve(&sensor.device_port)?;
            let actuator =
                PumpActuator::new(location, sensor, assignment, self.deps.clone())?;
            entries.push(ActuatorEntry {
                location_id: location.id.clone(),
                monitor_frequency: sensor.ph_monitor_frequency.max(1),
                actuator: Arc::new(actuator),
            });
        }
        Ok(())
    }

    /// Fix the acquisition cadence without spawning the loop. The first
    /// caller wins; later calls keep the stored interval.
    pub fn arm(&mut self, data_acquisition_interval: u32) -> u32 {
        *self
            .acquisition_interval
            .get_or_insert(data_acquisition_interval.max(1))
    }

    /// Spawn the periodic loop if it is not already running.
    pub fn start(&mut self, data_acquisition_interval: u32) {
        let interval = self.arm(data_acquisition_interval);
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting the control loop (acquisition every {interval}s)");

        let entries = Arc::clone(&self.entries);
        let running = Arc::clone(&self.running);
        let sink = Arc::clone(&self.deps.sink);
        let spawned = thread::Builder::new()
            .name("control-loop".to_string())
            .spawn(move || {
                let period = Duration::from_secs(1);
                let mut next = Instant::now() + period;
                let mut elapsed: u64 = 0;
                while running.load(Ordering::SeqCst) {
                    if let Err(e) = run_tick(&entries, &sink, interval, elapsed) {
                        error!("control loop aborted: {e}");
                        release_all(&entries);
                        running.store(false, Ordering::SeqCst);
                        sink.log(
                            LogKind::Error,
                            &format!("An error occurred during data acquisition: {e}"),
                            "Device",
                        );
                        break;
                    }
                    elapsed += 1;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                    next += period;
                }
            });
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!("failed to spawn control loop: {e}");
            }
        }
    }

    /// One scheduler pass at elapsed second `t`. Public so the loop
    /// thread and deterministic tests share the same unit.
    pub fn tick(&self, elapsed: u64) -> Result<()> {
        let interval = self.acquisition_interval.unwrap_or(1);
        run_tick(&self.entries, &self.deps.sink, interval, elapsed)
    }

    /// Stop the loop without releasing actuators; their pumping state
    /// survives a pause. In-flight pump windows run to completion.
    pub fn pause(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Stop the loop, release every actuator's pins, clear the
    /// registry, and forget the experiment's cadence.
    pub fn stop(&mut self) {
        self.pause();
        release_all(&self.entries);
        lock(&self.entries).clear();
        self.acquisition_interval = None;
        info!("monitoring stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Manual pump control ───────────────────────────────────

    /// Drive a pump by operator request, bypassing the decision loop.
    /// Reuses the live actuator for the location when an experiment is
    /// registered; otherwise builds a transient one from the request's
    /// own location record. Reports the resulting state upward.
    pub fn toggle_pump(&mut self, request: &TogglePumpRequest) -> Result<(String, PumpKind, bool)> {
        let selected = &request.selected_location;
        let override_status = Some(match request.pump {
            PumpKind::Acidic => !selected.is_acid_pumping,
            PumpKind::Alkaline => !selected.is_base_pumping,
        });

        let existing = {
            let entries = lock(&self.entries);
            entries
                .iter()
                .find(|e| {
                    Some(&e.location_id) == selected.id.as_ref()
                        || e.actuator.location_name() == selected.name
                })
                .map(|e| Arc::clone(&e.actuator))
        };

        let (pump, status) = match existing {
            Some(actuator) => actuator.toggle_manual(request.pump, override_status)?,
            None => {
                let sensor = selected.sensors.first().ok_or_else(|| {
                    Error::NotFound(format!("location {} has no sensor", selected.name))
                })?;
                let location = Location {
                    id: selected.id.clone().unwrap_or_default(),
                    name: selected.name.clone(),
                    created_at: String::new(),
                    sensors: vec![sensor.clone()],
                };
                let assignment = self.pinmap.resolve(&sensor.device_port)?;
                let actuator =
                    PumpActuator::new(&location, sensor, assignment, self.deps.clone())?;
                actuator.toggle_manual(request.pump, override_status)?
            }
        };

        self.deps.sink.pump_status(&selected.name, pump, status);
        Ok((selected.name.clone(), pump, status))
    }
}

impl Drop for ControlScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

// ───────────────────────────────────────────────────────────────
// The tick itself
// ───────────────────────────────────────────────────────────────

/// One pass: sample at the acquisition cadence, decide at each sensor's
/// monitor cadence, emit the batch if the tick produced readings, then
/// report the elapsed second.
fn run_tick(
    entries: &Mutex<Vec<ActuatorEntry>>,
    sink: &Arc<dyn ControlSink>,
    interval: u32,
    elapsed: u64,
) -> Result<()> {
    let sampling = elapsed % u64::from(interval) == 0;
    let mut batch = Vec::new();
    {
        let entries = lock(entries);
        for entry in entries.iter() {
            if sampling {
                if let Some(ph) = entry.actuator.read_ph() {
                    batch.push(LocationReading {
                        location_id: entry.location_id.clone(),
                        ph,
                    });
                }
            }
            if elapsed % u64::from(entry.monitor_frequency) == 0 {
                entry.actuator.adjust()?;
            }
        }
    }
    if sampling && !batch.is_empty() {
        sink.batch_read(batch);
    }
    sink.second_elapsed();
    Ok(())
}

fn release_all(entries: &Mutex<Vec<ActuatorEntry>>) {
    for entry in lock(entries).iter() {
        entry.actuator.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockAnalogDriver, MockPinDriver, RecordingSink};
    use crate::config::model::{Sensor, SensorMode};

    fn test_location(id: &str, port: &str, monitor_frequency: u32) -> Location {
        Location {
            id: id.to_string(),
            name: format!("Tank {id}"),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            sensors: vec![Sensor {
                id: format!("{id}-sensor"),
                mode: SensorMode::Auto,
                margin: 0.1,
                max_valve_time_open: 30.0,
                target_ph: 7.0,
                device_port: port.to_string(),
                ph_monitor_frequency: monitor_frequency,
                created_at: "2026-01-01T00:00:00Z".to_string(),
            }],
        }
    }

    struct Fixture {
        scheduler: ControlScheduler,
        pins: Arc<MockPinDriver>,
        analog: Arc<MockAnalogDriver>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let pins = Arc::new(MockPinDriver::new());
        let analog = Arc::new(MockAnalogDriver::constant(raw_for_ph(7.0)));
        let sink = Arc::new(RecordingSink::new());
        let deps = ControlDeps {
            pins: Arc::clone(&pins) as _,
            analog: Arc::clone(&analog) as _,
            sink: Arc::clone(&sink) as _,
        };
        Fixture {
            scheduler: ControlScheduler::new(deps, InputPinMap::default()),
            pins,
            analog,
            sink,
        }
    }

    fn raw_for_ph(ph: f64) -> f32 {
        let map = InputPinMap::default();
        let cal = map.lookup("i1").unwrap().calibration().unwrap();
        cal.raw_for_ph(ph) as f32
    }

    #[test]
    fn register_builds_one_actuator_per_location() {
        let mut f = fixture();
        f.scheduler
            .register_sensors(&[
                test_location("l1", "i1", 10),
                test_location("l2", "i2", 20),
            ])
            .unwrap();
        assert_eq!(lock(&f.scheduler.entries).len(), 2);
        // All four pump pins claimed and parked low.
        for pin in [17, 27, 22, 23] {
            assert!(f.pins.is_claimed(pin), "pin {pin} not claimed");
        }
    }

    #[test]
    fn register_rejects_unmapped_port() {
        let mut f = fixture();
        let result = f.scheduler.register_sensors(&[test_location("l1", "i9", 10)]);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn register_rejects_location_without_sensor() {
        let mut f = fixture();
        let mut location = test_location("l1", "i1", 10);
        location.sensors.clear();
        let result = f.scheduler.register_sensors(&[location]);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn sampling_follows_the_acquisition_cadence() {
        let mut f = fixture();
        f.scheduler
            .register_sensors(&[test_location("l1", "i1", 100)])
            .unwrap();
        f.scheduler.arm(5);
        for t in 0..=11 {
            f.scheduler.tick(t).unwrap();
        }
        // Readings at t = 0, 5, 10.
        let batches = f.sink.batches();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
        // Every tick reports one elapsed second.
        assert_eq!(f.sink.seconds(), 12);
    }

    #[test]
    fn failed_reads_produce_no_batch() {
        let mut f = fixture();
        f.scheduler
            .register_sensors(&[test_location("l1", "i1", 100)])
            .unwrap();
        f.scheduler.arm(1);
        f.analog.set_constant(0.0);
        f.scheduler.tick(0).unwrap();
        assert!(f.sink.batches().is_empty());
        assert_eq!(f.sink.seconds(), 1);
    }

    #[test]
    fn first_interval_wins() {
        let mut f = fixture();
        assert_eq!(f.scheduler.arm(5), 5);
        assert_eq!(f.scheduler.arm(9), 5);
        f.scheduler.stop();
        assert_eq!(f.scheduler.arm(9), 9);
    }

    #[test]
    fn pause_keeps_actuators_stop_releases_them() {
        let mut f = fixture();
        f.scheduler
            .register_sensors(&[test_location("l1", "i1", 10)])
            .unwrap();
        f.scheduler.pause();
        assert!(f.pins.is_claimed(17));

        f.scheduler.stop();
        assert!(!f.pins.is_claimed(17));
        assert!(lock(&f.scheduler.entries).is_empty());
    }

    #[test]
    fn loop_thread_ticks_and_stops_cooperatively() {
        let mut f = fixture();
        f.scheduler
            .register_sensors(&[test_location("l1", "i1", 100)])
            .unwrap();
        f.scheduler.start(1);
        assert!(f.scheduler.is_running());
        std::thread::sleep(Duration::from_millis(2_300));
        f.scheduler.pause();
        assert!(!f.scheduler.is_running());
        let seconds = f.sink.seconds();
        assert!((2..=4).contains(&seconds), "saw {seconds} seconds");
        // Cooperative cancellation: no further ticks after pause.
        std::thread::sleep(Duration::from_millis(1_200));
        assert_eq!(f.sink.seconds(), seconds);
    }

    #[test]
    fn toggle_pump_builds_transient_actuator() {
        let mut f = fixture();
        let location = test_location("l1", "i1", 10);
        let request: TogglePumpRequest = serde_json::from_value(serde_json::json!({
            "selectedLocation": {
                "id": "l1",
                "name": "Tank l1",
                "isAcidPumping": false,
                "isBasePumping": false,
                "sensors": serde_json::to_value(&location.sensors).unwrap(),
            },
            "pump": "acidic"
        }))
        .unwrap();

        let (name, pump, status) = f.scheduler.toggle_pump(&request).unwrap();
        assert_eq!(name, "Tank l1");
        assert_eq!(pump, PumpKind::Acidic);
        assert!(status);
        assert_eq!(
            f.pins.level(17),
            Some(crate::app::ports::PinLevel::High)
        );
        // The resulting state is reported upward.
        assert_eq!(
            f.sink.pump_statuses().last(),
            Some(&("Tank l1".to_string(), PumpKind::Acidic, true))
        );
    }

    #[test]
    fn toggle_pump_reuses_registered_actuator() {
        let mut f = fixture();
        f.scheduler
            .register_sensors(&[test_location("l1", "i1", 10)])
            .unwrap();
        let request: TogglePumpRequest = serde_json::from_value(serde_json::json!({
            "selectedLocation": {
                "id": "l1",
                "name": "Tank l1",
                "isAcidPumping": false,
                "isBasePumping": true,
                "sensors": [],
            },
            "pump": "alkaline"
        }))
        .unwrap();
        // isBasePumping=true means the operator wants it closed.
        let (_, _, status) = f.scheduler.toggle_pump(&request).unwrap();
        assert!(!status);
    }
}
