//! Per-location pump actuator.
//!
//! One actuator owns a location's probe channel and its two dosing
//! outputs. It reads pH (averaged raw samples through the calibration
//! line), decides which pump to drive, scales the pump window by the pH
//! error, and runs the timed actuation on its own worker thread so a
//! long pump window never stalls the sampling cadence.
//!
//! ## Safety contract
//!
//! Physical pin writes are serialised by a single gate shared across
//! every actuator; a worker holds the gate for its whole pump window, so
//! at most one pump is energised at a time. A drop guard forces the pin
//! low and clears the pumping flag on every exit path, panics included.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::app::events::{LogKind, PumpKind};
use crate::app::ports::{AnalogDriver, ControlSink, PinDirection, PinDriver, PinLevel};
use crate::config::model::{Location, Sensor, SensorMode};
use crate::config::pinmap::PinAssignment;
use crate::control::calibration::Calibration;
use crate::error::{HardwareError, Result};
use crate::sync::lock;

/// Raw samples averaged per pH read.
pub const SAMPLES_PER_READ: usize = 20;
/// Pump seconds per unit of pH error, before the valve-time cap.
pub const PUMP_SECS_PER_PH: f64 = 2.0;

/// Shared hardware handles and the reporting sink, cloned into every
/// actuator and worker.
#[derive(Clone)]
pub struct ActuatorDeps {
    pub pins: Arc<dyn PinDriver>,
    pub analog: Arc<dyn AnalogDriver>,
    /// The global pin gate: held across a whole pump window.
    pub pin_gate: Arc<Mutex<()>>,
    pub sink: Arc<dyn ControlSink>,
}

pub struct PumpActuator {
    location_name: String,
    mode: SensorMode,
    target_ph: f64,
    margin: f64,
    max_valve_time_open: f64,
    probe_channel: u8,
    acidic_pin: u8,
    alkaline_pin: u8,
    calibration: Calibration,
    pumping_acid: Arc<AtomicBool>,
    pumping_base: Arc<AtomicBool>,
    deps: ActuatorDeps,
}

impl PumpActuator {
    /// Build the actuator for a location's wired sensor, claiming both
    /// pump pins and parking them in the safe (off) state.
    pub fn new(
        location: &Location,
        sensor: &Sensor,
        assignment: &PinAssignment,
        deps: ActuatorDeps,
    ) -> Result<Self> {
        let calibration = assignment.calibration()?;
        let (alkaline_pin, acidic_pin) = assignment.pump_pins();
        for pin in [acidic_pin, alkaline_pin] {
            deps.pins.claim(pin, PinDirection::Output)?;
            deps.pins.write(pin, PinLevel::Low)?;
        }
        Ok(Self {
            location_name: location.name.clone(),
            mode: sensor.mode,
            target_ph: sensor.target_ph,
            margin: sensor.margin,
            max_valve_time_open: sensor.max_valve_time_open,
            probe_channel: assignment.probe_channel,
            acidic_pin,
            alkaline_pin,
            calibration,
            pumping_acid: Arc::new(AtomicBool::new(false)),
            pumping_base: Arc::new(AtomicBool::new(false)),
            deps,
        })
    }

    pub fn location_name(&self) -> &str {
        &self.location_name
    }

    pub fn is_pumping(&self, pump: PumpKind) -> bool {
        self.flag(pump).load(Ordering::SeqCst)
    }

    // ── Sensing ───────────────────────────────────────────────

    /// Read the probe: N raw samples, zero/failed samples discarded,
    /// survivors averaged and run through the calibration line.
    ///
    /// Fails soft: if no sample survives, an error log goes to the
    /// client and the tick continues without a reading.
    pub fn read_ph(&self) -> Option<f64> {
        let mut samples = Vec::with_capacity(SAMPLES_PER_READ);
        let mut last_error: Option<HardwareError> = None;
        for _ in 0..SAMPLES_PER_READ {
            match self.deps.analog.sample_raw(self.probe_channel) {
                Ok(raw) if raw != 0.0 => samples.push(f64::from(raw)),
                Ok(_) => {}
                Err(e) => last_error = Some(e),
            }
        }
        if samples.is_empty() {
            let detail = last_error
                .map_or_else(|| "no non-zero samples".to_string(), |e| e.to_string());
            warn!(
                "pH read failed on channel {}: {detail}",
                self.probe_channel
            );
            self.deps.sink.log(
                LogKind::Error,
                &format!("An error occurred while trying to acquire pH data: {detail}"),
                &self.location_name,
            );
            return None;
        }
        let average = samples.iter().sum::<f64>() / samples.len() as f64;
        let ph = self.calibration.ph_from_raw(average);
        Some((ph * 100.0).round() / 100.0)
    }

    // ── Decision ──────────────────────────────────────────────

    /// Whether a reading sits inside the no-actuation band.
    pub fn within_margin(&self, current_ph: f64) -> bool {
        (self.target_ph - self.margin..=self.target_ph + self.margin).contains(&current_ph)
    }

    /// Pick the pump for a reading, filtered by mode: an acidic
    /// solution (below target) wants the alkaline pump and vice versa.
    /// `None` when the mode forbids the needed direction.
    pub fn select_pump(&self, current_ph: f64) -> Option<PumpKind> {
        let is_acidic = current_ph < self.target_ph;
        if is_acidic && self.mode.allows(PumpKind::Alkaline) {
            Some(PumpKind::Alkaline)
        } else if !is_acidic && self.mode.allows(PumpKind::Acidic) {
            Some(PumpKind::Acidic)
        } else {
            None
        }
    }

    /// Pump window in seconds: linear in the pH error, capped at the
    /// configured valve-time maximum. A heuristic, not a closed loop.
    pub fn pump_time(&self, current_ph: f64) -> f64 {
        ((self.target_ph - current_ph).abs() * PUMP_SECS_PER_PH).min(self.max_valve_time_open)
    }

    /// One full decision pass: read, margin check, pump selection,
    /// timed actuation.
    pub fn adjust(&self) -> Result<()> {
        let Some(current_ph) = self.read_ph() else {
            return Ok(());
        };
        debug!(
            "{}: current pH {current_ph:.2} -> target {:.2}",
            self.location_name, self.target_ph
        );
        if self.within_margin(current_ph) {
            debug!("{}: within margin, no adjustment", self.location_name);
            return Ok(());
        }
        let Some(pump) = self.select_pump(current_ph) else {
            return Ok(());
        };
        info!("{}: {pump} pump activated", self.location_name);
        self.actuate(pump, self.pump_time(current_ph))
    }

    /// Run a timed pump window on a dedicated worker thread.
    pub fn actuate(&self, pump: PumpKind, seconds: f64) -> Result<()> {
        let job = PumpJob {
            pins: Arc::clone(&self.deps.pins),
            pin_gate: Arc::clone(&self.deps.pin_gate),
            sink: Arc::clone(&self.deps.sink),
            flag: Arc::clone(self.flag(pump)),
            location: self.location_name.clone(),
            pin: self.pin(pump),
            pump,
            seconds,
        };
        // The worker detaches; the drop guard inside `run` owns cleanup.
        let _detached = thread::Builder::new()
            .name(format!("pump-{}", self.location_name))
            .spawn(move || job.run())
            .map_err(|e| {
                warn!("failed to spawn actuation worker: {e}");
                HardwareError::WorkerSpawn
            })?;
        Ok(())
    }

    // ── Manual control ────────────────────────────────────────

    /// Operator-initiated open/close, independent of the regulation
    /// decision. With `override_status`, the flag is forced first so
    /// the toggle lands on the state the operator asked for.
    pub fn toggle_manual(
        &self,
        pump: PumpKind,
        override_status: Option<bool>,
    ) -> Result<(PumpKind, bool)> {
        let flag = self.flag(pump);
        if let Some(status) = override_status {
            flag.store(!status, Ordering::SeqCst);
        }
        let opening = !flag.load(Ordering::SeqCst);
        {
            let _gate = lock(&self.deps.pin_gate);
            self.deps.pins.write(
                self.pin(pump),
                if opening { PinLevel::High } else { PinLevel::Low },
            )?;
        }
        flag.store(opening, Ordering::SeqCst);
        self.deps.sink.log(
            LogKind::Info,
            &format!("{} {pump} pump", if opening { "Opening" } else { "Closing" }),
            &self.location_name,
        );
        Ok((pump, opening))
    }

    /// Park both pins low and release them. Idempotent: releasing an
    /// already-released pin is not an error.
    pub fn stop(&self) {
        for pin in [self.acidic_pin, self.alkaline_pin] {
            if let Err(e) = self.deps.pins.write(pin, PinLevel::Low) {
                debug!("stop: write low on pin {pin} failed: {e}");
            }
            if let Err(e) = self.deps.pins.release(pin) {
                debug!("stop: release of pin {pin} failed: {e}");
            }
        }
        self.pumping_acid.store(false, Ordering::SeqCst);
        self.pumping_base.store(false, Ordering::SeqCst);
    }

    // ── Internal ──────────────────────────────────────────────

    fn pin(&self, pump: PumpKind) -> u8 {
        match pump {
            PumpKind::Acidic => self.acidic_pin,
            PumpKind::Alkaline => self.alkaline_pin,
        }
    }

    fn flag(&self, pump: PumpKind) -> &Arc<AtomicBool> {
        match pump {
            PumpKind::Acidic => &self.pumping_acid,
            PumpKind::Alkaline => &self.pumping_base,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Actuation worker
// ───────────────────────────────────────────────────────────────

/// Everything one pump window needs, moved onto the worker thread.
struct PumpJob {
    pins: Arc<dyn PinDriver>,
    pin_gate: Arc<Mutex<()>>,
    sink: Arc<dyn ControlSink>,
    flag: Arc<AtomicBool>,
    location: String,
    pin: u8,
    pump: PumpKind,
    seconds: f64,
}

impl PumpJob {
    fn run(self) {
        let _gate = lock(&self.pin_gate);
        self.flag.store(true, Ordering::SeqCst);
        self.sink.pump_status(&self.location, self.pump, true);
        self.sink.log(
            LogKind::Info,
            &format!("Pumping for {:.2} seconds", self.seconds),
            &self.location,
        );

        let guard = PinSafeOff {
            pins: &self.pins,
            pin: self.pin,
            flag: &self.flag,
        };
        if let Err(e) = self.pins.write(self.pin, PinLevel::High) {
            drop(guard);
            self.sink.log(
                LogKind::Error,
                &format!("Pump drive failed: {e}"),
                &self.location,
            );
            self.sink.pump_status(&self.location, self.pump, false);
            return;
        }
        thread::sleep(Duration::from_secs_f64(self.seconds.max(0.0)));
        drop(guard);

        self.sink.pump_status(&self.location, self.pump, false);
        self.sink.log(LogKind::Info, "Closing valve", &self.location);
    }
}

/// Restores the pin to its safe state and clears the pumping flag on
/// any exit from the pump window, including a panic during the sleep.
struct PinSafeOff<'a> {
    pins: &'a Arc<dyn PinDriver>,
    pin: u8,
    flag: &'a AtomicBool,
}

impl Drop for PinSafeOff<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pins.write(self.pin, PinLevel::Low) {
            warn!("failed to restore pin {} to safe state: {e}", self.pin);
        }
        self.flag.store(false, Ordering::SeqCst);
    }
}
