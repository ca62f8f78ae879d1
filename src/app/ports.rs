//! Port traits — the hexagonal boundary between domain logic and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ domain (config / control / experiment)
//! ```
//!
//! Driven adapters (GPIO, ADC, transport client, durable stores)
//! implement these traits. The domain consumes them as `Arc<dyn _>`, so
//! the control loop, actuation workers, and command path never touch
//! hardware or the filesystem directly.
//!
//! All port methods take `&self`: implementations are shared across the
//! tick loop and short-lived actuation workers and handle their own
//! interior mutability.

use serde_json::Value;

use crate::app::events::{LogKind, PumpKind};
use crate::config::model::DeviceConfig;
use crate::error::{HardwareError, PersistError};

// ───────────────────────────────────────────────────────────────
// Physical pin driver (domain → GPIO)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

/// Claim, drive, and release physical pins.
///
/// `claim` is idempotent for a pin this driver already holds: the manual
/// pump path may resolve the same location repeatedly. `release` is
/// idempotent too — releasing an unclaimed pin is not an error.
pub trait PinDriver: Send + Sync {
    fn claim(&self, pin: u8, direction: PinDirection) -> Result<(), HardwareError>;
    fn write(&self, pin: u8, level: PinLevel) -> Result<(), HardwareError>;
    fn release(&self, pin: u8) -> Result<(), HardwareError>;
}

// ───────────────────────────────────────────────────────────────
// Analog probe driver (domain → ADC)
// ───────────────────────────────────────────────────────────────

/// One raw conversion from the analog front-end.
///
/// Returns raw converter counts; the calibration layer turns them into
/// pH. A failed or zero sample is discarded by the caller, never fatal.
pub trait AnalogDriver: Send + Sync {
    fn sample_raw(&self, channel: u8) -> Result<f32, HardwareError>;
}

// ───────────────────────────────────────────────────────────────
// Transport link (domain → supervisor)
// ───────────────────────────────────────────────────────────────

/// The persistent connection to the remote supervisor.
///
/// The handshake and reconnection machinery live entirely in the
/// adapter. The domain only asks one question — connected or not — and
/// skips emission while the link is down; recovery is the snapshot
/// store's job, not a per-event replay queue.
pub trait TransportLink: Send + Sync {
    fn connected(&self) -> bool;
    fn emit(&self, channel: &str, payload: &Value);
}

// ───────────────────────────────────────────────────────────────
// Durable stores
// ───────────────────────────────────────────────────────────────

/// Whole-tree configuration persistence.
///
/// Every mutation re-serialises the entire tree; there are no partial
/// writes. `load` returning `Ok(None)` means first boot.
pub trait ConfigPersistence: Send + Sync {
    fn load(&self) -> Result<Option<DeviceConfig>, PersistError>;
    fn save(&self, config: &DeviceConfig) -> Result<(), PersistError>;
}

impl<T: ConfigPersistence + ?Sized> ConfigPersistence for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<DeviceConfig>, PersistError> {
        (**self).load()
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), PersistError> {
        (**self).save(config)
    }
}

/// Durable experiment-state snapshots, enumerable for replay after a
/// crash or reconnect.
pub trait BackupStore: Send + Sync {
    fn write_snapshot(&self, snapshot: &Value) -> Result<(), PersistError>;
    /// Snapshots in write order, oldest first.
    fn list_snapshots(&self) -> Result<Vec<Value>, PersistError>;
    fn delete_all_snapshots(&self) -> Result<(), PersistError>;
}

// ───────────────────────────────────────────────────────────────
// Control sink (control loop / workers → orchestrator)
// ───────────────────────────────────────────────────────────────

/// One pH reading attributed to a location, produced by the tick loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationReading {
    pub location_id: String,
    pub ph: f64,
}

/// Callbacks the control loop and actuation workers feed upward.
///
/// This decouples the scheduler from the experiment orchestrator: the
/// loop knows nothing about durations, snapshots, or the transport —
/// it reports seconds, batches, logs, and pump state, and the sink
/// decides what they mean.
pub trait ControlSink: Send + Sync {
    /// One second of experiment time has elapsed.
    fn second_elapsed(&self);
    /// A tick produced at least one reading.
    fn batch_read(&self, readings: Vec<LocationReading>);
    /// A log line destined for the supervisor.
    fn log(&self, kind: LogKind, desc: &str, location: &str);
    /// A pump changed state.
    fn pump_status(&self, location: &str, pump: PumpKind, open: bool);
}
