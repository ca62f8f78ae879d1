//! Recording in-memory adapters.
//!
//! Every port gets a mock that records what flowed through it, so unit
//! and integration tests can assert on the full call history without
//! hardware, a filesystem, or a live link.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use crate::app::events::{LogKind, PumpKind};
use crate::app::ports::{
    AnalogDriver, BackupStore, ConfigPersistence, ControlSink, LocationReading, PinDirection,
    PinDriver, PinLevel, TransportLink,
};
use crate::config::model::DeviceConfig;
use crate::error::{HardwareError, PersistError};
use crate::sync::lock;

// ───────────────────────────────────────────────────────────────
// Pins
// ───────────────────────────────────────────────────────────────

pub struct MockPinDriver {
    claimed: Mutex<BTreeSet<u8>>,
    levels: Mutex<BTreeMap<u8, PinLevel>>,
    writes: Mutex<Vec<(u8, PinLevel)>>,
    failing: Mutex<BTreeSet<u8>>,
}

impl MockPinDriver {
    pub fn new() -> Self {
        Self {
            claimed: Mutex::new(BTreeSet::new()),
            levels: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            failing: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn is_claimed(&self, pin: u8) -> bool {
        lock(&self.claimed).contains(&pin)
    }

    pub fn level(&self, pin: u8) -> Option<PinLevel> {
        lock(&self.levels).get(&pin).copied()
    }

    /// Every level written to a pin, in order.
    pub fn writes_for(&self, pin: u8) -> Vec<PinLevel> {
        lock(&self.writes)
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
            .collect()
    }

    /// Make writes to one pin fail, exercising the safe-off paths.
    pub fn fail_writes_on(&self, pin: u8, failing: bool) {
        let mut set = lock(&self.failing);
        if failing {
            set.insert(pin);
        } else {
            set.remove(&pin);
        }
    }
}

impl PinDriver for MockPinDriver {
    fn claim(&self, pin: u8, _direction: PinDirection) -> Result<(), HardwareError> {
        lock(&self.claimed).insert(pin);
        Ok(())
    }

    fn write(&self, pin: u8, level: PinLevel) -> Result<(), HardwareError> {
        if !lock(&self.claimed).contains(&pin) {
            return Err(HardwareError::PinNotClaimed(pin));
        }
        if lock(&self.failing).contains(&pin) {
            return Err(HardwareError::WriteFailed(pin));
        }
        lock(&self.levels).insert(pin, level);
        lock(&self.writes).push((pin, level));
        Ok(())
    }

    fn release(&self, pin: u8) -> Result<(), HardwareError> {
        lock(&self.claimed).remove(&pin);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Analog
// ───────────────────────────────────────────────────────────────

/// Scripted probe: queued samples are served first, then the constant.
/// A zero constant models a dead probe (zero samples are discarded
/// upstream).
pub struct MockAnalogDriver {
    script: Mutex<VecDeque<Result<f32, HardwareError>>>,
    constant: Mutex<f32>,
}

impl MockAnalogDriver {
    pub fn constant(raw: f32) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            constant: Mutex::new(raw),
        }
    }

    pub fn set_constant(&self, raw: f32) {
        *lock(&self.constant) = raw;
    }

    pub fn enqueue(&self, raw: f32) {
        lock(&self.script).push_back(Ok(raw));
    }

    pub fn enqueue_error(&self) {
        lock(&self.script).push_back(Err(HardwareError::ReadFailed(0)));
    }
}

impl AnalogDriver for MockAnalogDriver {
    fn sample_raw(&self, channel: u8) -> Result<f32, HardwareError> {
        if let Some(scripted) = lock(&self.script).pop_front() {
            return scripted.map_err(|_| HardwareError::ReadFailed(channel));
        }
        Ok(*lock(&self.constant))
    }
}

// ───────────────────────────────────────────────────────────────
// Transport
// ───────────────────────────────────────────────────────────────

pub struct MockTransportLink {
    connected: AtomicBool,
    events: Mutex<Vec<(String, Value)>>,
}

impl MockTransportLink {
    pub fn connected() -> Self {
        Self {
            connected: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn disconnected() -> Self {
        let link = Self::connected();
        link.connected.store(false, Ordering::SeqCst);
        link
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        lock(&self.events).clone()
    }

    /// Payloads emitted on one channel, in order.
    pub fn events_on(&self, channel: &str) -> Vec<Value> {
        lock(&self.events)
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl TransportLink for MockTransportLink {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, channel: &str, payload: &Value) {
        lock(&self.events).push((channel.to_string(), payload.clone()));
    }
}

// ───────────────────────────────────────────────────────────────
// Durable stores
// ───────────────────────────────────────────────────────────────

pub struct MemoryBackupStore {
    snapshots: Mutex<Vec<Value>>,
    failing: AtomicBool,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn count(&self) -> usize {
        lock(&self.snapshots).len()
    }

    pub fn snapshots(&self) -> Vec<Value> {
        lock(&self.snapshots).clone()
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl BackupStore for MemoryBackupStore {
    fn write_snapshot(&self, snapshot: &Value) -> Result<(), PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Io("injected failure".to_string()));
        }
        lock(&self.snapshots).push(snapshot.clone());
        Ok(())
    }

    fn list_snapshots(&self) -> Result<Vec<Value>, PersistError> {
        Ok(lock(&self.snapshots).clone())
    }

    fn delete_all_snapshots(&self) -> Result<(), PersistError> {
        lock(&self.snapshots).clear();
        Ok(())
    }
}

pub struct MemoryConfigPersistence {
    stored: Mutex<Option<DeviceConfig>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryConfigPersistence {
    pub fn new() -> Self {
        Self {
            stored: Mutex::new(None),
            saves: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn stored(&self) -> Option<DeviceConfig> {
        lock(&self.stored).clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ConfigPersistence for MemoryConfigPersistence {
    fn load(&self) -> Result<Option<DeviceConfig>, PersistError> {
        Ok(lock(&self.stored).clone())
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Io("injected failure".to_string()));
        }
        *lock(&self.stored) = Some(config.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Control sink
// ───────────────────────────────────────────────────────────────

/// Records everything the control loop reports upward.
pub struct RecordingSink {
    seconds: AtomicUsize,
    batches: Mutex<Vec<Vec<LocationReading>>>,
    logs: Mutex<Vec<(LogKind, String, String)>>,
    pump_statuses: Mutex<Vec<(String, PumpKind, bool)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            seconds: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            pump_statuses: Mutex::new(Vec::new()),
        }
    }

    pub fn seconds(&self) -> usize {
        self.seconds.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<Vec<LocationReading>> {
        lock(&self.batches).clone()
    }

    pub fn logs(&self) -> Vec<(LogKind, String, String)> {
        lock(&self.logs).clone()
    }

    pub fn pump_statuses(&self) -> Vec<(String, PumpKind, bool)> {
        lock(&self.pump_statuses).clone()
    }
}

impl ControlSink for RecordingSink {
    fn second_elapsed(&self) {
        self.seconds.fetch_add(1, Ordering::SeqCst);
    }

    fn batch_read(&self, readings: Vec<LocationReading>) {
        lock(&self.batches).push(readings);
    }

    fn log(&self, kind: LogKind, desc: &str, location: &str) {
        lock(&self.logs).push((kind, desc.to_string(), location.to_string()));
    }

    fn pump_status(&self, location: &str, pump: PumpKind, open: bool) {
        lock(&self.pump_statuses).push((location.to_string(), pump, open));
    }
}
