//! Unified error types for the controller.
//!
//! A single `Error` enum that every subsystem can convert into, keeping
//! the command router's error handling uniform: every failure funnels to
//! one `error` event plus a durable log entry. Validation and hardware
//! problems are values, never panics — a bad command or a flaky probe
//! must not take the control loop down.

use std::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A command or record failed shape/type/range validation.
    Validation(ValidationError),
    /// An id did not resolve to exactly one record.
    NotFound(String),
    /// A pin or probe operation failed.
    Hardware(HardwareError),
    /// A durable write or read failed.
    Persist(PersistError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "validation: {e}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
            Self::Persist(e) => write!(f, "persist: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Shape, type, and range failures for records and command envelopes.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field is absent.
    MissingField(&'static str),
    /// A field is present but has the wrong primitive type.
    InvalidFieldType(&'static str),
    /// A numeric field is outside its permitted range.
    OutOfRange(&'static str),
    /// A sensor `mode` outside `acidic | alkaline | auto`.
    InvalidMode,
    /// A command `context` outside `device | configuration | location | sensor`.
    InvalidContext,
    /// A command `operation` outside `create | read | update | delete`.
    InvalidOperation,
    /// A lifecycle `cmd` name with no handler.
    UnknownCommand(String),
    /// A `context|operation` pair with no dispatch-table entry.
    UnknownRoute(String),
    /// A positional argument declared by the route is missing from `data`.
    MissingArgument(&'static str),
    /// The payload failed typed decoding after shape validation.
    BadPayload(String),
    /// A sibling record with the same id already exists.
    DuplicateId(String),
    /// The device already holds its maximum number of configurations.
    ConfigurationLimit,
    /// The two calibration points coincide; no slope can be derived.
    DegenerateCalibration,
    /// A lifecycle command arrived in a phase that does not accept it.
    WrongPhase(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field: {field}"),
            Self::InvalidFieldType(field) => write!(f, "invalid type for field: {field}"),
            Self::OutOfRange(field) => write!(f, "value out of range for field: {field}"),
            Self::InvalidMode => write!(
                f,
                "invalid sensor mode; available options: acidic | alkaline | auto"
            ),
            Self::InvalidContext => write!(f, "the operation context you provided is invalid"),
            Self::InvalidOperation => write!(f, "the operation type you provided is invalid"),
            Self::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            Self::UnknownRoute(route) => write!(f, "unsupported operation: {route}"),
            Self::MissingArgument(arg) => write!(f, "missing command argument: {arg}"),
            Self::BadPayload(msg) => write!(f, "malformed payload: {msg}"),
            Self::DuplicateId(id) => write!(f, "a sibling record with id {id} already exists"),
            Self::ConfigurationLimit => {
                write!(f, "the device already holds its maximum number of configurations")
            }
            Self::DegenerateCalibration => {
                write!(f, "calibration points must differ to derive a slope")
            }
            Self::WrongPhase(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Hardware errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// The pin could not be claimed (held elsewhere, or the GPIO chip
    /// rejected it).
    PinUnavailable(u8),
    /// A write hit a pin that was never claimed or was already released.
    PinNotClaimed(u8),
    /// The GPIO driver rejected the level write.
    WriteFailed(u8),
    /// The analog converter failed to produce a sample on this channel.
    ReadFailed(u8),
    /// The OS refused to start an actuation worker.
    WorkerSpawn,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinUnavailable(pin) => write!(f, "pin {pin} unavailable"),
            Self::PinNotClaimed(pin) => write!(f, "pin {pin} not claimed"),
            Self::WriteFailed(pin) => write!(f, "write to pin {pin} failed"),
            Self::ReadFailed(channel) => write!(f, "read on channel {channel} failed"),
            Self::WorkerSpawn => write!(f, "actuation worker could not be spawned"),
        }
    }
}

impl From<HardwareError> for Error {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Durable-store failures. Never fatal: in-memory state remains the
/// source of truth until the next successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    Io(String),
    Serde(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Serde(msg) => write!(f, "serialisation error: {msg}"),
        }
    }
}

impl From<PersistError> for Error {
    fn from(e: PersistError) -> Self {
        Self::Persist(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
