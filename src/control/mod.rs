//! The regulation layer: calibration math, per-location pump
//! actuators, and the scheduler that drives them.

pub mod actuator;
pub mod calibration;
pub mod scheduler;

pub use actuator::PumpActuator;
pub use scheduler::{ControlDeps, ControlScheduler};
