//! Input pin map.
//!
//! Resolves a sensor's logical port (`i1..i4`) into the physical pair
//! of pump pins (BCM numbering), the probe's ADC channel, and the two
//! calibration readings taken in pH 4 and pH 7 buffer solution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::control::calibration::{CalPt, Calibration, PH_ACID_REF, PH_ALKALINE_REF};
use crate::error::{Error, Result};

/// One logical input's wiring and calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinAssignment {
    /// ADC channel the probe amplifier feeds (0–3 on the ADS1115).
    pub probe_channel: u8,
    pub acidic_pin: u8,
    pub alkaline_pin: u8,
    /// Raw converter counts measured in pH 4 buffer.
    pub acidic_calibration_value: f32,
    /// Raw converter counts measured in pH 7 buffer.
    pub alkaline_calibration_value: f32,
}

impl PinAssignment {
    /// Pump pins in `(alkaline, acidic)` order.
    pub fn pump_pins(&self) -> (u8, u8) {
        (self.alkaline_pin, self.acidic_pin)
    }

    /// Derive the linear raw→pH conversion from the two buffer readings.
    pub fn calibration(&self) -> Result<Calibration> {
        Calibration::from_points(
            CalPt::new(f64::from(self.acidic_calibration_value), PH_ACID_REF),
            CalPt::new(f64::from(self.alkaline_calibration_value), PH_ALKALINE_REF),
        )
        .map_err(Error::Validation)
    }
}

/// The device's static input table. A deployment can override it from
/// the data directory; the default matches the reference wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPinMap {
    inputs: BTreeMap<String, PinAssignment>,
}

impl Default for InputPinMap {
    fn default() -> Self {
        // Reference wiring: four probe amplifiers on ADS1115 channels
        // 0–3, pump relays on free BCM pins. Calibration counts are the
        // amplifier's nominal outputs in pH 4 / pH 7 buffer (gain ±4.096 V).
        let mut inputs = BTreeMap::new();
        for (port, assignment) in [
            ("i1", (0, 17, 27)),
            ("i2", (1, 22, 23)),
            ("i3", (2, 24, 25)),
            ("i4", (3, 5, 6)),
        ] {
            let (probe_channel, acidic_pin, alkaline_pin) = assignment;
            inputs.insert(
                port.to_string(),
                PinAssignment {
                    probe_channel,
                    acidic_pin,
                    alkaline_pin,
                    acidic_calibration_value: 24_400.0,
                    alkaline_calibration_value: 20_000.0,
                },
            );
        }
        Self { inputs }
    }
}

impl InputPinMap {
    pub fn lookup(&self, port: &str) -> Option<&PinAssignment> {
        self.inputs.get(port)
    }

    /// Resolve a logical port or fail with a reportable error.
    pub fn resolve(&self, port: &str) -> Result<&PinAssignment> {
        self.inputs
            .get(port)
            .ok_or_else(|| Error::NotFound(format!("input port {port} is not mapped")))
    }

    /// Replace one input's assignment (calibration runs use this).
    pub fn set(&mut self, port: &str, assignment: PinAssignment) {
        self.inputs.insert(port.to_string(), assignment);
    }
}
