//! Board hardware adapter.
//!
//! ## Dual-target design
//!
//! With the `rpi` feature: pump relays on BCM GPIO pins via `rppal`,
//! probe sampling through an ADS1115 on the I2C bus via `ads1x1x`.
//! Without it (host builds, CI): an in-memory simulation that tracks
//! pin state and synthesises a slowly wandering probe signal, so the
//! full daemon runs anywhere.

use crate::app::ports::{AnalogDriver, PinDirection, PinDriver, PinLevel};
use crate::error::HardwareError;

// ───────────────────────────────────────────────────────────────
// Simulation (default)
// ───────────────────────────────────────────────────────────────

#[cfg(not(feature = "rpi"))]
mod imp {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use log::debug;

    use super::{AnalogDriver, HardwareError, PinDirection, PinDriver, PinLevel};
    use crate::sync::lock;

    pub struct BoardPins {
        claimed: Mutex<BTreeSet<u8>>,
        levels: Mutex<BTreeMap<u8, PinLevel>>,
    }

    impl BoardPins {
        pub fn new() -> Result<Self, HardwareError> {
            Ok(Self {
                claimed: Mutex::new(BTreeSet::new()),
                levels: Mutex::new(BTreeMap::new()),
            })
        }
    }

    impl PinDriver for BoardPins {
        fn claim(&self, pin: u8, _direction: PinDirection) -> Result<(), HardwareError> {
            lock(&self.claimed).insert(pin);
            debug!("sim: claimed pin {pin}");
            Ok(())
        }

        fn write(&self, pin: u8, level: PinLevel) -> Result<(), HardwareError> {
            if !lock(&self.claimed).contains(&pin) {
                return Err(HardwareError::PinNotClaimed(pin));
            }
            lock(&self.levels).insert(pin, level);
            debug!("sim: pin {pin} -> {level:?}");
            Ok(())
        }

        fn release(&self, pin: u8) -> Result<(), HardwareError> {
            lock(&self.claimed).remove(&pin);
            debug!("sim: released pin {pin}");
            Ok(())
        }
    }

    /// A deterministic triangular wander around the mid-scale reading,
    /// spanning roughly half a pH unit, so a simulated run produces
    /// plausible plots.
    pub struct BoardAnalog {
        counter: AtomicU32,
    }

    impl BoardAnalog {
        pub fn new() -> Result<Self, HardwareError> {
            Ok(Self {
                counter: AtomicU32::new(0),
            })
        }
    }

    impl AnalogDriver for BoardAnalog {
        fn sample_raw(&self, channel: u8) -> Result<f32, HardwareError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let phase = (n / 64) % 200;
            let wander = if phase < 100 { phase } else { 200 - phase };
            let base = 20_000.0 + f32::from(channel) * 8.0;
            Ok(base - 200.0 + 4.0 * wander as f32)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Raspberry Pi (feature = "rpi")
// ───────────────────────────────────────────────────────────────

#[cfg(feature = "rpi")]
mod imp {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use ads1x1x::ic::{Ads1115, Resolution16Bit};
    use ads1x1x::interface::I2cInterface;
    use ads1x1x::mode::OneShot;
    use ads1x1x::{channel, Ads1x1x, SlaveAddr};
    use embedded_hal::adc::OneShot as _;
    use linux_embedded_hal::I2cdev;
    use log::debug;
    use rppal::gpio::{Gpio, OutputPin};

    use super::{AnalogDriver, HardwareError, PinDirection, PinDriver, PinLevel};
    use crate::sync::lock;

    pub struct BoardPins {
        gpio: Gpio,
        outputs: Mutex<HashMap<u8, OutputPin>>,
    }

    impl BoardPins {
        pub fn new() -> Result<Self, HardwareError> {
            let gpio = Gpio::new().map_err(|_| HardwareError::PinUnavailable(0))?;
            Ok(Self {
                gpio,
                outputs: Mutex::new(HashMap::new()),
            })
        }
    }

    impl PinDriver for BoardPins {
        fn claim(&self, pin: u8, _direction: PinDirection) -> Result<(), HardwareError> {
            let mut outputs = lock(&self.outputs);
            if outputs.contains_key(&pin) {
                return Ok(());
            }
            let output = self
                .gpio
                .get(pin)
                .map_err(|_| HardwareError::PinUnavailable(pin))?
                .into_output_low();
            outputs.insert(pin, output);
            debug!("gpio: claimed pin {pin}");
            Ok(())
        }

        fn write(&self, pin: u8, level: PinLevel) -> Result<(), HardwareError> {
            let mut outputs = lock(&self.outputs);
            let output = outputs
                .get_mut(&pin)
                .ok_or(HardwareError::PinNotClaimed(pin))?;
            match level {
                PinLevel::High => output.set_high(),
                PinLevel::Low => output.set_low(),
            }
            Ok(())
        }

        fn release(&self, pin: u8) -> Result<(), HardwareError> {
            // Dropping the OutputPin resets it to its initial state.
            lock(&self.outputs).remove(&pin);
            debug!("gpio: released pin {pin}");
            Ok(())
        }
    }

    type Adc = Ads1x1x<I2cInterface<I2cdev>, Ads1115, Resolution16Bit, OneShot>;

    pub struct BoardAnalog {
        adc: Mutex<Adc>,
    }

    impl BoardAnalog {
        pub fn new() -> Result<Self, HardwareError> {
            let i2c = I2cdev::new("/dev/i2c-1").map_err(|_| HardwareError::ReadFailed(0))?;
            let adc = Ads1x1x::new_ads1115(i2c, SlaveAddr::default());
            Ok(Self {
                adc: Mutex::new(adc),
            })
        }
    }

    impl AnalogDriver for BoardAnalog {
        fn sample_raw(&self, channel_id: u8) -> Result<f32, HardwareError> {
            let mut adc = lock(&self.adc);
            let counts = match channel_id {
                0 => nb::block!(adc.read(&mut channel::SingleA0)),
                1 => nb::block!(adc.read(&mut channel::SingleA1)),
                2 => nb::block!(adc.read(&mut channel::SingleA2)),
                3 => nb::block!(adc.read(&mut channel::SingleA3)),
                _ => return Err(HardwareError::ReadFailed(channel_id)),
            }
            .map_err(|_| HardwareError::ReadFailed(channel_id))?;
            Ok(f32::from(counts))
        }
    }
}

pub use imp::{BoardAnalog, BoardPins};
