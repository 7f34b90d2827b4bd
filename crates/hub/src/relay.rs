//! Relay outputs. The `gpio` feature gates the real rppal driver; without it
//! a mock line logs transitions instead of touching hardware.

#[cfg(feature = "gpio")]
use anyhow::Result;
use tracing::info;

/// A single digital output driving one relay coil.
pub trait OutputLine: Send {
    fn write(&mut self, high: bool);
}

// ---------------------------------------------------------------------------
// Relay channel
// ---------------------------------------------------------------------------

/// One watering output: plant number, pin and polarity. Constructed OFF.
pub struct RelayChannel {
    plant: u8,
    gpio_pin: u8,
    line: Box<dyn OutputLine>,
    active_low: bool,
    on: bool,
}

impl RelayChannel {
    pub fn new(plant: u8, gpio_pin: u8, line: Box<dyn OutputLine>, active_low: bool) -> Self {
        let mut relay = Self {
            plant,
            gpio_pin,
            line,
            active_low,
            on: false,
        };
        relay.drive(false);
        relay
    }

    pub fn plant(&self) -> u8 {
        self.plant
    }

    pub fn gpio_pin(&self) -> u8 {
        self.gpio_pin
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Drive the relay. Only actual transitions are logged.
    pub fn switch(&mut self, on: bool) {
        let changed = self.is_on() != on;
        self.drive(on);
        if changed {
            info!(
                plant = self.plant,
                pin = self.gpio_pin,
                "relay {}",
                if on { "ON" } else { "OFF" }
            );
        }
    }

    fn drive(&mut self, on: bool) {
        // active-low boards: LOW = ON, HIGH = OFF
        self.line.write(on != self.active_low);
        self.on = on;
    }
}

// ---------------------------------------------------------------------------
// Real GPIO line (production: requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct GpioLine(rppal::gpio::OutputPin);

#[cfg(feature = "gpio")]
impl GpioLine {
    pub fn open(gpio: &rppal::gpio::Gpio, pin: u8) -> Result<Self> {
        Ok(Self(gpio.get(pin)?.into_output()))
    }
}

#[cfg(feature = "gpio")]
impl OutputLine for GpioLine {
    fn write(&mut self, high: bool) {
        if high {
            self.0.set_high();
        } else {
            self.0.set_low();
        }
    }
}

// ---------------------------------------------------------------------------
// Mock line (development: no hardware)
// ---------------------------------------------------------------------------

#[cfg(any(test, not(feature = "gpio")))]
pub use mock::{MockLine, MockProbe};

#[cfg(any(test, not(feature = "gpio")))]
mod mock {
    use super::OutputLine;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::debug;

    /// Observes a [`MockLine`] from outside the relay that owns it.
    #[derive(Clone, Default)]
    pub struct MockProbe {
        level: Arc<AtomicBool>,
        writes: Arc<AtomicUsize>,
    }

    #[cfg_attr(not(test), allow(dead_code))]
    impl MockProbe {
        pub fn is_high(&self) -> bool {
            self.level.load(Ordering::SeqCst)
        }

        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    pub struct MockLine {
        pin: u8,
        probe: MockProbe,
    }

    impl MockLine {
        pub fn new(pin: u8) -> Self {
            debug!(pin, "[mock-gpio] output registered (not wired)");
            Self {
                pin,
                probe: MockProbe::default(),
            }
        }

        #[cfg_attr(not(test), allow(dead_code))]
        pub fn probe(&self) -> MockProbe {
            self.probe.clone()
        }
    }

    impl OutputLine for MockLine {
        fn write(&mut self, high: bool) {
            self.probe.level.store(high, Ordering::SeqCst);
            self.probe.writes.fetch_add(1, Ordering::SeqCst);
            debug!(pin = self.pin, high, "[mock-gpio] write");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
