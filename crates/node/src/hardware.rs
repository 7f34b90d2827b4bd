//! Narrow capability interfaces for the sensors the poll loop reads.
//!
//! The poller never touches a concrete driver. Real implementations live in
//! `adc` and `dht11` (feature `gpio`), simulated ones in `sim`.

use anyhow::Result;

/// One analog input returning a raw integer per read (e.g. an ADS1115 input).
pub trait AnalogChannel: Send {
    fn read_raw(&mut self) -> Result<i32>;
}

/// A digital input line. `true` means the pin reads HIGH.
pub trait DigitalInput: Send {
    fn is_high(&mut self) -> Result<bool>;
}

/// Raw result of one temperature/humidity bus transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    pub valid: bool,
    pub temperature: f64,
    pub humidity: f64,
}

impl ClimateSample {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            temperature: 0.0,
            humidity: 0.0,
        }
    }
}

/// A bus-based temperature/humidity sensor such as the DHT11.
pub trait ClimateSensor: Send {
    fn read(&mut self) -> Result<ClimateSample>;
}

#[cfg(feature = "gpio")]
mod rpi {
    use super::*;
    use rppal::gpio::{Gpio, InputPin, Level};

    /// Light sensor comparator output wired straight to a GPIO input.
    pub struct GpioInput {
        pin: InputPin,
    }

    impl GpioInput {
        pub fn new(gpio: &Gpio, pin_num: u8) -> Result<Self> {
            let pin = gpio.get(pin_num)?.into_input();
            tracing::info!(pin = pin_num, "gpio input configured");
            Ok(Self { pin })
        }
    }

    impl DigitalInput for GpioInput {
        fn is_high(&mut self) -> Result<bool> {
            Ok(self.pin.read() == Level::High)
        }
    }
}

#[cfg(feature = "gpio")]
pub use rpi::GpioInput;
