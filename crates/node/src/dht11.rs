//! DHT11 single-wire temperature/humidity sensor.
//!
//! The bus is bit-banged from user space, so a read can be disturbed by
//! scheduling jitter; a bad checksum comes back as an invalid sample and
//! `climate::EnvironmentReader` retries it.

use crate::hardware::ClimateSample;

/// Decode the five-byte DHT11 frame: humidity int/dec, temperature int/dec,
/// checksum.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
pub fn decode(frame: [u8; 5]) -> ClimateSample {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return ClimateSample::invalid();
    }
    // Newer parts flag sub-zero readings with bit 7 of the decimal byte.
    let magnitude = f64::from(frame[2]) + f64::from(frame[3] & 0x7f) / 10.0;
    let temperature = if frame[3] & 0x80 != 0 { -magnitude } else { magnitude };
    ClimateSample {
        valid: true,
        humidity: f64::from(frame[0]) + f64::from(frame[1]) / 10.0,
        temperature,
    }
}

/// Pack 40 received bits (MSB first) into the frame bytes.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
fn pack_bits(bits: &[bool; 40]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            frame[i / 8] |= 0x80 >> (i % 8);
        }
    }
    frame
}

#[cfg(feature = "gpio")]
mod driver {
    use super::*;
    use crate::hardware::ClimateSensor;
    use anyhow::{bail, Result};
    use rppal::gpio::{Gpio, IoPin, Level, Mode, PullUpDown};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Host start signal: hold the line low at least 18 ms.
    const START_LOW: Duration = Duration::from_millis(20);
    /// Any single phase of the response longer than this is a lost frame.
    const PHASE_TIMEOUT: Duration = Duration::from_micros(200);
    /// High phases longer than this encode a 1 (0 ≈ 27 µs, 1 ≈ 70 µs).
    const ONE_THRESHOLD: Duration = Duration::from_micros(45);

    pub struct Dht11 {
        pin: IoPin,
        gpio_pin: u8,
    }

    impl Dht11 {
        pub fn new(gpio: &Gpio, gpio_pin: u8) -> Result<Self> {
            let mut pin = gpio.get(gpio_pin)?.into_io(Mode::Output);
            pin.set_high();
            tracing::info!(pin = gpio_pin, "dht11 configured");
            Ok(Self { pin, gpio_pin })
        }

        /// Busy-wait until the line reaches `level`; returns time spent.
        fn wait_for(&self, level: Level) -> Result<Duration> {
            let start = Instant::now();
            while self.pin.read() != level {
                if start.elapsed() > PHASE_TIMEOUT {
                    bail!("dht11 on gpio {} timed out waiting for {level:?}", self.gpio_pin);
                }
            }
            Ok(start.elapsed())
        }

        fn read_frame(&mut self) -> Result<[u8; 5]> {
            self.pin.set_mode(Mode::Output);
            self.pin.set_low();
            thread::sleep(START_LOW);
            self.pin.set_high();
            self.pin.set_mode(Mode::Input);
            self.pin.set_pullupdown(PullUpDown::PullUp);

            // Response: ~80 µs low, ~80 µs high, then the first bit's low.
            self.wait_for(Level::Low)?;
            self.wait_for(Level::High)?;
            self.wait_for(Level::Low)?;

            let mut bits = [false; 40];
            for bit in bits.iter_mut() {
                self.wait_for(Level::High)?;
                *bit = self.wait_for(Level::Low)? > ONE_THRESHOLD;
            }
            Ok(pack_bits(&bits))
        }
    }

    impl ClimateSensor for Dht11 {
        fn read(&mut self) -> Result<ClimateSample> {
            let frame = self.read_frame();
            self.pin.set_mode(Mode::Output);
            self.pin.set_high();
            Ok(decode(frame?))
        }
    }
}

#[cfg(feature = "gpio")]
pub use driver::Dht11;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_valid_frame() {
        let s = decode([55, 0, 23, 4, 82]);
        assert!(s.valid);
        assert_eq!(s.humidity, 55.0);
        assert!((s.temperature - 23.4).abs() < 1e-9);
    }

    #[test]
    fn decode_sign_bit_gives_negative_temperature() {
        // 2.0 °C below zero: decimal byte 0x80, checksum 60 + 2 + 0x80 = 190.
        let s = decode([60, 0, 2, 0x80, 190]);
        assert!(s.valid);
        assert_eq!(s.temperature, -2.0);

        let s = decode([60, 0, 1, 0x85, 194]);
        assert!((s.temperature + 1.5).abs() < 1e-9);
    }

    #[test]
    fn decode_bad_checksum_is_invalid() {
        let s = decode([55, 0, 23, 4, 81]);
        assert_eq!(s, ClimateSample::invalid());
    }

    #[test]
    fn checksum_wraps() {
        let s = decode([200, 0, 60, 0, 4]);
        assert!(s.valid);
        assert_eq!(s.humidity, 200.0);
    }

    #[test]
    fn pack_bits_msb_first() {
        let mut bits = [false; 40];
        bits[0] = true; // 0x80 in byte 0
        bits[15] = true; // 0x01 in byte 1
        bits[39] = true; // 0x01 in byte 4
        assert_eq!(pack_bits(&bits), [0x80, 0x01, 0, 0, 0x01]);
    }
}
