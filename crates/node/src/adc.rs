//! ADS1115 16-bit ADC over I2C for the soil moisture probes.
//!
//! Single-ended, PGA ±4.096 V, 128 SPS, single-shot mode. All four inputs
//! share one bus, so each probe gets an [`Ads1115Channel`] handle onto a
//! shared driver.

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       — write 1 to start single-shot conversion
//   [14:12] MUX      — input multiplexer (channel selection)
//   [11:9]  PGA      — programmable gain amplifier
//   [8]     MODE     — 0 = continuous, 1 = single-shot
//   [7:5]   DR       — data rate
//   [4:2]   comparator mode/polarity/latch
//   [1:0]   COMP_QUE — 11 = comparator off

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;
/// AIN0..AIN3 against GND.
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

pub const MAX_CHANNEL: u8 = 3;

/// Default I2C address with ADDR tied to GND.
pub const DEFAULT_ADDR: u16 = 0x48;

/// Largest single-ended conversion result.
pub const ADS1115_MAX: i32 = 32767;

#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel as usize] << MUX_SHIFT)
}

#[cfg(feature = "gpio")]
mod driver {
    use super::*;
    use crate::hardware::AnalogChannel;
    use anyhow::{anyhow, ensure, Result};
    use rppal::i2c::I2c;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    /// Conversion result register (read-only, 16-bit signed).
    const REG_CONVERSION: u8 = 0x00;
    /// Configuration register (read/write).
    const REG_CONFIG: u8 = 0x01;

    /// ~7.8 ms conversion at 128 SPS, plus margin.
    const CONVERSION_WAIT: Duration = Duration::from_millis(9);

    /// Conversion-ready flag when the config register is read back.
    const OS_READY_BIT: u16 = 1 << 15;

    pub struct Ads1115 {
        i2c: I2c,
    }

    impl Ads1115 {
        /// Open I2C bus 1 and address the converter at `addr`.
        pub fn open(addr: u16) -> Result<Arc<Mutex<Self>>> {
            let mut i2c = I2c::new()?;
            i2c.set_slave_address(addr)?;
            tracing::info!(addr = format_args!("0x{addr:02x}"), "ads1115 initialised");
            Ok(Arc::new(Mutex::new(Self { i2c })))
        }

        fn read_channel(&mut self, channel: u8) -> Result<i16> {
            self.i2c
                .block_write(REG_CONFIG, &config_for_channel(channel).to_be_bytes())?;
            thread::sleep(CONVERSION_WAIT);

            for _ in 0..3 {
                let mut buf = [0u8; 2];
                self.i2c.block_read(REG_CONFIG, &mut buf)?;
                if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                    break;
                }
                thread::sleep(Duration::from_millis(2));
            }

            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONVERSION, &mut buf)?;
            Ok(i16::from_be_bytes(buf))
        }
    }

    /// One single-ended input on a shared converter.
    pub struct Ads1115Channel {
        adc: Arc<Mutex<Ads1115>>,
        channel: u8,
    }

    impl Ads1115Channel {
        pub fn new(adc: Arc<Mutex<Ads1115>>, channel: u8) -> Result<Self> {
            ensure!(
                channel <= MAX_CHANNEL,
                "ADS1115 channel {channel} out of range (0–{MAX_CHANNEL})"
            );
            Ok(Self { adc, channel })
        }
    }

    impl AnalogChannel for Ads1115Channel {
        fn read_raw(&mut self) -> Result<i32> {
            let mut adc = self
                .adc
                .lock()
                .map_err(|_| anyhow!("ads1115 lock poisoned"))?;
            let raw = adc.read_channel(self.channel)?;
            // Single-ended results are non-negative; clamp against bus noise.
            Ok(i32::from(raw).clamp(0, ADS1115_MAX))
        }
    }
}

#[cfg(feature = "gpio")]
pub use driver::{Ads1115, Ads1115Channel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_register_per_channel() {
        assert_eq!(config_for_channel(0), 0xC383);
        assert_eq!(config_for_channel(1), 0xD383);
        assert_eq!(config_for_channel(2), 0xE383);
        assert_eq!(config_for_channel(3), 0xF383);
    }

    #[test]
    fn config_base_fields() {
        assert_eq!((CONFIG_BASE >> 15) & 1, 1, "OS starts a conversion");
        assert_eq!((CONFIG_BASE >> 9) & 0b111, 0b001, "PGA ±4.096 V");
        assert_eq!((CONFIG_BASE >> 8) & 1, 1, "single-shot");
        assert_eq!((CONFIG_BASE >> 5) & 0b111, 0b100, "128 SPS");
        assert_eq!(CONFIG_BASE & 0b11, 0b11, "comparator disabled");
    }
}
