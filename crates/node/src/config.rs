//! TOML config for the poller: site, pins, probe calibration, cadence.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::adc::{ADS1115_MAX, DEFAULT_ADDR, MAX_CHANNEL};
use crate::calibration::CalibrationRange;
use crate::moisture::PLANT_COUNT;
use crate::solar::Location;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default = "default_location")]
    pub location: Location,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub climate: ClimateConfig,
    #[serde(default)]
    pub adc: AdcConfig,
    #[serde(default = "default_plants")]
    pub plants: Vec<PlantEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    pub gpio_pin: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClimateConfig {
    pub inside_gpio: u8,
    pub outside_gpio: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdcConfig {
    pub i2c_addr: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantEntry {
    pub plant: u8,
    pub adc_channel: u8,
    pub raw_min: i32,
    pub raw_max: i32,
}

impl PlantEntry {
    pub fn range(&self) -> CalibrationRange {
        CalibrationRange::new(self.raw_min, self.raw_max)
    }
}

// ---------------------------------------------------------------------------
// Defaults (the deployed greenhouse)
// ---------------------------------------------------------------------------

const DEFAULT_INTERVAL_SEC: u64 = 20;
const DEFAULT_RAW_MIN: i32 = 8602;
const DEFAULT_RAW_MAX: i32 = 17590;

fn default_interval_sec() -> u64 {
    DEFAULT_INTERVAL_SEC
}

fn default_location() -> Location {
    Location {
        name: "Toornwerd".into(),
        latitude: 53.3417,
        longitude: 6.4639,
        timezone: "Europe/Amsterdam".into(),
    }
}

/// Plant 1 on AIN0, plant 2 on AIN3.
fn default_plants() -> Vec<PlantEntry> {
    [(1, 0), (2, 3)]
        .into_iter()
        .map(|(plant, adc_channel)| PlantEntry {
            plant,
            adc_channel,
            raw_min: DEFAULT_RAW_MIN,
            raw_max: DEFAULT_RAW_MAX,
        })
        .collect()
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_sec: DEFAULT_INTERVAL_SEC,
        }
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self { gpio_pin: 27 }
    }
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            inside_gpio: 4,
            outside_gpio: 22,
        }
    }
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            i2c_addr: DEFAULT_ADDR,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            location: default_location(),
            light: LightConfig::default(),
            climate: ClimateConfig::default(),
            adc: AdcConfig::default(),
            plants: default_plants(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// BCM pins on the 40-pin header; 0-1 are the ID EEPROM.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

impl NodeConfig {
    /// Validate every entry, reporting all violations at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.poll.interval_sec == 0 {
            errors.push("poll.interval_sec must be positive".to_string());
        }

        self.validate_location(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_plants(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_location(&self, errors: &mut Vec<String>) {
        let loc = &self.location;
        if !(-90.0..=90.0).contains(&loc.latitude) {
            errors.push(format!("location.latitude {} out of range [-90, 90]", loc.latitude));
        }
        if !(-180.0..=180.0).contains(&loc.longitude) {
            errors.push(format!(
                "location.longitude {} out of range [-180, 180]",
                loc.longitude
            ));
        }
        if loc.timezone.parse::<Tz>().is_err() {
            errors.push(format!("location.timezone {:?} is not an IANA zone", loc.timezone));
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<u8> = HashSet::new();
        for (name, pin) in [
            ("light.gpio_pin", self.light.gpio_pin),
            ("climate.inside_gpio", self.climate.inside_gpio),
            ("climate.outside_gpio", self.climate.outside_gpio),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!("{name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"));
            } else if !seen.insert(pin) {
                errors.push(format!("{name} {pin} is already used"));
            }
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        if self.plants.len() != PLANT_COUNT {
            errors.push(format!(
                "expected exactly {PLANT_COUNT} [[plants]] entries, got {}",
                self.plants.len()
            ));
        }

        let mut seen_plants: HashSet<u8> = HashSet::new();
        let mut seen_channels: HashSet<u8> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = format!("plants[{i}]");

            if !(1..=PLANT_COUNT as u8).contains(&p.plant) {
                errors.push(format!(
                    "{ctx}: plant {} out of range [1, {PLANT_COUNT}]",
                    p.plant
                ));
            } else if !seen_plants.insert(p.plant) {
                errors.push(format!("{ctx}: duplicate plant {}", p.plant));
            }

            if p.adc_channel > MAX_CHANNEL {
                errors.push(format!(
                    "{ctx}: adc_channel {} out of range [0, {MAX_CHANNEL}]",
                    p.adc_channel
                ));
            } else if !seen_channels.insert(p.adc_channel) {
                errors.push(format!(
                    "{ctx}: adc_channel {} is already used by another plant",
                    p.adc_channel
                ));
            }

            for (field, raw) in [("raw_min", p.raw_min), ("raw_max", p.raw_max)] {
                if !(0..=ADS1115_MAX).contains(&raw) {
                    errors.push(format!(
                        "{ctx}: {field} {raw} out of ADS1115 range [0, {ADS1115_MAX}]"
                    ));
                }
            }
        }
    }

    /// Plant entries ordered by plant number.
    pub fn plants_in_order(&self) -> Vec<&PlantEntry> {
        let mut plants: Vec<&PlantEntry> = self.plants.iter().collect();
        plants.sort_by_key(|p| p.plant);
        plants
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse and validate a TOML config. A missing file yields the
/// built-in defaults.
pub fn load(path: &str) -> Result<NodeConfig> {
    let config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using built-in defaults");
        NodeConfig::default()
    };

    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    for p in config.plants.iter().filter(|p| p.range().is_degenerate()) {
        tracing::warn!(
            plant = p.plant,
            raw = p.raw_min,
            "zero-width calibration range, plant will always read 0%"
        );
    }

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_validation_err(cfg: &NodeConfig, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[poll]
interval_sec = 30

[location]
name = "Utrecht"
latitude = 52.09
longitude = 5.12
timezone = "Europe/Amsterdam"

[light]
gpio_pin = 5

[climate]
inside_gpio = 6
outside_gpio = 13

[adc]
i2c_addr = 0x49

[[plants]]
plant = 1
adc_channel = 1
raw_min = 900
raw_max = 10000

[[plants]]
plant = 2
adc_channel = 2
raw_min = 950
raw_max = 9800
"#;
        let cfg: NodeConfig = toml::from_str(toml_str).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.poll.interval_sec, 30);
        assert_eq!(cfg.location.name, "Utrecht");
        assert_eq!(cfg.light.gpio_pin, 5);
        assert_eq!(cfg.adc.i2c_addr, 0x49);
        assert_eq!(cfg.plants[1].range(), CalibrationRange::new(950, 9800));
    }

    #[test]
    fn empty_file_uses_deployment_defaults() {
        let cfg: NodeConfig = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.poll.interval_sec, 20);
        assert_eq!(cfg.location.timezone, "Europe/Amsterdam");
        assert_eq!(cfg.light.gpio_pin, 27);
        assert_eq!(cfg.climate.inside_gpio, 4);
        assert_eq!(cfg.climate.outside_gpio, 22);
        let channels: Vec<u8> = cfg.plants.iter().map(|p| p.adc_channel).collect();
        assert_eq!(channels, vec![0, 3]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load("/nonexistent/greenhouse-node.toml").unwrap();
        assert_eq!(cfg.plants.len(), PLANT_COUNT);
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.poll.interval_sec = 0;
        assert_validation_err(&cfg, "interval_sec must be positive");
    }

    #[test]
    fn latitude_out_of_range_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.location.latitude = 91.0;
        assert_validation_err(&cfg, "latitude 91 out of range");
    }

    #[test]
    fn unknown_timezone_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.location.timezone = "Europe/Atlantis".into();
        assert_validation_err(&cfg, "not an IANA zone");
    }

    #[test]
    fn reserved_gpio_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.light.gpio_pin = 1;
        assert_validation_err(&cfg, "light.gpio_pin 1 is not a valid BCM GPIO pin");
    }

    #[test]
    fn shared_gpio_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.climate.outside_gpio = cfg.climate.inside_gpio;
        assert_validation_err(&cfg, "climate.outside_gpio 4 is already used");
    }

    #[test]
    fn wrong_plant_count_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.plants.pop();
        assert_validation_err(&cfg, "expected exactly 2 [[plants]] entries, got 1");
    }

    #[test]
    fn duplicate_plant_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.plants[1].plant = 1;
        assert_validation_err(&cfg, "duplicate plant 1");
    }

    #[test]
    fn adc_channel_out_of_range_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.plants[0].adc_channel = 4;
        assert_validation_err(&cfg, "adc_channel 4 out of range");
    }

    #[test]
    fn shared_adc_channel_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.plants[1].adc_channel = 0;
        assert_validation_err(&cfg, "adc_channel 0 is already used");
    }

    #[test]
    fn raw_bounds_outside_adc_range_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.plants[0].raw_max = 40000;
        assert_validation_err(&cfg, "raw_max 40000 out of ADS1115 range");
    }

    #[test]
    fn degenerate_calibration_is_allowed() {
        let mut cfg = NodeConfig::default();
        cfg.plants[0].raw_min = 9000;
        cfg.plants[0].raw_max = 9000;
        cfg.validate().unwrap();
    }

    #[test]
    fn multiple_errors_reported_together() {
        let mut cfg = NodeConfig::default();
        cfg.poll.interval_sec = 0;
        cfg.location.longitude = 200.0;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("2 errors"), "got: {msg}");
    }

    #[test]
    fn plants_in_order_sorts_by_number() {
        let mut cfg = NodeConfig::default();
        cfg.plants.reverse();
        let order: Vec<u8> = cfg.plants_in_order().iter().map(|p| p.plant).collect();
        assert_eq!(order, vec![1, 2]);
    }
}
