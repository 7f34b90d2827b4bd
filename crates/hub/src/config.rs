//! TOML config for the hub: relay wiring and notification routing.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Most relay boards switch on a LOW input.
    pub active_low: bool,
    pub notify_topic: String,
    pub relays: Vec<RelayEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RelayEntry {
    pub plant: u8,
    pub gpio_pin: u8,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            active_low: true,
            notify_topic: "notify/watering".to_string(),
            relays: vec![
                RelayEntry {
                    plant: 1,
                    gpio_pin: 17,
                },
                RelayEntry {
                    plant: 2,
                    gpio_pin: 18,
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// Plant numbers are addressed by a single trailing digit in commands.
const VALID_PLANTS: std::ops::RangeInclusive<u8> = 1..=9;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl HubConfig {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        let topic = self.notify_topic.trim();
        if topic.is_empty() {
            errors.push("notify_topic is empty".to_string());
        } else if topic.contains(['+', '#']) {
            errors.push(format!(
                "notify_topic '{topic}' must not contain MQTT wildcards"
            ));
        }

        self.validate_relays(&mut errors);

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

    fn validate_relays(&self, errors: &mut Vec<String>) {
        if self.relays.is_empty() {
            errors.push("no relays configured".to_string());
        }

        let mut seen_plants: HashSet<u8> = HashSet::new();
        let mut seen_pins: HashSet<u8> = HashSet::new();

        for (i, r) in self.relays.iter().enumerate() {
            let ctx = format!("relays[{i}]");

            if !VALID_PLANTS.contains(&r.plant) {
                errors.push(format!(
                    "{ctx}: plant {} out of range [1, 9]",
                    r.plant
                ));
            } else if !seen_plants.insert(r.plant) {
                errors.push(format!("{ctx}: duplicate plant {}", r.plant));
            }

            if !VALID_GPIO_PINS.contains(&r.gpio_pin) {
                errors.push(format!(
                    "{ctx}: gpio_pin {} is not a valid BCM GPIO pin (must be 2-27)",
                    r.gpio_pin
                ));
            } else if !seen_pins.insert(r.gpio_pin) {
                errors.push(format!(
                    "{ctx}: gpio_pin {} already used by another relay",
                    r.gpio_pin
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file means the
/// built-in wiring.
pub fn load(path: &str) -> Result<HubConfig> {
    let config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using built-in defaults");
        HubConfig::default()
    };
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
