//! Inbound watering commands: decode, validate, dispatch.
//!
//! A webhook command maps plant identifiers to durations, e.g.
//! `{"message": "{\"plant1\": 5, \"plant2\": \"3\"}"}`. The plant number is the
//! identifier's last character. Entries are dispatched in the order received,
//! best-effort: a rejected entry does not stop later ones and accepted pulses
//! are never rolled back. Decoding is all-or-nothing and happens before any
//! relay is touched.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::actuation::{ActuationController, ActuationError, PulseSource};

pub const DEFAULT_MANUAL_SECS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error("{key}: {cause}")]
    Rejected {
        key: String,
        #[source]
        cause: ActuationError,
    },
}

/// One decoded `plant -> seconds` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    pub key: String,
    pub plant: u8,
    pub duration_secs: i64,
}

/// Response body shared by every command endpoint.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: &'static str,
    pub message: String,
}

impl CommandResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a webhook body. `message` may hold the command object itself or a
/// string containing its JSON.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<CommandEntry>, CommandError> {
    let body: Value = serde_json::from_slice(body)
        .map_err(|e| CommandError::Malformed(format!("body is not JSON: {e}")))?;
    let message = body
        .get("message")
        .ok_or_else(|| CommandError::Malformed("missing \"message\" field".into()))?;

    let decoded;
    let command = match message {
        Value::Object(map) => map,
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s)
                .map_err(|e| CommandError::Malformed(format!("message is not JSON: {e}")))?;
            decoded.as_object().ok_or_else(|| {
                CommandError::Malformed("message must encode a JSON object".into())
            })?
        }
        _ => {
            return Err(CommandError::Malformed(
                "message must be an object or a JSON string".into(),
            ))
        }
    };
    parse_entries(command)
}

fn parse_entries(command: &Map<String, Value>) -> Result<Vec<CommandEntry>, CommandError> {
    if command.is_empty() {
        return Err(CommandError::Malformed("command has no entries".into()));
    }
    command
        .iter()
        .map(|(key, value)| {
            Ok(CommandEntry {
                key: key.clone(),
                plant: plant_from_key(key)?,
                duration_secs: duration_from_value(key, value)?,
            })
        })
        .collect()
}

fn plant_from_key(key: &str) -> Result<u8, CommandError> {
    key.chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
        .ok_or_else(|| CommandError::Malformed(format!("{key:?} does not end in a plant digit")))
}

fn duration_from_value(key: &str, value: &Value) -> Result<i64, CommandError> {
    let secs = match value {
        // Whole floats such as 5.0 count; 2.5 does not.
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    secs.ok_or_else(|| {
        CommandError::Malformed(format!("{key}: duration {value} is not an integer"))
    })
}

/// Decode the manual form. A missing duration means [`DEFAULT_MANUAL_SECS`].
pub fn parse_manual(
    plant: Option<&str>,
    duration: Option<&str>,
) -> Result<CommandEntry, CommandError> {
    let plant_str = plant
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CommandError::Malformed("missing plant".into()))?;
    let plant = plant_str
        .parse::<u8>()
        .map_err(|_| CommandError::Malformed(format!("plant {plant_str:?} is not a number")))?;

    let duration_secs = match duration.map(str::trim).filter(|s| !s.is_empty()) {
        None => DEFAULT_MANUAL_SECS,
        Some(d) => d
            .parse::<i64>()
            .map_err(|_| CommandError::Malformed(format!("duration {d:?} is not a number")))?,
    };

    Ok(CommandEntry {
        key: format!("plant{plant}"),
        plant,
        duration_secs,
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Pulse every entry in order. Returns the accepted entries, or the first
/// rejection once all entries have been attempted.
pub async fn dispatch(
    controller: &ActuationController,
    entries: &[CommandEntry],
    source: PulseSource,
) -> Result<Vec<CommandEntry>, CommandError> {
    let mut accepted = Vec::with_capacity(entries.len());
    let mut first_error = None;

    for entry in entries {
        match controller
            .pulse(entry.plant, entry.duration_secs, source)
            .await
        {
            Ok(()) => accepted.push(entry.clone()),
            Err(cause) => {
                warn!(key = %entry.key, "command entry rejected: {cause}");
                first_error.get_or_insert(CommandError::Rejected {
                    key: entry.key.clone(),
                    cause,
                });
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(count = accepted.len(), %source, "command accepted");
            Ok(accepted)
        }
    }
}

pub fn describe(accepted: &[CommandEntry]) -> String {
    let parts: Vec<String> = accepted
        .iter()
        .map(|e| format!("plant {} for {} seconds", e.plant, e.duration_secs))
        .collect();
    format!("Watering {}", parts.join(", "))
}

// ===========================================================================
// Tests
// ===========================================================================
