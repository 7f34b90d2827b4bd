use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::actuation::{PulseSource, WateringEvent};

/// Subscription filter for node snapshots.
pub(crate) const SNAPSHOT_FILTER: &str = "tele/+/snapshot";

const NOTICE_TITLE: &str = "Greenhouse";

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// The eight-field greenhouse snapshot published once per node poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub temperature_inside: f64,
    pub humidity_inside: f64,
    pub temperature_outside: f64,
    pub humidity_outside: f64,
    pub light: u8,
    pub moisture_plant_1: f64,
    pub moisture_plant_2: f64,
    pub sun_up: u8,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotMsg {
    pub ts: i64,
    pub host: String,
    pub fields: TelemetrySnapshot,
}

/// Push notification sent after a pulse completes.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract node_id from "tele/<node_id>/snapshot".
pub(crate) fn extract_node_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "snapshot" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Queue the snapshot subscription. Only a queued request is reported as
/// subscribed.
pub(crate) fn subscribe_snapshots(client: &AsyncClient) -> bool {
    match client.try_subscribe(SNAPSHOT_FILTER, QoS::AtLeastOnce) {
        Ok(()) => {
            info!("mqtt connected, subscribed to {SNAPSHOT_FILTER}");
            true
        }
        Err(e) => {
            error!("subscribe to {SNAPSHOT_FILTER} failed: {e}");
            false
        }
    }
}

pub(crate) fn watering_notice(event: &WateringEvent) -> Notice {
    let verb = match event.source {
        PulseSource::Command => "watered",
        PulseSource::Manual => "manually watered",
    };
    Notice {
        title: NOTICE_TITLE.to_string(),
        message: format!(
            "Plant {} {verb} for {} seconds",
            event.plant, event.duration_secs
        ),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    // -- extract_node_id ----------------------------------------------------

    #[test]
    fn extract_node_id_valid_topic() {
        assert_eq!(extract_node_id("tele/greenhouse/snapshot"), Some("greenhouse"));
    }

    #[test]
    fn extract_node_id_wrong_prefix() {
        assert_eq!(extract_node_id("foo/greenhouse/snapshot"), None);
    }

    #[test]
    fn extract_node_id_wrong_suffix() {
        assert_eq!(extract_node_id("tele/greenhouse/reading"), None);
    }

    #[test]
    fn extract_node_id_segment_count() {
        assert_eq!(extract_node_id("tele/snapshot"), None);
        assert_eq!(extract_node_id("tele/a/b/snapshot"), None);
        assert_eq!(extract_node_id(""), None);
    }

    #[test]
    fn extract_node_id_empty_node() {
        assert_eq!(extract_node_id("tele//snapshot"), None);
    }

    // -- subscribe_snapshots ------------------------------------------------

    fn client() -> (AsyncClient, rumqttc::EventLoop) {
        AsyncClient::new(rumqttc::MqttOptions::new("test-hub", "127.0.0.1", 1883), 4)
    }

    #[test]
    fn subscribe_reports_queued_request() {
        let (client, _eventloop) = client();
        assert!(subscribe_snapshots(&client));
    }

    #[test]
    fn subscribe_reports_failure_when_loop_is_gone() {
        let (client, eventloop) = client();
        drop(eventloop);
        assert!(!subscribe_snapshots(&client));
    }

    // -- SnapshotMsg deserialization ----------------------------------------

    #[test]
    fn snapshot_msg_deserialize_valid() {
        let json = r#"{"ts":1700000000,"host":"greenhouse","fields":{
            "temperature_inside":22.0,"humidity_inside":60.0,
            "temperature_outside":14.5,"humidity_outside":81.0,
            "light":1,"moisture_plant_1":48.3,"moisture_plant_2":1.0,"sun_up":0}}"#;
        let msg: SnapshotMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.ts, 1700000000);
        assert_eq!(msg.host, "greenhouse");
        assert_eq!(msg.fields.light, 1);
        assert_eq!(msg.fields.moisture_plant_1, 48.3);
        assert_eq!(msg.fields.sun_up, 0);
    }

    #[test]
    fn snapshot_msg_missing_field_fails() {
        let json = r#"{"ts":1,"host":"h","fields":{"temperature_inside":1.0}}"#;
        assert!(serde_json::from_str::<SnapshotMsg>(json).is_err());
    }

    #[test]
    fn snapshot_msg_extra_fields_ignored() {
        let json = r#"{"ts":1,"host":"h","extra":true,"fields":{
            "temperature_inside":0.0,"humidity_inside":0.0,
            "temperature_outside":0.0,"humidity_outside":0.0,
            "light":0,"moisture_plant_1":0.0,"moisture_plant_2":0.0,"sun_up":1}}"#;
        let msg: SnapshotMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.fields.sun_up, 1);
    }

    // -- watering_notice ----------------------------------------------------

    fn event(source: PulseSource) -> WateringEvent {
        WateringEvent {
            plant: 2,
            duration_secs: 7,
            source,
            finished_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn notice_for_command_pulse() {
        let n = watering_notice(&event(PulseSource::Command));
        assert_eq!(n.title, "Greenhouse");
        assert_eq!(n.message, "Plant 2 watered for 7 seconds");
    }

    #[test]
    fn notice_for_manual_pulse() {
        let n = watering_notice(&event(PulseSource::Manual));
        assert_eq!(n.message, "Plant 2 manually watered for 7 seconds");
    }

    #[test]
    fn notice_serializes_title_then_message() {
        let json = serde_json::to_string(&watering_notice(&event(PulseSource::Command))).unwrap();
        assert_eq!(
            json,
            r#"{"title":"Greenhouse","message":"Plant 2 watered for 7 seconds"}"#
        );
    }
}
