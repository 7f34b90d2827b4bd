use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;

use crate::telemetry::{TelemetrySink, TelemetrySnapshot};

/// Wire envelope published on `tele/<node_id>/snapshot`.
#[derive(Debug, Serialize)]
pub(crate) struct SnapshotMsg<'a> {
    pub(crate) ts: i64,
    pub(crate) host: &'a str,
    pub(crate) fields: TelemetrySnapshot,
}

/// Publishes snapshots to the hub, which persists them.
pub struct MqttSink {
    client: AsyncClient,
    node_id: String,
    topic: String,
}

impl MqttSink {
    pub fn new(client: AsyncClient, node_id: &str) -> Self {
        Self {
            client,
            node_id: node_id.to_string(),
            topic: snapshot_topic(node_id),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

pub(crate) fn snapshot_topic(node_id: &str) -> String {
    format!("tele/{node_id}/snapshot")
}

impl TelemetrySink for MqttSink {
    async fn write(&self, at: DateTime<Utc>, snapshot: TelemetrySnapshot) -> Result<()> {
        let msg = SnapshotMsg {
            ts: at.timestamp(),
            host: &self.node_id,
            fields: snapshot,
        };
        let payload = serde_json::to_vec(&msg).context("encode snapshot")?;
        // A full request queue (broker away) is an error, not a wait.
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("publish to {}", self.topic))?;
        Ok(())
    }
}
