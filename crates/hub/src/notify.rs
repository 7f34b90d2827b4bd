//! Fire-and-forget watering notifications.
//!
//! Pulse tasks push [`WateringEvent`]s into an unbounded channel; this task
//! drains it, records each event and publishes a push notice. Delivery
//! failures are logged and dropped; nothing is retried.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, QoS};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::actuation::WateringEvent;
use crate::mqtt::watering_notice;
use crate::state::SharedState;

pub trait NoticePublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

impl NoticePublisher for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        AsyncClient::publish(self, topic, QoS::AtMostOnce, false, payload)
            .await
            .with_context(|| format!("publish to {topic}"))
    }
}

/// Runs until every sender is dropped.
pub async fn run<P: NoticePublisher>(
    mut events: mpsc::UnboundedReceiver<WateringEvent>,
    publisher: P,
    topic: String,
    state: SharedState,
) {
    while let Some(event) = events.recv().await {
        state.write().await.record_watering(&event);

        let notice = watering_notice(&event);
        let sent = match serde_json::to_vec(&notice) {
            Ok(payload) => publisher.publish(&topic, payload).await,
            Err(e) => Err(e.into()),
        };
        match sent {
            Ok(()) => info!(plant = event.plant, %topic, "{}", notice.message),
            Err(e) => {
                error!(plant = event.plant, "notification failed: {e:#}");
                state
                    .write()
                    .await
                    .record_error(format!("notification failed: {e:#}"));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::PulseSource;
    use crate::mqtt::Notice;
    use crate::state::{EventKind, SystemState};
    use anyhow::bail;
    use std::sync::{Arc, Mutex};
    use time::OffsetDateTime;

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        fail: bool,
    }

    impl NoticePublisher for Recorder {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            if self.fail {
                bail!("broker unreachable");
            }
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn event(plant: u8, source: PulseSource) -> WateringEvent {
        WateringEvent {
            plant,
            duration_secs: 5,
            source,
            finished_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn publishes_each_event_and_records_it() {
        let state = SystemState::shared();
        let recorder = Recorder::default();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(event(1, PulseSource::Command)).unwrap();
        tx.send(event(2, PulseSource::Manual)).unwrap();
        drop(tx);
        run(rx, recorder.clone(), "notify/watering".into(), state.clone()).await;

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "notify/watering");
        let first: Notice = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(first.message, "Plant 1 watered for 5 seconds");
        let second: Notice = serde_json::from_slice(&sent[1].1).unwrap();
        assert_eq!(second.message, "Plant 2 manually watered for 5 seconds");

        let st = state.read().await;
        let watering = st.events.iter().filter(|e| e.kind == EventKind::Watering).count();
        assert_eq!(watering, 2);
    }

    #[tokio::test]
    async fn delivery_failure_is_recorded_and_loop_continues() {
        let state = SystemState::shared();
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(event(1, PulseSource::Command)).unwrap();
        tx.send(event(2, PulseSource::Command)).unwrap();
        drop(tx);
        run(rx, recorder, "notify/watering".into(), state.clone()).await;

        let st = state.read().await;
        let errors = st.events.iter().filter(|e| e.kind == EventKind::Error).count();
        assert_eq!(errors, 2);
        assert!(st.events.back().unwrap().detail.contains("broker unreachable"));
    }
}
