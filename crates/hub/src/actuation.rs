//! Timed watering pulses with a per-plant exclusive lock.
//!
//! Each relay walks `Idle -> Active -> Idle`. A pulse request that finds its
//! relay already active is rejected immediately; it never queues behind or
//! extends the running pulse. Different plants may run at the same time.
//!
//! The pulse itself runs on a spawned task, so `pulse` returns as soon as the
//! relay is ON. Completion is reported as a [`WateringEvent`] on the channel
//! handed to [`ActuationController::new`], after the relay is back to idle.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use crate::relay::RelayChannel;

pub const MIN_PULSE_SECS: i64 = 1;
pub const MAX_PULSE_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Idle,
    Active,
}

/// Where a pulse request came from; only changes the notification wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PulseSource {
    Command,
    Manual,
}

impl fmt::Display for PulseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WateringEvent {
    pub plant: u8,
    pub duration_secs: i64,
    pub source: PulseSource,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub plant: u8,
    pub gpio_pin: u8,
    pub state: RelayState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuationError {
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
    #[error("plant {plant} is already being watered")]
    RelayBusy { plant: u8 },
}

struct Slot {
    plant: u8,
    gpio_pin: u8,
    /// Held for the whole pulse; `try_lock` failing means Active.
    busy: Arc<Mutex<()>>,
    relay: Arc<Mutex<RelayChannel>>,
    state: Arc<watch::Sender<RelayState>>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ActuationController {
    slots: Arc<[Slot]>,
    events: mpsc::UnboundedSender<WateringEvent>,
}

impl ActuationController {
    /// Takes ownership of every relay. Relays are sorted by plant number.
    pub fn new(mut relays: Vec<RelayChannel>, events: mpsc::UnboundedSender<WateringEvent>) -> Self {
        relays.sort_by_key(|r| r.plant());
        let slots = relays
            .into_iter()
            .map(|relay| {
                let (state, _) = watch::channel(RelayState::Idle);
                Slot {
                    plant: relay.plant(),
                    gpio_pin: relay.gpio_pin(),
                    busy: Arc::new(Mutex::new(())),
                    relay: Arc::new(Mutex::new(relay)),
                    state: Arc::new(state),
                }
            })
            .collect();
        Self { slots, events }
    }

    fn slot(&self, plant: u8) -> Option<&Slot> {
        self.slots.iter().find(|s| s.plant == plant)
    }

    /// Start a pulse of `duration_secs` on `plant`. Returns once the relay is
    /// ON (or the request is rejected), not when the pulse ends. Must be
    /// called from within a tokio runtime.
    pub async fn pulse(
        &self,
        plant: u8,
        duration_secs: i64,
        source: PulseSource,
    ) -> Result<(), ActuationError> {
        let slot = self.slot(plant).ok_or_else(|| ActuationError::InvalidCommand {
            reason: format!("unknown plant {plant}"),
        })?;
        if !(MIN_PULSE_SECS..=MAX_PULSE_SECS).contains(&duration_secs) {
            return Err(ActuationError::InvalidCommand {
                reason: format!(
                    "duration {duration_secs}s outside {MIN_PULSE_SECS}..={MAX_PULSE_SECS}"
                ),
            });
        }

        let guard = Arc::clone(&slot.busy).try_lock_owned().map_err(|_| {
            warn!(plant, duration_secs, "pulse rejected: relay busy");
            ActuationError::RelayBusy { plant }
        })?;

        slot.relay.lock().await.switch(true);
        slot.state.send_replace(RelayState::Active);
        info!(plant, duration_secs, %source, "pulse started");

        let relay = Arc::clone(&slot.relay);
        let state = Arc::clone(&slot.state);
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration_secs as u64)).await;
            relay.lock().await.switch(false);
            state.send_replace(RelayState::Idle);
            drop(guard);

            let event = WateringEvent {
                plant,
                duration_secs,
                source,
                finished_at: OffsetDateTime::now_utc(),
            };
            if events.send(event).is_err() {
                warn!(plant, "notification channel closed, dropping watering event");
            }
        });
        Ok(())
    }

    pub fn status(&self) -> Vec<RelayStatus> {
        self.slots
            .iter()
            .map(|s| RelayStatus {
                plant: s.plant,
                gpio_pin: s.gpio_pin,
                state: *s.state.borrow(),
            })
            .collect()
    }

    /// Fail-safe: drive every relay OFF, including ones mid-pulse. The pulse
    /// task still finishes on schedule and re-issues its OFF.
    pub async fn all_off(&self) {
        for s in self.slots.iter() {
            s.relay.lock().await.switch(false);
            s.state.send_replace(RelayState::Idle);
        }
    }
}

#[cfg(test)]
impl ActuationController {
    pub fn state(&self, plant: u8) -> Option<RelayState> {
        self.slot(plant).map(|s| *s.state.borrow())
    }

    pub fn subscribe(&self, plant: u8) -> Option<watch::Receiver<RelayState>> {
        self.slot(plant).map(|s| s.state.subscribe())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{MockLine, MockProbe};
    use tokio::time::{sleep, Instant};

    fn controller() -> (
        ActuationController,
        mpsc::UnboundedReceiver<WateringEvent>,
        Vec<MockProbe>,
    ) {
        let mut probes = Vec::new();
        let relays = [(1, 17), (2, 18)]
            .into_iter()
            .map(|(plant, pin)| {
                let line = MockLine::new(pin);
                probes.push(line.probe());
                RelayChannel::new(plant, pin, Box::new(line), true)
            })
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        (ActuationController::new(relays, tx), rx, probes)
    }

    fn assert_pulse_length(start: Instant, secs: u64) {
        let elapsed = start.elapsed();
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(10),
            "pulse lasted {elapsed:?}"
        );
    }

    // -- pulse timing -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn pulse_runs_for_requested_duration() {
        let (ctl, mut rx, probes) = controller();
        let start = Instant::now();

        ctl.pulse(1, 5, PulseSource::Command).await.unwrap();
        assert_eq!(ctl.state(1), Some(RelayState::Active));
        assert!(!probes[0].is_high(), "active-low relay should be driven LOW");

        sleep(Duration::from_millis(4_900)).await;
        assert_eq!(ctl.state(1), Some(RelayState::Active));

        let event = rx.recv().await.unwrap();
        assert_eq!(ctl.state(1), Some(RelayState::Idle));
        assert!(probes[0].is_high());
        assert_pulse_length(start, 5);
        assert_eq!(event.plant, 1);
        assert_eq!(event.duration_secs, 5);
        assert_eq!(event.source, PulseSource::Command);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_event_per_pulse() {
        let (ctl, mut rx, _) = controller();
        ctl.pulse(2, 3, PulseSource::Manual).await.unwrap();

        sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn event_is_sent_after_idle() {
        let (ctl, mut rx, _) = controller();
        let mut watch = ctl.subscribe(1).unwrap();
        ctl.pulse(1, 2, PulseSource::Command).await.unwrap();

        let _ = rx.recv().await.unwrap();
        assert_eq!(*watch.borrow_and_update(), RelayState::Idle);
    }

    // -- busy ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn second_pulse_on_same_plant_is_busy() {
        let (ctl, mut rx, probes) = controller();
        let start = Instant::now();

        ctl.pulse(1, 5, PulseSource::Command).await.unwrap();
        sleep(Duration::from_secs(2)).await;

        let err = ctl.pulse(1, 5, PulseSource::Command).await.unwrap_err();
        assert_eq!(err, ActuationError::RelayBusy { plant: 1 });
        // construction OFF + ON only; the rejected call wrote nothing
        assert_eq!(probes[0].writes(), 2);

        let _ = rx.recv().await.unwrap();
        assert_pulse_length(start, 5);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn plant_is_free_again_after_pulse() {
        let (ctl, mut rx, _) = controller();
        ctl.pulse(1, 1, PulseSource::Command).await.unwrap();
        let _ = rx.recv().await.unwrap();
        assert!(ctl.pulse(1, 1, PulseSource::Command).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn different_plants_run_concurrently() {
        let (ctl, mut rx, _) = controller();
        ctl.pulse(1, 5, PulseSource::Command).await.unwrap();
        ctl.pulse(2, 3, PulseSource::Command).await.unwrap();
        assert_eq!(ctl.state(1), Some(RelayState::Active));
        assert_eq!(ctl.state(2), Some(RelayState::Active));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.plant, 2);
        assert_eq!(ctl.state(1), Some(RelayState::Active));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.plant, 1);
    }

    // -- validation ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn out_of_range_durations_are_invalid() {
        let (ctl, _rx, probes) = controller();
        for secs in [0, 61, -3] {
            let err = ctl.pulse(1, secs, PulseSource::Command).await.unwrap_err();
            assert!(matches!(err, ActuationError::InvalidCommand { .. }), "{secs}");
        }
        assert_eq!(ctl.state(1), Some(RelayState::Idle));
        assert_eq!(probes[0].writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_durations_are_accepted() {
        let (ctl, _rx, _) = controller();
        assert!(ctl.pulse(1, MIN_PULSE_SECS, PulseSource::Command).await.is_ok());
        assert!(ctl.pulse(2, MAX_PULSE_SECS, PulseSource::Command).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_plant_is_invalid() {
        let (ctl, _rx, _) = controller();
        let err = ctl.pulse(3, 5, PulseSource::Command).await.unwrap_err();
        assert_eq!(
            err,
            ActuationError::InvalidCommand {
                reason: "unknown plant 3".into()
            }
        );
    }

    // -- status / shutdown --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn status_lists_relays_in_plant_order() {
        let (ctl, _rx, _) = controller();
        ctl.pulse(2, 5, PulseSource::Command).await.unwrap();
        let status = ctl.status();
        assert_eq!(status.len(), 2);
        assert_eq!((status[0].plant, status[0].gpio_pin), (1, 17));
        assert_eq!(status[0].state, RelayState::Idle);
        assert_eq!(status[1].state, RelayState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn all_off_forces_active_relays_off() {
        let (ctl, _rx, probes) = controller();
        ctl.pulse(1, 30, PulseSource::Command).await.unwrap();
        ctl.all_off().await;
        assert!(probes[0].is_high());
        assert_eq!(ctl.state(1), Some(RelayState::Idle));
    }
}
