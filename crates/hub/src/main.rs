mod actuation;
mod config;
mod db;
mod gateway;
mod mqtt;
mod notify;
mod relay;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use std::{env, time::Duration};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use actuation::ActuationController;
use config::HubConfig;
use db::Db;
use mqtt::{extract_node_id, subscribe_snapshots, SnapshotMsg};
use relay::RelayChannel;
use state::{SharedState, SystemState};
use web::AppState;

#[cfg(feature = "gpio")]
fn build_relays(cfg: &HubConfig, active_low: bool) -> Result<Vec<RelayChannel>> {
    use relay::GpioLine;
    use rppal::gpio::Gpio;

    let gpio = Gpio::new()?;
    cfg.relays
        .iter()
        .map(|r| {
            let line = GpioLine::open(&gpio, r.gpio_pin)?;
            Ok(RelayChannel::new(r.plant, r.gpio_pin, Box::new(line), active_low))
        })
        .collect()
}

#[cfg(not(feature = "gpio"))]
fn build_relays(cfg: &HubConfig, active_low: bool) -> Result<Vec<RelayChannel>> {
    use relay::MockLine;

    info!("using mock relay outputs (build with --features gpio for hardware)");
    Ok(cfg
        .relays
        .iter()
        .map(|r| {
            RelayChannel::new(
                r.plant,
                r.gpio_pin,
                Box::new(MockLine::new(r.gpio_pin)),
                active_low,
            )
        })
        .collect())
}

/// Decode, persist and record one node snapshot. Never fails the loop.
async fn handle_snapshot(node_id: &str, payload: &[u8], db: &Db, shared: &SharedState) {
    let msg = match serde_json::from_slice::<SnapshotMsg>(payload) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(node = node_id, "bad snapshot json: {e}");
            shared
                .write()
                .await
                .record_error(format!("bad snapshot json from {node_id}: {e}"));
            return;
        }
    };
    if msg.host != node_id {
        warn!(node = node_id, host = %msg.host, "snapshot host does not match topic");
    }

    info!(node = node_id, ts = msg.ts, snapshot = ?msg.fields, "telemetry");

    if let Err(e) = db.insert_snapshot(msg.ts, node_id, &msg.fields).await {
        error!(node = node_id, "db: insert_snapshot failed: {e:#}");
    }
    shared.write().await.record_snapshot(node_id, msg.fields);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL")
        .unwrap_or_else(|_| "sqlite:greenhouse.db?mode=rwc".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "hub.toml".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (relay wiring) ──────────────────────────────────
    let cfg = config::load(&config_path)?;
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(cfg.active_low);

    // ── Relays + actuation ──────────────────────────────────────────
    let relays = build_relays(&cfg, active_low)?;
    info!(relays = relays.len(), active_low, "relays initialised OFF");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let controller = ActuationController::new(relays, events_tx);

    // ── Shared state (ephemeral, for the web UI) ────────────────────
    let shared = SystemState::shared();
    shared.write().await.record_system("hub started".to_string());

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("greenhouse-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    // ── Notifications ───────────────────────────────────────────────
    tokio::spawn(notify::run(
        events_rx,
        client.clone(),
        cfg.notify_topic.clone(),
        shared.clone(),
    ));

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        controller: controller.clone(),
        shared: shared.clone(),
        db: db.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            error!("{e:#}");
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            polled = eventloop.poll() => {
                match polled {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        if let Some(node_id) = extract_node_id(&p.topic) {
                            handle_snapshot(node_id, &p.payload, &db, &shared).await;
                        } else {
                            warn!(topic = %p.topic, "unhandled topic");
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean session: subscriptions do not survive a reconnect.
                        subscribe_snapshots(&client);
                        let mut st = shared.write().await;
                        st.mqtt_connected = true;
                        st.record_system("mqtt connected".to_string());
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("mqtt disconnected");
                        let mut st = shared.write().await;
                        st.mqtt_connected = false;
                        st.record_system("mqtt disconnected".to_string());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("mqtt error: {e}. reconnecting...");
                        {
                            let mut st = shared.write().await;
                            st.mqtt_connected = false;
                            st.record_error(format!("mqtt error: {e}"));
                        }
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
    }

    // Fail-safe: never leave water running after exit.
    controller.all_off().await;
    info!("all relays OFF");
    Ok(())
}
