mod adc;
mod calibration;
mod climate;
mod config;
mod dht11;
mod hardware;
mod moisture;
#[cfg(not(feature = "gpio"))]
mod sim;
mod sink;
mod solar;
mod telemetry;
mod window;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable either the `sim` or the `gpio` feature");

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use climate::EnvironmentReader;
use config::NodeConfig;
use hardware::DigitalInput;
use moisture::{MoistureBank, PlantProbe};
use sink::MqttSink;
use solar::SolarClock;
use telemetry::TelemetryAggregator;

/// Sensors built from the config, ready to hand to the aggregator.
struct Sensors {
    probes: [PlantProbe; moisture::PLANT_COUNT],
    light: Box<dyn DigitalInput>,
    inside: EnvironmentReader,
    outside: EnvironmentReader,
}

#[cfg(feature = "gpio")]
fn build_sensors(cfg: &NodeConfig) -> Result<Sensors> {
    use adc::{Ads1115, Ads1115Channel};
    use dht11::Dht11;
    use hardware::GpioInput;
    use rppal::gpio::Gpio;

    let gpio = Gpio::new()?;
    let ads = Ads1115::open(cfg.adc.i2c_addr)?;

    let plants = cfg.plants_in_order();
    let probe = |i: usize| -> Result<PlantProbe> {
        let p = plants[i];
        let channel = Ads1115Channel::new(ads.clone(), p.adc_channel)?;
        Ok(PlantProbe::new(p.plant, Box::new(channel), p.range()))
    };

    Ok(Sensors {
        probes: [probe(0)?, probe(1)?],
        light: Box::new(GpioInput::new(&gpio, cfg.light.gpio_pin)?),
        inside: EnvironmentReader::new("inside", Box::new(Dht11::new(&gpio, cfg.climate.inside_gpio)?)),
        outside: EnvironmentReader::new(
            "outside",
            Box::new(Dht11::new(&gpio, cfg.climate.outside_gpio)?),
        ),
    })
}

#[cfg(not(feature = "gpio"))]
fn build_sensors(cfg: &NodeConfig) -> Result<Sensors> {
    use sim::{Scenario, SimClimate, SimLight, SimSoilProbe};

    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    info!(%scenario, "using simulated sensors (build with --features gpio for hardware)");

    let plants = cfg.plants_in_order();
    let probe = |i: usize| {
        let p = plants[i];
        PlantProbe::new(p.plant, Box::new(SimSoilProbe::new(p.range(), scenario)), p.range())
    };

    Ok(Sensors {
        probes: [probe(0), probe(1)],
        light: Box::new(SimLight),
        inside: EnvironmentReader::new("inside", Box::new(SimClimate::new(22.0, 65.0, scenario))),
        outside: EnvironmentReader::new("outside", Box::new(SimClimate::new(14.0, 80.0, scenario))),
    })
}

#[tokio::main(flavor = "current_thread")]
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
    let node_id = env::var("NODE_ID").unwrap_or_else(|_| "greenhouse".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "node.toml".to_string());

    let mut cfg = config::load(&config_path)?;
    if let Some(secs) = env::var("SAMPLE_EVERY_S").ok().and_then(|s| s.parse().ok()) {
        cfg.poll.interval_sec = secs;
        cfg.validate()?;
    }

    // ── Sensors ─────────────────────────────────────────────────────
    let sensors = build_sensors(&cfg)?;
    let aggregator = TelemetryAggregator::new(
        MoistureBank::new(sensors.probes),
        sensors.light,
        sensors.inside,
        sensors.outside,
        SolarClock::new(cfg.location.clone()),
    );

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(format!("greenhouse-node-{node_id}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // Publish-only, but the event loop must run to keep the session alive.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("node connected to mqtt"),
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let sink = MqttSink::new(client, &node_id);
    info!(
        node = %node_id,
        topic = sink.topic(),
        site = %cfg.location.name,
        "greenhouse node starting"
    );

    let interval = Duration::from_secs(cfg.poll.interval_sec);
    tokio::select! {
        _ = aggregator.run(sink, interval) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
