mod config;
mod countdown;
mod mqtt;
mod state;
mod valve;
mod web;

use anyhow::Result;
use parking_lot::RwLock;
use rumqttc::AsyncClient;
use std::{env, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use countdown::CountdownTimer;
use state::{SharedUi, UiPanel, UiState};
use valve::ValveCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "controller.toml".to_string());
    let cfg = config::load(&config_path)?;
    info!(
        broker = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        open_secs = cfg.valve.open_secs,
        "config loaded"
    );

    // ── Display surface ─────────────────────────────────────────────
    let ui: SharedUi = Arc::new(RwLock::new(UiState::new(cfg.valve.open_secs)));
    ui.write().record_system("controller started".to_string());

    // ── Coordinator ─────────────────────────────────────────────────
    let (timer, mut ticks) = CountdownTimer::new();
    let (coordinator, publishes) =
        ValveCoordinator::new(UiPanel::new(ui.clone()), timer, cfg.valve.open_secs);
    let coordinator = Arc::new(coordinator);

    // ── Web surface (local toggle + status) ─────────────────────────
    let app = web::AppState {
        ui: ui.clone(),
        coordinator: coordinator.clone(),
    };
    let web_port = cfg.web.port;
    tokio::spawn(async move {
        web::serve(app, web_port).await;
    });

    // ── Timer adapter: countdown ticks into the coordinator ─────────
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            while ticks.recv().await.is_some() {
                coordinator.on_timer_tick();
            }
        });
    }

    // ── MQTT ────────────────────────────────────────────────────────
    let topics = mqtt::Topics::new(&cfg.mqtt.base_topic, &cfg.mqtt.discovery_prefix);
    let discovery = mqtt::discovery_payload(&cfg, &topics);
    let (client, eventloop) = AsyncClient::new(mqtt::options(&cfg, &topics), 20);

    mqtt::run(client, eventloop, coordinator, publishes, topics, discovery, ui).await;

    Ok(())
}
