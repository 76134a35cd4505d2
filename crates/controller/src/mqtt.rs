//! Broker-facing gateway: topic layout, Home Assistant discovery document,
//! command parsing, and the connection event loop.
//!
//! The gateway owns all network I/O. State publishes requested by the
//! coordinator arrive over a channel and are delivered here, on the network
//! context; a publish requested while disconnected is dropped, and the
//! state is re-announced by whichever transition happens next while
//! connected.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::state::SharedUi;
use crate::valve::{ChangeOrigin, DisplaySurface, ValveCoordinator};

// ---------------------------------------------------------------------------
// Topic layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Topics {
    pub state: String,
    pub command: String,
    pub availability: String,
    pub discovery: String,
}

impl Topics {
    pub fn new(base: &str, discovery_prefix: &str) -> Self {
        Self {
            state: format!("{base}/state"),
            command: format!("{base}/set"),
            availability: format!("{base}/status"),
            discovery: format!("{discovery_prefix}/switch/{base}/config"),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Parse a command payload. Only the exact strings `ON` and `OFF` are
/// accepted; anything else is returned as an error for the caller to log
/// and drop.
pub fn parse_command(payload: &[u8]) -> Result<bool, String> {
    match payload {
        b"ON" => Ok(true),
        b"OFF" => Ok(false),
        other => Err(format!(
            "unknown valve command '{}'",
            String::from_utf8_lossy(other)
        )),
    }
}

/// Home Assistant switch discovery document, published retained at connect.
pub fn discovery_payload(cfg: &Config, topics: &Topics) -> String {
    serde_json::json!({
        "name": cfg.device.name,
        "unique_id": cfg.device.id,
        "state_topic": topics.state,
        "command_topic": topics.command,
        "payload_on": "ON",
        "payload_off": "OFF",
        "availability_topic": topics.availability,
        "payload_available": "online",
        "payload_not_available": "offline",
        "device": {
            "identifiers": [cfg.device.id],
            "name": cfg.device.id,
            "model": cfg.device.model,
            "manufacturer": cfg.device.manufacturer,
        }
    })
    .to_string()
}

/// Broker connection options, including the last-will that flips the
/// availability topic to `offline` if the connection drops uncleanly.
pub fn options(cfg: &Config, topics: &Topics) -> MqttOptions {
    let mut opts = MqttOptions::new(
        cfg.mqtt.client_id.as_str(),
        cfg.mqtt.host.as_str(),
        cfg.mqtt.port,
    );
    opts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs));
    if let (Some(user), Some(pass)) = (&cfg.mqtt.username, &cfg.mqtt.password) {
        opts.set_credentials(user.as_str(), pass.as_str());
    }
    opts.set_last_will(LastWill::new(
        topics.availability.as_str(),
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    opts
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Drive the broker connection: deliver inbound commands to the
/// coordinator, and carry the coordinator's state publishes out. Runs for
/// the life of the process; rumqttc handles reconnection.
pub async fn run<D: DisplaySurface>(
    client: AsyncClient,
    mut eventloop: EventLoop,
    coordinator: Arc<ValveCoordinator<D>>,
    mut publishes: mpsc::UnboundedReceiver<bool>,
    topics: Topics,
    discovery: String,
    ui: SharedUi,
) {
    let mut connected = false;

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    connected = true;
                    {
                        let mut st = ui.write();
                        st.mqtt_connected = true;
                        st.record_system("mqtt connected".to_string());
                    }
                    // Availability and discovery are announced on every
                    // (re)connect. The valve state is not: it is only
                    // published on transitions.
                    if let Err(e) = client
                        .publish(&topics.availability, QoS::AtLeastOnce, true, "online")
                        .await
                    {
                        warn!("failed to publish availability: {e}");
                    }
                    if let Err(e) = client
                        .publish(&topics.discovery, QoS::AtLeastOnce, true, discovery.clone())
                        .await
                    {
                        warn!("failed to publish discovery document: {e}");
                    }
                    if let Err(e) = client.subscribe(&topics.command, QoS::AtLeastOnce).await {
                        warn!("failed to subscribe to {}: {e}", topics.command);
                    } else {
                        info!(topic = %topics.command, "subscribed to command topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == topics.command => {
                    match parse_command(&p.payload) {
                        Ok(true) => coordinator.request_open(ChangeOrigin::RemoteCommand),
                        Ok(false) => coordinator.request_close(ChangeOrigin::RemoteCommand),
                        Err(msg) => {
                            warn!("{msg} (use ON/OFF)");
                            ui.write().record_error(msg);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("mqtt disconnected");
                    connected = false;
                    let mut st = ui.write();
                    st.mqtt_connected = false;
                    st.record_system("mqtt disconnected".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. reconnecting...");
                    connected = false;
                    {
                        let mut st = ui.write();
                        st.mqtt_connected = false;
                        st.record_error(format!("mqtt error: {e}"));
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            },
            Some(open) = publishes.recv() => {
                let payload = if open { "ON" } else { "OFF" };
                if connected {
                    // Retained so late subscribers see the last known state.
                    if let Err(e) = client
                        .publish(&topics.state, QoS::AtLeastOnce, true, payload)
                        .await
                    {
                        warn!("failed to publish valve state: {e}");
                    } else {
                        info!(state = payload, "published valve state");
                    }
                } else {
                    debug!(state = payload, "mqtt disconnected, dropping state publish");
                }
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
    use crate::config::Config;

    // -- parse_command ------------------------------------------------------

    #[test]
    fn parse_command_on() {
        assert_eq!(parse_command(b"ON"), Ok(true));
    }

    #[test]
    fn parse_command_off() {
        assert_eq!(parse_command(b"OFF"), Ok(false));
    }

    #[test]
    fn parse_command_is_case_sensitive() {
        assert!(parse_command(b"on").is_err());
        assert!(parse_command(b"Off").is_err());
    }

    #[test]
    fn parse_command_rejects_surrounding_whitespace() {
        assert!(parse_command(b" ON").is_err());
        assert!(parse_command(b"OFF\n").is_err());
    }

    #[test]
    fn parse_command_garbage() {
        assert!(parse_command(b"TOGGLE").is_err());
    }

    #[test]
    fn parse_command_empty() {
        assert!(parse_command(b"").is_err());
    }

    #[test]
    fn parse_command_error_names_the_payload() {
        let err = parse_command(b"PULSE").unwrap_err();
        assert!(err.contains("PULSE"), "got: {err}");
    }

    // -- Topics -------------------------------------------------------------

    #[test]
    fn topics_derive_from_base() {
        let t = Topics::new("water_valve", "homeassistant");
        assert_eq!(t.state, "water_valve/state");
        assert_eq!(t.command, "water_valve/set");
        assert_eq!(t.availability, "water_valve/status");
        assert_eq!(t.discovery, "homeassistant/switch/water_valve/config");
    }

    // -- Discovery document -------------------------------------------------

    #[test]
    fn discovery_payload_is_complete() {
        let cfg = Config::default();
        let topics = Topics::new(&cfg.mqtt.base_topic, &cfg.mqtt.discovery_prefix);
        let doc: serde_json::Value =
            serde_json::from_str(&discovery_payload(&cfg, &topics)).unwrap();

        assert_eq!(doc["state_topic"], "water_valve/state");
        assert_eq!(doc["command_topic"], "water_valve/set");
        assert_eq!(doc["availability_topic"], "water_valve/status");
        assert_eq!(doc["payload_on"], "ON");
        assert_eq!(doc["payload_off"], "OFF");
        assert_eq!(doc["payload_available"], "online");
        assert_eq!(doc["payload_not_available"], "offline");
        assert_eq!(doc["unique_id"], "water_valve_controller");
        assert_eq!(doc["device"]["identifiers"][0], "water_valve_controller");
        assert_eq!(doc["device"]["model"], "ESP32CYD");
    }

    // -- Options ------------------------------------------------------------

    #[test]
    fn options_carry_keep_alive_and_will() {
        let cfg = Config::default();
        let topics = Topics::new(&cfg.mqtt.base_topic, &cfg.mqtt.discovery_prefix);
        let opts = options(&cfg, &topics);

        assert_eq!(opts.keep_alive(), Duration::from_secs(30));
        let will = opts.last_will().expect("last will set");
        assert_eq!(will.topic, "water_valve/status");
        assert_eq!(will.message.as_ref(), b"offline");
        assert!(will.retain);
    }
}
