//! TOML config file loading and validation: broker endpoint, topic layout,
//! device identity for discovery, valve timing, and the local web surface.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Longest permitted auto-close duration (24 hours).
const MAX_OPEN_SECS: u32 = 86_400;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub device: DeviceConfig,
    pub valve: ValveConfig,
    pub web: WebConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub base_topic: String,
    pub discovery_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "water-valve-controller".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            base_topic: "water_valve".to_string(),
            discovery_prefix: "homeassistant".to_string(),
        }
    }
}

/// Identity block for the Home Assistant discovery document.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "water_valve_controller".to_string(),
            name: "Water Valve".to_string(),
            model: "ESP32CYD".to_string(),
            manufacturer: "Custom".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ValveConfig {
    /// Auto-close duration in seconds.
    pub open_secs: u32,
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self { open_secs: 300 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_mqtt(&mut errors);
        self.validate_device(&mut errors);
        self.validate_valve(&mut errors);

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

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;

        if m.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".to_string());
        }
        if m.keep_alive_secs == 0 {
            errors.push("mqtt.keep_alive_secs must be positive".to_string());
        }

        for (field, value) in [
            ("mqtt.base_topic", &m.base_topic),
            ("mqtt.discovery_prefix", &m.discovery_prefix),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{field} is empty"));
            } else if value.contains(['+', '#']) {
                errors.push(format!("{field} '{value}' contains an MQTT wildcard"));
            } else if value.starts_with('/') || value.ends_with('/') {
                errors.push(format!("{field} '{value}' has a leading or trailing '/'"));
            }
        }

        if m.username.is_some() != m.password.is_some() {
            errors.push("mqtt.username and mqtt.password must be set together".to_string());
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        if self.device.id.trim().is_empty() {
            errors.push("device.id is empty".to_string());
        }
        if self.device.name.trim().is_empty() {
            errors.push("device.name is empty".to_string());
        }
    }

    fn validate_valve(&self, errors: &mut Vec<String>) {
        let secs = self.valve.open_secs;
        if secs == 0 {
            errors.push("valve.open_secs must be positive".to_string());
        } else if secs > MAX_OPEN_SECS {
            errors.push(format!(
                "valve.open_secs {secs} exceeds the maximum of {MAX_OPEN_SECS}"
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file is not an
/// error: the device boots on built-in defaults (local broker, 5-minute
/// countdown) so it can run unconfigured on a LAN.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::info!(path, "no config file found, using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
