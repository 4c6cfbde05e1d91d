//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.mysgw/config.json`). The
//! `gateway` group selects the active transport and the protocol options;
//! per-transport groups carry the connection settings. An unsupported
//! gateway type or a missing required group is fatal at startup, before any
//! transport is opened.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed baud rate of the serial transport (MySensors serial gateways run
/// at 115200).
pub const SERIAL_BAUD: u32 = 115_200;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway transport selection and protocol options. Required.
    pub gateway: GatewayConfig,

    /// MQTT device-bus settings (used when type is "mqtt").
    #[serde(default)]
    pub mqtt: MqttBusConfig,

    /// TCP device-bus settings (used when type is "net").
    #[serde(default)]
    pub net: NetBusConfig,

    /// Serial device-bus settings (used when type is "serial").
    #[serde(default)]
    pub serial: SerialBusConfig,

    /// Controller REST API client settings.
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Which physical transport carries the device protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Mqtt,
    Net,
    Serial,
}

impl GatewayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayKind::Mqtt => "mqtt",
            GatewayKind::Net => "net",
            GatewayKind::Serial => "serial",
        }
    }
}

/// Gateway transport type and protocol options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Transport type: "mqtt", "net" or "serial".
    #[serde(rename = "type")]
    pub kind: GatewayKind,

    /// Unit letter answered to config requests: "M"etric or "I"mperial.
    #[serde(default = "default_unit")]
    pub unit: String,

    /// Inclusion window duration in milliseconds (default 5 minutes).
    #[serde(default = "default_inclusion_delay_ms")]
    pub inclusion_delay_ms: u64,

    /// Interval of the periodic status advertisement in milliseconds.
    #[serde(default = "default_inclusion_advertise_ms")]
    pub inclusion_advertise_ms: u64,
}

impl GatewayConfig {
    pub fn new(kind: GatewayKind) -> Self {
        Self {
            kind,
            unit: default_unit(),
            inclusion_delay_ms: default_inclusion_delay_ms(),
            inclusion_advertise_ms: default_inclusion_advertise_ms(),
        }
    }
}

fn default_unit() -> String {
    "M".to_string()
}

fn default_inclusion_delay_ms() -> u64 {
    5 * 60 * 1000
}

fn default_inclusion_advertise_ms() -> u64 {
    5000
}

/// MQTT device bus: broker address and the two topic roots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttBusConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Root topic subscribed for device-to-gateway messages. Required when
    /// type is "mqtt".
    pub from_devices: Option<String>,

    /// Root topic published for gateway-to-device messages. Required when
    /// type is "mqtt".
    pub to_devices: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

/// TCP device bus: the remote endpoint the gateway connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetBusConfig {
    #[serde(default = "default_net_host")]
    pub host: String,

    #[serde(default = "default_net_port")]
    pub port: u16,
}

impl Default for NetBusConfig {
    fn default() -> Self {
        Self {
            host: default_net_host(),
            port: default_net_port(),
        }
    }
}

fn default_net_host() -> String {
    "localhost".to_string()
}

fn default_net_port() -> u16 {
    24009
}

/// Serial device bus: the character device path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialBusConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
}

impl Default for SerialBusConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
        }
    }
}

fn default_serial_port() -> String {
    "/dev/usb".to_string()
}

/// Controller REST API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Base URL of the controller REST API.
    #[serde(default = "default_controller_base_url")]
    pub base_url: String,

    /// Guard timeout for controller round trips, in milliseconds. A hung
    /// request resolves to "no answer" after this delay.
    #[serde(default = "default_controller_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: default_controller_base_url(),
            timeout_ms: default_controller_timeout_ms(),
        }
    }
}

fn default_controller_base_url() -> String {
    "http://localhost:24011".to_string()
}

fn default_controller_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Minimal config for the given transport type, everything else default.
    pub fn with_kind(kind: GatewayKind) -> Self {
        Self {
            gateway: GatewayConfig::new(kind),
            mqtt: MqttBusConfig::default(),
            net: NetBusConfig::default(),
            serial: SerialBusConfig::default(),
            controller: ControllerConfig::default(),
        }
    }

    /// Startup validation: the selected transport must have its required
    /// settings. Called before any transport is opened.
    pub fn validate(&self) -> Result<()> {
        if let GatewayKind::Mqtt = self.gateway.kind {
            if self.mqtt.from_devices.as_deref().unwrap_or("").is_empty() {
                bail!("mqtt.fromDevices: configuration not found");
            }
            if self.mqtt.to_devices.as_deref().unwrap_or("").is_empty() {
                bail!("mqtt.toDevices: configuration not found");
            }
        }
        let unit = self.gateway.unit.trim();
        if unit != "M" && unit != "I" {
            bail!("gateway.unit: expected \"M\" or \"I\", found \"{}\"", unit);
        }
        Ok(())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("MYSGW_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".mysgw").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or MYSGW_CONFIG_PATH / the default).
/// A missing or invalid file is fatal: the gateway type has no sensible
/// default.
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(default_config_path);
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let config: Config = serde_json::from_str(&s)
        .with_context(|| format!("parsing config from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
