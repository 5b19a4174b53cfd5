//! Network settings baked in by `build.rs`.

pub const WIFI_SSID: &str = env!("WIFI_SSID");
pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

pub const MQTT_HOST: &str = env!("MQTT_HOST");
pub const MQTT_USERNAME: &str = env!("MQTT_USERNAME");
pub const MQTT_PASSWORD: &str = env!("MQTT_PASSWORD");
pub const MQTT_TOPIC: &str = env!("MQTT_TOPIC");

pub const NTP_HOST: &str = env!("NTP_HOST");
pub const DEVICE_ID: &str = env!("DEVICE_ID");

const MQTT_PORT: &str = env!("MQTT_PORT");
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker port, falling back to 1883 when the baked value does not parse.
pub fn mqtt_port() -> u16 {
    MQTT_PORT.parse().unwrap_or(DEFAULT_MQTT_PORT)
}
