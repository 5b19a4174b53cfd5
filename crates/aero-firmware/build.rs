//! Bakes network credentials into the binary.
//!
//! Values come from the environment or a `.env` file next to this crate.
//! Missing optional values fall back to the defaults below; missing WiFi
//! credentials fail the build.

const REQUIRED: &[&str] = &["WIFI_SSID", "WIFI_PASSWORD", "MQTT_HOST"];

const OPTIONAL: &[(&str, &str)] = &[
    ("MQTT_PORT", "1883"),
    ("MQTT_USERNAME", ""),
    ("MQTT_PASSWORD", ""),
    ("MQTT_TOPIC", "aero/telemetry"),
    ("NTP_HOST", "pool.ntp.org"),
    ("DEVICE_ID", "aero-node"),
];

fn main() {
    println!("cargo:rustc-link-arg=-Tlinkall.x");
    println!("cargo:rerun-if-changed=.env");

    // A missing .env is fine when the variables are exported instead.
    let _ = dotenvy::dotenv();

    for key in REQUIRED {
        println!("cargo:rerun-if-env-changed={key}");
        match std::env::var(key) {
            Ok(value) if !value.is_empty() => println!("cargo:rustc-env={key}={value}"),
            _ => panic!("{key} must be set in the environment or in .env"),
        }
    }

    for (key, default) in OPTIONAL {
        println!("cargo:rerun-if-env-changed={key}");
        let value = std::env::var(key).unwrap_or_else(|_| (*default).to_string());
        println!("cargo:rustc-env={key}={value}");
    }
}
