//! ESP32-S3 firmware-specific modules for aero
//!
//! This crate contains the hardware-specific halves of the capability traits
//! defined in `aero_core`: RTC retention memory, the shared I2C bus with its
//! bit-banged recovery, the battery ADC, the WiFi/SNTP/MQTT link, and the
//! deep-sleep call. The lifecycle itself lives in `aero_core`.

#![no_std]

extern crate alloc;

pub mod hardware;
pub mod i2c_bus;
pub mod network;
pub mod retention;
pub mod sleep;
pub mod wifi_secrets;
