use serde::{Deserialize, Serialize};

use super::NetworkError;
use crate::sensors::Reading;

/// Stack buffer size for one encoded telemetry record.
pub const PAYLOAD_CAPACITY: usize = 64;

/// The record published once per successful cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Telemetry<'a> {
    pub device_id: &'a str,
    /// `None` when time sync failed this cycle.
    pub timestamp: Option<u32>,
    pub temperature: f32,
    pub humidity: f32,
    pub co2: u16,
    pub voltage: f32,
    /// CO₂ is at or above the configured warning level.
    pub warning: bool,
}

impl<'a> Telemetry<'a> {
    pub fn from_reading(device_id: &'a str, reading: &Reading, warning: bool) -> Self {
        Self {
            device_id,
            timestamp: reading.timestamp,
            temperature: reading.temperature,
            humidity: reading.humidity,
            co2: reading.co2,
            voltage: reading.voltage,
            warning,
        }
    }

    /// Encodes into `buf` and returns the used prefix.
    pub fn encode<'b>(&self, buf: &'b mut [u8; PAYLOAD_CAPACITY]) -> Result<&'b [u8], NetworkError> {
        postcard::to_slice(self, buf)
            .map(|used| &*used)
            .map_err(|_| NetworkError::PayloadTooLarge {
                capacity: PAYLOAD_CAPACITY,
            })
    }
}
