//! CO₂ sensor acquisition and supply-voltage monitoring.

mod acquisition;
mod battery;
#[cfg(feature = "sensor-scd41")]
mod scd41;

use core::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

pub use acquisition::{STOP_SETTLE_MS, SensorAcquisition};
pub use battery::{AdcChannel, BatteryMonitor, VOLTAGE_SANITY_RANGE};
#[cfg(feature = "sensor-scd41")]
pub use scd41::SCD41Sensor;

/// Plausible CO₂ concentration in ppm.
pub const CO2_RANGE: RangeInclusive<u16> = 400..=5000;
/// Plausible air temperature in °C.
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = -10.0..=50.0;
/// Plausible relative humidity in %RH.
pub const HUMIDITY_RANGE: RangeInclusive<f32> = 0.0..=100.0;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SensorError {
    #[error("Sensor {sensor} initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },

    #[error("Sensor {sensor} read failed during {operation}: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },

    #[error("Sensor {sensor} timed out during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },

    #[error(
        "Implausible reading: co2={} ppm, t={} °C, rh={} %",
        .reading.co2,
        .reading.temperature,
        .reading.humidity
    )]
    Implausible { reading: Reading },
}

/// One measurement as reported by the sensor, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMeasurement {
    pub co2_ppm: u16,
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

/// Low-level command set of a CO₂/T/RH sensor.
///
/// One implementation is selected at build time; the acquisition logic
/// sequences these commands and owns every delay.
pub trait Co2Sensor {
    /// Leaves periodic mode. Must be followed by the sensor's lock-out delay.
    fn stop_periodic_measurement(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    fn start_periodic_measurement(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    /// Starts one on-demand measurement. Returns without waiting for it.
    fn trigger_single_shot(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    fn data_ready(&mut self) -> impl Future<Output = Result<bool, SensorError>>;

    fn read_measurement(&mut self) -> impl Future<Output = Result<RawMeasurement, SensorError>>;
}

/// A single cycle's reading, threaded from acquisition to publish.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub co2: u16,
    pub temperature: f32,
    pub humidity: f32,
    /// Supply voltage, `NaN` when the ADC could not be read.
    pub voltage: f32,
    /// Set only when every field passed range validation.
    pub valid: bool,
    /// Unix time, present once network time sync succeeded.
    pub timestamp: Option<u32>,
}

impl Reading {
    /// Builds a reading from raw sensor values and validates it.
    pub fn from_raw(raw: RawMeasurement) -> Self {
        let mut reading = Self {
            co2: raw.co2_ppm,
            temperature: raw.temperature_c,
            humidity: raw.humidity_pct,
            voltage: f32::NAN,
            valid: false,
            timestamp: None,
        };
        reading.valid = reading.is_plausible();
        reading
    }

    /// Range check on the measured fields. Values are never clamped.
    pub fn is_plausible(&self) -> bool {
        CO2_RANGE.contains(&self.co2)
            && TEMPERATURE_RANGE.contains(&self.temperature)
            && HUMIDITY_RANGE.contains(&self.humidity)
    }
}
