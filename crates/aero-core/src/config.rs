//! Operational configuration for one sensor node.
//!
//! Everything here is fixed at build time (or at the very top of boot) and
//! read-only for the rest of the cycle. Secrets such as WiFi credentials live
//! in the firmware crate; this module only holds values the lifecycle logic
//! reasons about.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::schedule::QuietWindow;
use crate::sensors::CO2_RANGE;

/// Wall-clock time of day with minute resolution.
///
/// Constructed through [`TimeOfDay::new`], so hour and minute are always in
/// range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Returns `None` when `hour > 23` or `minute > 59`.
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour > 23 || minute > 59 {
            None
        } else {
            Some(Self { hour, minute })
        }
    }

    pub const fn hour(self) -> u8 {
        self.hour
    }

    pub const fn minute(self) -> u8 {
        self.minute
    }

    /// Minutes elapsed since local midnight.
    pub const fn minutes_since_midnight(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

/// How the CO₂ sensor is driven on each wake.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementMode {
    /// One on-demand measurement per wake. The sensor's own settling delay is
    /// part of the measurement, no warm-up readings are discarded.
    SingleShot,
    /// Periodic measurement is started on init and a configurable number of
    /// early readings are thrown away while the sensor's filters settle.
    Periodic,
}

/// Analog front-end used to sample the supply voltage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VoltageDivider {
    /// Raw ADC value corresponding to `reference_volts` at the pin.
    pub adc_full_scale: u16,
    /// Voltage at the ADC pin that reads as `adc_full_scale`.
    pub reference_volts: f32,
    /// Ratio between battery voltage and ADC pin voltage.
    pub ratio: f32,
}

/// Bounded waits for every operation that could otherwise hang.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub sensor_ms: u32,
    pub sensor_poll_ms: u32,
    pub wifi_ms: u32,
    pub time_sync_ms: u32,
    pub message_queue_ms: u32,
}

/// Configuration for a single node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct OperationalConfig {
    /// Sleep after a successful, non-quiet cycle.
    pub sleep_interval_secs: u32,
    /// Sleep after a transient fault (sensor, bus, WiFi or broker failure).
    pub retry_interval_secs: u32,
    /// Longest single deep sleep the hardware supports.
    pub max_sleep_secs: u32,
    /// Whether quiet hours are evaluated at all.
    pub quiet_hours_enabled: bool,
    pub quiet_window: QuietWindow,
    /// Offset of local time from UTC, applied before any time-of-day logic.
    pub utc_offset_secs: i32,
    /// Below this supply voltage the node rests for the full sleep ceiling.
    pub min_operating_volts: f32,
    pub voltage_divider: VoltageDivider,
    /// 7-bit I2C address of the CO₂ sensor.
    pub sensor_address: u8,
    pub measurement_mode: MeasurementMode,
    /// Readings discarded after init in [`MeasurementMode::Periodic`].
    pub warmup_readings: u8,
    pub timeouts: Timeouts,
    /// Failed final-sync wakes tolerated before a quiet plan is abandoned.
    pub max_final_sync_attempts: u32,
    /// Readings at or above this CO₂ level are flagged as a warning.
    pub co2_warning_ppm: u16,
}

impl OperationalConfig {
    pub const fn defaults() -> Self {
        Self {
            sleep_interval_secs: 1800,
            retry_interval_secs: 300,
            max_sleep_secs: 3600,
            quiet_hours_enabled: true,
            quiet_window: QuietWindow::from_hm(16, 0, 7, 55),
            utc_offset_secs: 0,
            min_operating_volts: 3.3,
            voltage_divider: VoltageDivider {
                adc_full_scale: 1024,
                reference_volts: 1.0,
                ratio: 4.2,
            },
            sensor_address: 0x62,
            measurement_mode: MeasurementMode::SingleShot,
            warmup_readings: 0,
            timeouts: Timeouts {
                sensor_ms: 10_000,
                sensor_poll_ms: 100,
                wifi_ms: 15_000,
                time_sync_ms: 10_000,
                message_queue_ms: 10_000,
            },
            max_final_sync_attempts: 3,
            co2_warning_ppm: 1000,
        }
    }

    /// Checks the invariants the lifecycle relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sleep_secs == 0 {
            return Err(ConfigError::ZeroDuration("max_sleep_secs"));
        }
        if self.sleep_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("sleep_interval_secs"));
        }
        if self.retry_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("retry_interval_secs"));
        }
        if self.sleep_interval_secs > self.max_sleep_secs {
            return Err(ConfigError::ExceedsCeiling {
                field: "sleep_interval_secs",
                value: self.sleep_interval_secs,
                ceiling: self.max_sleep_secs,
            });
        }
        if self.retry_interval_secs > self.max_sleep_secs {
            return Err(ConfigError::ExceedsCeiling {
                field: "retry_interval_secs",
                value: self.retry_interval_secs,
                ceiling: self.max_sleep_secs,
            });
        }
        if self.timeouts.sensor_poll_ms == 0 {
            return Err(ConfigError::ZeroDuration("timeouts.sensor_poll_ms"));
        }
        if self.voltage_divider.adc_full_scale == 0
            || !(self.voltage_divider.ratio > 0.0)
            || !(self.voltage_divider.reference_volts > 0.0)
        {
            return Err(ConfigError::InvalidDivider);
        }
        if self.sensor_address > 0x7F {
            return Err(ConfigError::InvalidAddress(self.sensor_address));
        }
        if !CO2_RANGE.contains(&self.co2_warning_ppm) {
            return Err(ConfigError::InvalidWarningThreshold(self.co2_warning_ppm));
        }
        if self.utc_offset_secs.unsigned_abs() >= 86_400 {
            return Err(ConfigError::InvalidUtcOffset(self.utc_offset_secs));
        }
        Ok(())
    }
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
    #[error("{field} = {value} s exceeds the {ceiling} s sleep ceiling")]
    ExceedsCeiling {
        field: &'static str,
        value: u32,
        ceiling: u32,
    },
    #[error("voltage divider needs a non-zero full scale and positive ratio/reference")]
    InvalidDivider,
    #[error("I2C address {0:#04x} is outside the 7-bit range")]
    InvalidAddress(u8),
    #[error("UTC offset {0} s is a day or more")]
    InvalidUtcOffset(i32),
    #[error("CO2 warning threshold {0} ppm is outside the sensor range")]
    InvalidWarningThreshold(u16),
}
