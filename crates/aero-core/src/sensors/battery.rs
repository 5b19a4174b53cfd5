use core::ops::RangeInclusive;

use log::{debug, warn};

use super::SensorError;
use crate::config::VoltageDivider;

/// Voltages outside this window point at a wiring or ADC problem.
pub const VOLTAGE_SANITY_RANGE: RangeInclusive<f32> = 2.5..=4.5;

/// A single-sample ADC input wired to the battery divider.
pub trait AdcChannel {
    /// One raw conversion in `0..=full_scale`.
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

/// Converts divider samples into supply volts.
pub struct BatteryMonitor<A> {
    adc: A,
    divider: VoltageDivider,
}

impl<A: AdcChannel> BatteryMonitor<A> {
    pub const fn new(adc: A, divider: VoltageDivider) -> Self {
        Self { adc, divider }
    }

    /// One un-averaged sample scaled to the battery side of the divider.
    ///
    /// An implausible result is logged but still returned; the brownout
    /// threshold decides what to do with it.
    pub fn read_voltage(&mut self) -> Result<f32, SensorError> {
        let raw = self.adc.read_raw()?;
        let volts = self.scale(raw);
        debug!("Battery ADC raw={} -> {} V", raw, volts);

        if !VOLTAGE_SANITY_RANGE.contains(&volts) {
            warn!(
                "Battery voltage {} V outside {}..={} V, check divider and ADC",
                volts,
                VOLTAGE_SANITY_RANGE.start(),
                VOLTAGE_SANITY_RANGE.end()
            );
        }
        Ok(volts)
    }

    fn scale(&self, raw: u16) -> f32 {
        let d = &self.divider;
        f32::from(raw) / f32::from(d.adc_full_scale) * d.reference_volts * d.ratio
    }

    pub fn into_inner(self) -> A {
        self.adc
    }
}
