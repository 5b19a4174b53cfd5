use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use super::{Co2Sensor, Reading, SensorError};
use crate::config::{MeasurementMode, OperationalConfig};

/// Command lock-out after `stop_periodic_measurement`.
pub const STOP_SETTLE_MS: u32 = 500;

/// Drives a [`Co2Sensor`] through init and one bounded measurement.
///
/// Every wait is a `delay` call, so elapsed time is the sum of the delays
/// actually awaited and no clock is needed.
pub struct SensorAcquisition<S, D> {
    sensor: S,
    delay: D,
    mode: MeasurementMode,
    poll_interval_ms: u32,
    warmup_timeout_ms: u32,
}

impl<S: Co2Sensor, D: DelayNs> SensorAcquisition<S, D> {
    pub fn new(sensor: S, delay: D, config: &OperationalConfig) -> Self {
        Self {
            sensor,
            delay,
            mode: config.measurement_mode,
            poll_interval_ms: config.timeouts.sensor_poll_ms.max(1),
            warmup_timeout_ms: config.timeouts.sensor_ms,
        }
    }

    pub const fn mode(&self) -> MeasurementMode {
        self.mode
    }

    /// Brings the sensor into a known state.
    ///
    /// Stale periodic mode from a previous session is always stopped. In
    /// [`MeasurementMode::Periodic`] periodic mode is restarted and the first
    /// `warmup_readings` readings are discarded; single-shot skips that.
    pub async fn init(&mut self, warmup_readings: u8) -> Result<(), SensorError> {
        self.sensor.stop_periodic_measurement().await.map_err(|e| {
            error!("Sensor did not acknowledge stop command: {}", e);
            SensorError::InitializationFailed {
                sensor: "CO2",
                details: "No acknowledge on stop_periodic_measurement",
            }
        })?;
        self.delay.delay_ms(STOP_SETTLE_MS).await;

        if self.mode == MeasurementMode::SingleShot {
            info!("Sensor ready (single-shot)");
            return Ok(());
        }

        self.sensor.start_periodic_measurement().await?;
        for n in 0..warmup_readings {
            self.wait_data_ready(self.warmup_timeout_ms, "warm-up reading")
                .await?;
            let raw = self.sensor.read_measurement().await?;
            debug!(
                "Warm-up {}/{} discarded: co2={} ppm",
                n + 1,
                warmup_readings,
                raw.co2_ppm
            );
        }
        info!("Sensor ready (periodic, {} warm-up readings)", warmup_readings);
        Ok(())
    }

    /// Takes one reading within `timeout_ms`.
    ///
    /// Communication failure and an out-of-range value both come back as
    /// `Err`; the latter carries the unclamped reading with `valid == false`.
    pub async fn measure_single_shot(&mut self, timeout_ms: u32) -> Result<Reading, SensorError> {
        if self.mode == MeasurementMode::SingleShot {
            self.sensor.trigger_single_shot().await?;
        }
        self.wait_data_ready(timeout_ms, "wait for data ready").await?;

        let reading = Reading::from_raw(self.sensor.read_measurement().await?);
        if !reading.valid {
            warn!(
                "Implausible reading rejected: co2={} ppm, t={} °C, rh={} %",
                reading.co2, reading.temperature, reading.humidity
            );
            return Err(SensorError::Implausible { reading });
        }

        info!(
            "Reading: co2={} ppm, t={} °C, rh={} %",
            reading.co2, reading.temperature, reading.humidity
        );
        Ok(reading)
    }

    async fn wait_data_ready(
        &mut self,
        timeout_ms: u32,
        operation: &'static str,
    ) -> Result<(), SensorError> {
        let mut waited_ms: u32 = 0;
        loop {
            if self.sensor.data_ready().await? {
                debug!("Data ready after {} ms", waited_ms);
                return Ok(());
            }
            if waited_ms >= timeout_ms {
                error!("Sensor data not ready after {} ms", waited_ms);
                return Err(SensorError::Timeout {
                    sensor: "CO2",
                    operation,
                });
            }
            let step = self.poll_interval_ms.min(timeout_ms - waited_ms);
            self.delay.delay_ms(step).await;
            waited_ms += step;
        }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn into_parts(self) -> (S, D) {
        (self.sensor, self.delay)
    }
}
