use embedded_hal_async::i2c::I2c;
use log::{error, info};
use scd41_embedded::r#async::Scd41Async;

use super::{Co2Sensor, RawMeasurement, SensorError};

/// Sensirion SCD41 on an async I2C bus.
///
/// Automatic self-calibration is switched on once per boot. It only converges
/// over days of operation, but the setting is volatile and must be rewritten
/// after every power-up.
pub struct SCD41Sensor<I> {
    sensor: Scd41Async<I, embassy_time::Delay>,
    calibrated: bool,
}

impl<I: I2c> SCD41Sensor<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            sensor: Scd41Async::<I, embassy_time::Delay>::new(i2c, embassy_time::Delay),
            calibrated: false,
        }
    }

    async fn enable_self_calibration(&mut self) -> Result<(), SensorError> {
        self.sensor
            .set_automatic_self_calibration(true)
            .await
            .map_err(|e| {
                error!("SCD41 set_automatic_self_calibration failed: {:?}", e);
                SensorError::InitializationFailed {
                    sensor: "SCD41",
                    details: "Failed to enable automatic self-calibration",
                }
            })?;

        info!("SCD41: Automatic self-calibration enabled");
        self.calibrated = true;
        Ok(())
    }
}

impl<I: I2c> Co2Sensor for SCD41Sensor<I> {
    async fn stop_periodic_measurement(&mut self) -> Result<(), SensorError> {
        self.sensor.stop_periodic_measurement().await.map_err(|e| {
            error!("SCD41 stop_periodic_measurement failed: {:?}", e);
            SensorError::InitializationFailed {
                sensor: "SCD41",
                details: "No acknowledge on stop_periodic_measurement",
            }
        })
    }

    async fn start_periodic_measurement(&mut self) -> Result<(), SensorError> {
        if !self.calibrated {
            self.enable_self_calibration().await?;
        }
        self.sensor.start_periodic_measurement().await.map_err(|e| {
            error!("SCD41 start_periodic_measurement failed: {:?}", e);
            SensorError::InitializationFailed {
                sensor: "SCD41",
                details: "Failed to start periodic measurement",
            }
        })
    }

    async fn trigger_single_shot(&mut self) -> Result<(), SensorError> {
        if !self.calibrated {
            self.enable_self_calibration().await?;
        }
        self.sensor.measure_single_shot().await.map_err(|e| {
            error!("SCD41 single shot measurement failed: {:?}", e);
            SensorError::ReadFailed {
                sensor: "SCD41",
                operation: "initiate single shot measurement",
                details: "I2C communication error",
            }
        })
    }

    async fn data_ready(&mut self) -> Result<bool, SensorError> {
        self.sensor.data_ready().await.map_err(|e| {
            error!("SCD41 data_ready check failed: {:?}", e);
            SensorError::ReadFailed {
                sensor: "SCD41",
                operation: "check data ready status",
                details: "I2C communication error",
            }
        })
    }

    async fn read_measurement(&mut self) -> Result<RawMeasurement, SensorError> {
        let measurement = self.sensor.measurement().await.map_err(|e| {
            error!("SCD41 measurement read failed: {:?}", e);
            SensorError::ReadFailed {
                sensor: "SCD41",
                operation: "read measurement",
                details: "I2C communication error or invalid data",
            }
        })?;

        Ok(RawMeasurement {
            co2_ppm: measurement.co2_ppm as u16,
            temperature_c: measurement.temperature_c as f32,
            humidity_pct: measurement.humidity_rh as f32,
        })
    }
}
