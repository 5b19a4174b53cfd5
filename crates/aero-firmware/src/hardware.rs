//! Board wiring for the aero node
//!
//! Pin map:
//! - GPIO11 / GPIO12: I2C0 SCL / SDA to the SCD41
//! - GPIO1: battery divider into ADC1

use aero_core::bus::{BusRecovery, probe_address, release_bus, scan_bus};
use aero_core::sensors::{AdcChannel, SensorError};
use embassy_time::Delay;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::gpio::{DriveMode, Flex, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::peripherals::{ADC1, GPIO1, GPIO11, GPIO12, I2C0};
use esp_hal::time::Rate;
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::i2c_bus::SharedI2cBus;

/// Conversion attempts before a battery read is reported as failed.
const ADC_READ_ATTEMPTS: u32 = 10_000;

/// Peripherals the I2C bus is built from.
pub struct BusParts {
    pub i2c: I2C0<'static>,
    pub sda: GPIO12<'static>,
    pub scl: GPIO11<'static>,
}

/// Owns the bus pins until recovery has run, then the shared driver.
pub struct EspBus {
    parts: Option<BusParts>,
    bus: &'static SharedI2cBus,
}

impl EspBus {
    pub const fn new(parts: BusParts, bus: &'static SharedI2cBus) -> Self {
        Self {
            parts: Some(parts),
            bus,
        }
    }
}

impl BusRecovery for EspBus {
    async fn recover(&mut self) -> bool {
        let Some(BusParts {
            i2c,
            mut sda,
            mut scl,
        }) = self.parts.take()
        else {
            warn!("I2C driver already claimed, skipping bus recovery");
            return false;
        };

        let released = {
            let pin_config = OutputConfig::default()
                .with_drive_mode(DriveMode::OpenDrain)
                .with_pull(Pull::Up);

            let mut scl_pin = Flex::new(scl.reborrow());
            let mut sda_pin = Flex::new(sda.reborrow());
            for pin in [&mut scl_pin, &mut sda_pin] {
                pin.apply_output_config(&pin_config);
                pin.set_high();
                pin.set_input_enable(true);
                pin.set_output_enable(true);
            }

            release_bus(&mut scl_pin, &mut sda_pin, &mut Delay).await
        };

        match I2c::new(i2c, I2cConfig::default().with_frequency(Rate::from_khz(100))) {
            Ok(driver) => {
                let driver = driver.with_sda(sda).with_scl(scl).into_async();
                *self.bus.lock().await = Some(driver);
                debug!("I2C driver claimed the bus");
            }
            Err(e) => error!("I2C configuration rejected: {:?}", e),
        }

        released
    }

    async fn device_present(&mut self, address: u8) -> bool {
        match self.bus.lock().await.as_mut() {
            Some(driver) => probe_address(driver, address).await,
            None => false,
        }
    }

    async fn scan(&mut self) -> Vec<u8, 16> {
        match self.bus.lock().await.as_mut() {
            Some(driver) => scan_bus(driver).await,
            None => Vec::new(),
        }
    }
}

/// Battery voltage divider on GPIO1.
pub struct BatteryAdc {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    pin: AdcPin<GPIO1<'static>, ADC1<'static>>,
}

impl BatteryAdc {
    pub fn new(adc1: ADC1<'static>, pin: GPIO1<'static>) -> Self {
        let mut config = AdcConfig::new();
        let pin = config.enable_pin(pin, Attenuation::_11dB);
        info!("Battery ADC on GPIO1 at 11 dB");
        Self {
            adc: Adc::new(adc1, config),
            pin,
        }
    }
}

impl AdcChannel for BatteryAdc {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        for _ in 0..ADC_READ_ATTEMPTS {
            if let Ok(raw) = self.adc.read_oneshot(&mut self.pin) {
                return Ok(raw);
            }
        }
        Err(SensorError::ReadFailed {
            sensor: "battery",
            operation: "read_oneshot",
            details: "conversion never completed",
        })
    }
}
