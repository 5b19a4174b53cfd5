//! Async I2C bus sharing with a late-claimed driver
//!
//! The bus pins have to be bit-banged for recovery before the I2C peripheral
//! takes them over, so the shared slot starts empty and is filled by
//! [`crate::hardware::EspBus`] once recovery is done. Devices created earlier
//! (the CO₂ sensor) see [`SharedI2cError::NotClaimed`] until then.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal::i2c::ErrorKind;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};
use esp_hal::Async;
use esp_hal::i2c::master::{Error as DriverError, I2c as I2cDriver};
use thiserror_no_std::Error;

pub type EspI2c = I2cDriver<'static, Async>;

/// Bus slot shared between the recovery driver and the devices on it.
pub type SharedI2cBus = Mutex<CriticalSectionRawMutex, Option<EspI2c>>;

#[derive(Error, Debug)]
pub enum SharedI2cError {
    #[error("I2C driver not claimed yet")]
    NotClaimed,

    #[error("I2C transfer failed: {0:?}")]
    Bus(DriverError),
}

impl embedded_hal::i2c::Error for SharedI2cError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotClaimed => ErrorKind::Other,
            Self::Bus(e) => embedded_hal::i2c::Error::kind(e),
        }
    }
}

/// One device's handle onto a [`SharedI2cBus`].
///
/// Calls go through the async trait explicitly; the driver's inherent
/// methods of the same names are blocking.
pub struct SharedI2c {
    bus: &'static SharedI2cBus,
}

impl SharedI2c {
    #[inline]
    pub const fn new(bus: &'static SharedI2cBus) -> Self {
        Self { bus }
    }
}

impl ErrorType for SharedI2c {
    type Error = SharedI2cError;
}

impl I2c for SharedI2c {
    #[inline]
    async fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        let driver = bus.as_mut().ok_or(SharedI2cError::NotClaimed)?;
        I2c::read(driver, address, read).await.map_err(SharedI2cError::Bus)
    }

    #[inline]
    async fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        let driver = bus.as_mut().ok_or(SharedI2cError::NotClaimed)?;
        I2c::write(driver, address, write).await.map_err(SharedI2cError::Bus)
    }

    #[inline]
    async fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        let driver = bus.as_mut().ok_or(SharedI2cError::NotClaimed)?;
        I2c::write_read(driver, address, write, read)
            .await
            .map_err(SharedI2cError::Bus)
    }

    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        let driver = bus.as_mut().ok_or(SharedI2cError::NotClaimed)?;
        I2c::transaction(driver, address, operations)
            .await
            .map_err(SharedI2cError::Bus)
    }
}
