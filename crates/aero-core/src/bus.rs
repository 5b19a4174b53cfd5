//! I2C bus recovery and presence probing.
//!
//! A reset in the middle of an I2C transfer can leave a slave holding SDA low
//! while it waits for clock edges that never come. The I2C peripheral will not
//! clear that on its own, so before the first sensor access the lines are
//! driven by hand: clock SCL until the slave lets go of SDA, then emit a STOP.
//!
//! This is best-effort. The boolean result says whether SDA was seen high, not
//! that the bus is healthy.

use embedded_hal::digital::{Error as _, ErrorKind, InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use heapless::Vec;
use log::{debug, info, warn};

/// Clock pulses needed to let a slave finish any partial byte plus ACK.
pub const RECOVERY_CLOCK_PULSES: u8 = 9;

/// Half of the bit-banged clock period (about 50 kHz).
const HALF_PERIOD_US: u32 = 10;

/// First and last non-reserved 7-bit addresses.
const SCAN_FIRST: u8 = 0x03;
const SCAN_LAST: u8 = 0x77;

/// Bus recovery capability the lifecycle drives once per boot.
///
/// Implementations own the platform details of flipping the pins between
/// GPIO and I2C modes.
pub trait BusRecovery {
    /// Unwedges the bus and reinitializes the driver. Returns whether SDA was
    /// observed released.
    fn recover(&mut self) -> impl Future<Output = bool>;

    /// Zero-length write to `address`, true if it was acknowledged.
    fn device_present(&mut self, address: u8) -> impl Future<Output = bool>;

    /// Diagnostic address scan, see [`scan_bus`].
    fn scan(&mut self) -> impl Future<Output = Vec<u8, 16>>;
}

/// Bit-bangs the recovery sequence on pins temporarily taken from the I2C
/// peripheral.
///
/// Both pins must be configured open-drain so that `set_high` releases the
/// line rather than driving it.
pub async fn release_bus<SCL, SDA, D>(scl: &mut SCL, sda: &mut SDA, delay: &mut D) -> bool
where
    SCL: OutputPin,
    SDA: InputPin + OutputPin,
    D: DelayNs,
{
    match clock_out(scl, sda, delay).await {
        Ok(released) => {
            if released {
                debug!("I2C recovery: SDA released");
            } else {
                warn!(
                    "I2C recovery: SDA still low after {} pulses",
                    RECOVERY_CLOCK_PULSES
                );
            }
            released
        }
        Err(kind) => {
            warn!("I2C recovery: pin error {:?}", kind);
            false
        }
    }
}

async fn clock_out<SCL, SDA, D>(scl: &mut SCL, sda: &mut SDA, delay: &mut D) -> Result<bool, ErrorKind>
where
    SCL: OutputPin,
    SDA: InputPin + OutputPin,
    D: DelayNs,
{
    sda.set_high().map_err(|e| e.kind())?;
    scl.set_high().map_err(|e| e.kind())?;
    delay.delay_us(HALF_PERIOD_US).await;

    let mut released = false;
    for pulse in 0..RECOVERY_CLOCK_PULSES {
        if sda.is_high().map_err(|e| e.kind())? {
            debug!("I2C recovery: SDA high after {} pulse(s)", pulse);
            released = true;
            break;
        }
        scl.set_low().map_err(|e| e.kind())?;
        delay.delay_us(HALF_PERIOD_US).await;
        scl.set_high().map_err(|e| e.kind())?;
        delay.delay_us(HALF_PERIOD_US).await;
    }
    if !released {
        released = sda.is_high().map_err(|e| e.kind())?;
    }

    // STOP: SDA rises while SCL is high
    scl.set_low().map_err(|e| e.kind())?;
    sda.set_low().map_err(|e| e.kind())?;
    delay.delay_us(HALF_PERIOD_US).await;
    scl.set_high().map_err(|e| e.kind())?;
    delay.delay_us(HALF_PERIOD_US).await;
    sda.set_high().map_err(|e| e.kind())?;
    delay.delay_us(HALF_PERIOD_US).await;

    Ok(released)
}

/// Zero-length write probe.
pub async fn probe_address<I: I2c>(i2c: &mut I, address: u8) -> bool {
    let present = i2c.write(address, &[]).await.is_ok();
    debug!("I2C probe {:#04x}: {}", address, if present { "ACK" } else { "NACK" });
    present
}

/// Probes every non-reserved 7-bit address and collects the ones that ACK.
///
/// Diagnostic only: the lifecycle calls it after the sensor probe fails so
/// the log shows what, if anything, is on the bus.
pub async fn scan_bus<I: I2c>(i2c: &mut I) -> Vec<u8, 16> {
    let mut found = Vec::new();
    for address in SCAN_FIRST..=SCAN_LAST {
        if i2c.write(address, &[]).await.is_ok() && found.push(address).is_err() {
            warn!("I2C scan: more than {} devices, stopping", found.capacity());
            break;
        }
    }
    info!("I2C scan found {} device(s): {:02x?}", found.len(), found.as_slice());
    found
}
