#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use aero_core::config::{OperationalConfig, VoltageDivider};
use aero_core::lifecycle::{Board, DeepSleep, Lifecycle};
use aero_core::sensors::SCD41Sensor;
use aero_firmware::hardware::{BatteryAdc, BusParts, EspBus};
use aero_firmware::i2c_bus::{SharedI2c, SharedI2cBus};
use aero_firmware::network::{EspNetwork, RadioParts};
use aero_firmware::retention::RtcRetention;
use aero_firmware::sleep::{FAULT_REST_SECS, RtcDeepSleep, rest_after_panic};
use aero_firmware::wifi_secrets::DEVICE_ID;
use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use embassy_time::Delay;
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}, resting {} s", info, FAULT_REST_SECS);
    rest_after_panic()
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// 1:2 divider into an 11 dB ADC input (about 3.1 V full scale on 12 bits).
const BATTERY_DIVIDER: VoltageDivider = VoltageDivider {
    adc_full_scale: 4095,
    reference_volts: 3.1,
    ratio: 2.0,
};

fn operational_config() -> OperationalConfig {
    let mut config = OperationalConfig::defaults();
    config.voltage_divider = BATTERY_DIVIDER;

    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            error!("Invalid configuration ({}), using defaults", e);
            OperationalConfig::defaults()
        }
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(log::LevelFilter::Info);

    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("aero {} booting", DEVICE_ID);

    let config = operational_config();

    let mut sleeper = RtcDeepSleep::new(peripherals.LPWR);

    static I2C_BUS: StaticCell<SharedI2cBus> = StaticCell::new();
    let i2c_bus: &'static SharedI2cBus = I2C_BUS.init(Mutex::new(None));

    let Some(memory) = RtcRetention::take() else {
        // Only reachable if something above took the handle.
        error!("Retention memory already in use, resting {} s", config.retry_interval_secs);
        sleeper.rest(config.retry_interval_secs)
    };

    let rng = Rng::new();
    let seed = u64::from(rng.random()) << 32 | u64::from(rng.random());

    let board = Board {
        adc: BatteryAdc::new(peripherals.ADC1, peripherals.GPIO1),
        bus: EspBus::new(
            BusParts {
                i2c: peripherals.I2C0,
                sda: peripherals.GPIO12,
                scl: peripherals.GPIO11,
            },
            i2c_bus,
        ),
        sensor: SCD41Sensor::new(SharedI2c::new(i2c_bus)),
        delay: Delay,
        link: EspNetwork::new(RadioParts {
            wifi: peripherals.WIFI,
            spawner,
            seed,
        }),
        memory,
    };

    let mut lifecycle = Lifecycle::new(config, DEVICE_ID, board);
    let request = lifecycle.run().await;

    let report = lifecycle.report();
    match report.reading {
        Some(reading) => info!(
            "Boot done: {:?}, CO2 {} ppm (warning: {}), {} V, published: {}",
            report.outcome, reading.co2, report.co2_warning, reading.voltage, report.published
        ),
        None => warn!("Boot done without a reading: {:?}", report.outcome),
    }

    sleeper.enter(&request)
}
