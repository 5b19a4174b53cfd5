//! Desktop simulator for the aero node lifecycle.
//!
//! Runs boot after boot of `aero_core::lifecycle::Lifecycle` against simulated
//! hardware, advancing a simulated wall clock by each requested deep sleep.
//! The sleep timer runs slightly fast or slow (RTC drift) and the network and
//! sensor fail now and then, so a run shows how quiet hours, retries and the
//! final-sync correction behave over several days.
//!
//! # Usage
//!
//! ```text
//! RUST_LOG=info cargo run -p aero-simulator -- [days] [drift-ppm] [failure-percent]
//! ```
//!
//! Defaults: 3 days, +20000 ppm (sleeps run 2 % long), 10 % failures.

use std::time::{SystemTime, UNIX_EPOCH};

use aero_core::bus::BusRecovery;
use aero_core::config::OperationalConfig;
use aero_core::lifecycle::{Board, CycleOutcome, Lifecycle, SleepReason};
use aero_core::network::{NetworkError, NetworkLink};
use aero_core::schedule::local_time_of_day;
use aero_core::sensors::{AdcChannel, Co2Sensor, RawMeasurement, SensorError};
use aero_core::storage::{RECORD_LEN, RetentionMemory};
use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

// ---------------------------------------------------------------------------
// Scenario constants
// ---------------------------------------------------------------------------

/// 2024-03-15 09:00:00 UTC, where every run starts.
const START_EPOCH: u32 = 1_710_493_200;

const DEFAULT_DAYS: u32 = 3;
const DEFAULT_DRIFT_PPM: i64 = 20_000;
const DEFAULT_FAILURE_PERCENT: u32 = 10;

const DEVICE_ID: &str = "aero-sim";

/// Battery drops this much per boot, and recovers at each simulated midday.
const DRAIN_PER_BOOT_VOLTS: f32 = 0.002;
const FULL_BATTERY_VOLTS: f32 = 4.1;

// ---------------------------------------------------------------------------
// Randomness
// ---------------------------------------------------------------------------

/// xorshift32; deterministic per seed so runs can be replayed.
struct Dice(u32);

impl Dice {
    fn roll(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    fn fails(&mut self, percent: u32) -> bool {
        self.roll() % 100 < percent
    }
}

// ---------------------------------------------------------------------------
// Simulated hardware
// ---------------------------------------------------------------------------

struct SimAdc {
    volts: f32,
}

impl AdcChannel for SimAdc {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        let divider = OperationalConfig::defaults().voltage_divider;
        let raw = self.volts / (divider.reference_volts * divider.ratio) * f32::from(divider.adc_full_scale);
        Ok(raw.round() as u16)
    }
}

struct SimBus;

impl BusRecovery for SimBus {
    async fn recover(&mut self) -> bool {
        true
    }

    async fn device_present(&mut self, _address: u8) -> bool {
        true
    }

    async fn scan(&mut self) -> heapless::Vec<u8, 16> {
        heapless::Vec::new()
    }
}

/// CO₂ that climbs through the working day and settles overnight.
struct SimSensor {
    clock: u32,
    dice: Dice,
    failure_percent: u32,
}

impl Co2Sensor for SimSensor {
    async fn stop_periodic_measurement(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn start_periodic_measurement(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn trigger_single_shot(&mut self) -> Result<(), SensorError> {
        if self.dice.fails(self.failure_percent / 2) {
            return Err(SensorError::ReadFailed {
                sensor: "sim-scd41",
                operation: "measure_single_shot",
                details: "NACK",
            });
        }
        Ok(())
    }

    async fn data_ready(&mut self) -> Result<bool, SensorError> {
        Ok(true)
    }

    async fn read_measurement(&mut self) -> Result<RawMeasurement, SensorError> {
        let hour = (self.clock % 86_400) / 3600;
        let occupied = (9..18).contains(&hour);
        let co2 = if occupied { 650 + (hour - 9) * 60 } else { 450 };
        Ok(RawMeasurement {
            co2_ppm: co2 as u16,
            temperature_c: if occupied { 22.5 } else { 19.0 },
            humidity_pct: 45.0,
        })
    }
}

struct SimDelay;

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

struct SimLink {
    /// True wall clock.
    clock: u32,
    synced: bool,
    dice: Dice,
    failure_percent: u32,
    radio_on: bool,
    publishes: u32,
    radio_boots: u32,
}

impl NetworkLink for SimLink {
    async fn connect_wifi(&mut self, timeout_ms: u32) -> Result<(), NetworkError> {
        self.radio_on = true;
        self.radio_boots += 1;
        if self.dice.fails(self.failure_percent) {
            return Err(NetworkError::WifiTimeout { timeout_ms });
        }
        Ok(())
    }

    async fn sync_time(&mut self, _timeout_ms: u32) -> Result<u32, NetworkError> {
        if self.dice.fails(self.failure_percent) {
            return Err(NetworkError::TimeSyncFailed {
                details: "no NTP reply",
            });
        }
        self.synced = true;
        Ok(self.clock)
    }

    fn now(&mut self) -> Option<u32> {
        self.synced.then_some(self.clock)
    }

    async fn connect_message_queue(&mut self, _timeout_ms: u32) -> Result<(), NetworkError> {
        if self.dice.fails(self.failure_percent / 2) {
            return Err(NetworkError::MessageQueueFailed {
                details: "broker unreachable",
            });
        }
        Ok(())
    }

    async fn publish(&mut self, _payload: &[u8]) -> Result<(), NetworkError> {
        if self.dice.fails(self.failure_percent / 2) {
            return Err(NetworkError::PublishFailed {
                details: "no PUBACK",
            });
        }
        self.publishes += 1;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.radio_on = false;
        self.synced = false;
    }
}

struct SimRetention {
    bytes: [u8; RECORD_LEN],
}

impl RetentionMemory for SimRetention {
    fn load(&mut self) -> [u8; RECORD_LEN] {
        self.bytes
    }

    fn store(&mut self, bytes: &[u8; RECORD_LEN]) {
        self.bytes = *bytes;
    }
}

type SimBoard = Board<SimAdc, SimBus, SimSensor, SimDelay, SimLink, SimRetention>;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

struct Scenario {
    days: u32,
    drift_ppm: i64,
    failure_percent: u32,
}

impl Scenario {
    fn from_args() -> Self {
        let mut args = std::env::args().skip(1);
        Self {
            days: args.next().and_then(|a| a.parse().ok()).unwrap_or(DEFAULT_DAYS),
            drift_ppm: args.next().and_then(|a| a.parse().ok()).unwrap_or(DEFAULT_DRIFT_PPM),
            failure_percent: args
                .next()
                .and_then(|a| a.parse().ok())
                .unwrap_or(DEFAULT_FAILURE_PERCENT)
                .min(100),
        }
    }

    /// Seconds that actually pass while the RTC counts `requested`.
    fn drifted(&self, requested: u32) -> u32 {
        let actual = i64::from(requested) + i64::from(requested) * self.drift_ppm / 1_000_000;
        actual.clamp(0, i64::from(u32::MAX)) as u32
    }
}

fn seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() | 1)
        .unwrap_or(0x2545_f491)
}

fn board(scenario: &Scenario, seed: u32) -> SimBoard {
    Board {
        adc: SimAdc {
            volts: FULL_BATTERY_VOLTS,
        },
        bus: SimBus,
        sensor: SimSensor {
            clock: START_EPOCH,
            dice: Dice(seed.rotate_left(7) | 1),
            failure_percent: scenario.failure_percent,
        },
        delay: SimDelay,
        link: SimLink {
            clock: START_EPOCH,
            synced: false,
            dice: Dice(seed),
            failure_percent: scenario.failure_percent,
            radio_on: false,
            publishes: 0,
            radio_boots: 0,
        },
        memory: SimRetention {
            bytes: [0; RECORD_LEN],
        },
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let scenario = Scenario::from_args();
    let config = OperationalConfig::defaults();
    let seed = seed();
    info!(
        "Simulating {} day(s), drift {} ppm, failures {} %, seed {:#x}",
        scenario.days, scenario.drift_ppm, scenario.failure_percent, seed
    );
    info!(
        "Quiet window {:?}, interval {} s, ceiling {} s",
        config.quiet_window, config.sleep_interval_secs, config.max_sleep_secs
    );

    let end = START_EPOCH + scenario.days * 86_400;
    let mut board = board(&scenario, seed);
    let mut boots = 0u32;
    let mut warnings = 0u32;

    while board.link.clock < end {
        boots += 1;
        board.sensor.clock = board.link.clock;

        let mut lifecycle = Lifecycle::new(config, DEVICE_ID, board);
        let request = block_on(lifecycle.run());
        let report = *lifecycle.report();
        board = lifecycle.into_board();

        assert!(!board.link.radio_on, "radio left on into deep sleep");
        if report.co2_warning {
            warnings += 1;
        }

        let (hour, minute) = hm(board.link.clock, &config);
        info!(
            "#{boots:4} {hour:02}:{minute:02} {:?} -> sleep {} s ({:?})",
            report.outcome,
            request.seconds(),
            request.reason()
        );

        board.link.clock += scenario.drifted(request.seconds());
        if request.reason() == SleepReason::QuietFinal {
            let (wake_hour, wake_minute) = hm(board.link.clock, &config);
            let end = config.quiet_window.end;
            info!(
                "Quiet hours over: waking {wake_hour:02}:{wake_minute:02}, window ends {:02}:{:02}",
                end.hour(),
                end.minute()
            );
        }
        if let CycleOutcome::FinalSyncFailed {
            plan_abandoned: true,
            ..
        } = report.outcome
        {
            warn!("Quiet plan abandoned after repeated sync failures");
        }
        board.adc.volts = if hour == 12 {
            FULL_BATTERY_VOLTS
        } else {
            board.adc.volts - DRAIN_PER_BOOT_VOLTS
        };
    }

    info!(
        "{} boots, {} with the radio on, {} readings published, {} CO2 warnings",
        boots, board.link.radio_boots, board.link.publishes, warnings
    );
}

fn hm(epoch: u32, config: &OperationalConfig) -> (u8, u8) {
    local_time_of_day(epoch, config.utc_offset_secs)
        .map(|time| (time.hour(), time.minute()))
        .unwrap_or((0, 0))
}
