//! Mock capabilities shared by the integration tests.
//!
//! Every mock appends to one shared trace so tests can assert on the order in
//! which the lifecycle touched the hardware.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use aero_core::bus::BusRecovery;
use aero_core::config::OperationalConfig;
use aero_core::lifecycle::{Board, BootReport, Lifecycle, SleepRequest};
use aero_core::network::{NetworkError, NetworkLink};
use aero_core::schedule::QuietWindow;
use aero_core::sensors::{AdcChannel, Co2Sensor, RawMeasurement, SensorError};
use aero_core::storage::{PersistentRecord, RECORD_LEN, RetentionMemory};
use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;
use heapless::Vec as HVec;

/// 2024-03-15 00:00:00 UTC
pub const MIDNIGHT: u32 = 1_710_460_800;

pub const fn at(hour: u32, minute: u32) -> u32 {
    MIDNIGHT + hour * 3600 + minute * 60
}

pub const DEVICE_ID: &str = "aero-test";

pub type Trace = Rc<RefCell<Vec<&'static str>>>;

pub fn test_config() -> OperationalConfig {
    let mut config = OperationalConfig::defaults();
    config.quiet_window = QuietWindow::from_hm(22, 0, 6, 0);
    config
}

pub const GOOD_AIR: RawMeasurement = RawMeasurement {
    co2_ppm: 850,
    temperature_c: 22.3,
    humidity_pct: 41.0,
};

pub struct MockAdc {
    trace: Trace,
    pub raw: Result<u16, SensorError>,
}

impl MockAdc {
    /// Raw sample that reads back as `volts` through the default divider.
    pub fn set_volts(&mut self, volts: f32) {
        let divider = OperationalConfig::defaults().voltage_divider;
        let raw = volts / (divider.reference_volts * divider.ratio) * f32::from(divider.adc_full_scale);
        self.raw = Ok(raw.round() as u16);
    }
}

impl AdcChannel for MockAdc {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        self.trace.borrow_mut().push("adc");
        self.raw
    }
}

pub struct MockBus {
    trace: Trace,
    pub present: bool,
    pub recoveries: u32,
    pub scans: u32,
}

impl BusRecovery for MockBus {
    async fn recover(&mut self) -> bool {
        self.trace.borrow_mut().push("bus.recover");
        self.recoveries += 1;
        true
    }

    async fn device_present(&mut self, _address: u8) -> bool {
        self.trace.borrow_mut().push("bus.probe");
        self.present
    }

    async fn scan(&mut self) -> HVec<u8, 16> {
        self.trace.borrow_mut().push("bus.scan");
        self.scans += 1;
        HVec::new()
    }
}

pub struct MockSensor {
    trace: Trace,
    pub acks: bool,
    pub never_ready: bool,
    pub value: RawMeasurement,
    pub commands: u32,
}

impl MockSensor {
    fn command(&mut self, name: &'static str) -> Result<(), SensorError> {
        self.trace.borrow_mut().push(name);
        self.commands += 1;
        if self.acks {
            Ok(())
        } else {
            Err(SensorError::ReadFailed {
                sensor: "mock",
                operation: name,
                details: "NACK",
            })
        }
    }
}

impl Co2Sensor for MockSensor {
    async fn stop_periodic_measurement(&mut self) -> Result<(), SensorError> {
        self.command("sensor.stop")
    }

    async fn start_periodic_measurement(&mut self) -> Result<(), SensorError> {
        self.command("sensor.start")
    }

    async fn trigger_single_shot(&mut self) -> Result<(), SensorError> {
        self.command("sensor.trigger")
    }

    async fn data_ready(&mut self) -> Result<bool, SensorError> {
        Ok(!self.never_ready)
    }

    async fn read_measurement(&mut self) -> Result<RawMeasurement, SensorError> {
        self.command("sensor.read")?;
        Ok(self.value)
    }
}

pub struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

pub struct MockNetwork {
    trace: Trace,
    /// Simulated wall clock, advanced by the rig after each sleep.
    pub clock: u32,
    pub wifi_ok: bool,
    pub time_ok: bool,
    /// Returned by time sync instead of `clock` when set.
    pub bogus_time: Option<u32>,
    pub mq_ok: bool,
    pub publish_failures_left: u32,
    pub synced: bool,
    pub radio_on: bool,

    pub wifi_attempts: u32,
    pub time_syncs: u32,
    pub mq_connects: u32,
    pub publish_attempts: u32,
    pub shutdowns: u32,
    pub payloads: Vec<Vec<u8>>,
}

impl NetworkLink for MockNetwork {
    async fn connect_wifi(&mut self, timeout_ms: u32) -> Result<(), NetworkError> {
        self.trace.borrow_mut().push("wifi.connect");
        self.wifi_attempts += 1;
        self.radio_on = true;
        if self.wifi_ok {
            Ok(())
        } else {
            Err(NetworkError::WifiTimeout { timeout_ms })
        }
    }

    async fn sync_time(&mut self, _timeout_ms: u32) -> Result<u32, NetworkError> {
        self.trace.borrow_mut().push("time.sync");
        self.time_syncs += 1;
        if !self.time_ok {
            return Err(NetworkError::TimeSyncFailed {
                details: "no NTP reply",
            });
        }
        self.synced = true;
        Ok(self.bogus_time.unwrap_or(self.clock))
    }

    fn now(&mut self) -> Option<u32> {
        self.synced.then_some(self.clock)
    }

    async fn connect_message_queue(&mut self, _timeout_ms: u32) -> Result<(), NetworkError> {
        self.trace.borrow_mut().push("mq.connect");
        self.mq_connects += 1;
        if self.mq_ok {
            Ok(())
        } else {
            Err(NetworkError::MessageQueueFailed {
                details: "broker refused",
            })
        }
    }

    async fn publish(&mut self, payload: &[u8]) -> Result<(), NetworkError> {
        self.trace.borrow_mut().push("publish");
        self.publish_attempts += 1;
        if self.publish_failures_left > 0 {
            self.publish_failures_left -= 1;
            return Err(NetworkError::PublishFailed {
                details: "no PUBACK",
            });
        }
        self.payloads.push(payload.to_vec());
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.trace.borrow_mut().push("radio.shutdown");
        self.shutdowns += 1;
        self.radio_on = false;
        self.synced = false;
    }
}

pub struct RamRetention {
    pub bytes: [u8; RECORD_LEN],
    pub stores: u32,
}

impl RamRetention {
    pub const fn cold() -> Self {
        Self {
            bytes: [0; RECORD_LEN],
            stores: 0,
        }
    }
}

impl RetentionMemory for RamRetention {
    fn load(&mut self) -> [u8; RECORD_LEN] {
        self.bytes
    }

    fn store(&mut self, bytes: &[u8; RECORD_LEN]) {
        self.bytes = *bytes;
        self.stores += 1;
    }
}

pub type TestBoard = Board<MockAdc, MockBus, MockSensor, NoDelay, MockNetwork, RamRetention>;
pub type TestLifecycle = Lifecycle<MockAdc, MockBus, MockSensor, NoDelay, MockNetwork, RamRetention>;

pub fn board(trace: &Trace) -> TestBoard {
    let mut adc = MockAdc {
        trace: trace.clone(),
        raw: Ok(0),
    };
    adc.set_volts(3.95);

    Board {
        adc,
        bus: MockBus {
            trace: trace.clone(),
            present: true,
            recoveries: 0,
            scans: 0,
        },
        sensor: MockSensor {
            trace: trace.clone(),
            acks: true,
            never_ready: false,
            value: GOOD_AIR,
            commands: 0,
        },
        delay: NoDelay,
        link: MockNetwork {
            trace: trace.clone(),
            clock: at(14, 0),
            wifi_ok: true,
            time_ok: true,
            bogus_time: None,
            mq_ok: true,
            publish_failures_left: 0,
            synced: false,
            radio_on: false,
            wifi_attempts: 0,
            time_syncs: 0,
            mq_connects: 0,
            publish_attempts: 0,
            shutdowns: 0,
            payloads: Vec::new(),
        },
        memory: RamRetention::cold(),
    }
}

/// A simulated node that keeps its capabilities (and retention memory)
/// across boots.
pub struct Rig {
    pub config: OperationalConfig,
    pub board: TestBoard,
    pub trace: Trace,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OperationalConfig) -> Self {
        let trace = Trace::default();
        Self {
            config,
            board: board(&trace),
            trace,
        }
    }

    /// Runs one boot, then advances the clock by the requested sleep.
    pub fn boot(self) -> (Self, SleepRequest, BootReport) {
        let Rig {
            config,
            board,
            trace,
        } = self;
        trace.borrow_mut().clear();

        let mut lifecycle = Lifecycle::new(config, DEVICE_ID, board);
        let request = block_on(lifecycle.run());
        let report = *lifecycle.report();
        let mut board = lifecycle.into_board();
        board.link.clock += request.seconds();

        (
            Self {
                config,
                board,
                trace,
            },
            request,
            report,
        )
    }

    pub fn seed(&mut self, record: PersistentRecord) {
        self.board.memory.bytes = record.to_bytes();
    }

    pub fn record(&self) -> Option<PersistentRecord> {
        PersistentRecord::from_bytes(&self.board.memory.bytes)
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.trace.borrow().clone()
    }
}

/// Index of the first occurrence of `event`, panicking when absent.
pub fn position(events: &[&'static str], event: &str) -> usize {
    events
        .iter()
        .position(|e| *e == event)
        .unwrap_or_else(|| panic!("{event} not in {events:?}"))
}
