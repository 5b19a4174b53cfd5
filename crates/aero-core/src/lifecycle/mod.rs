//! One boot, start to sleep.
//!
//! ```text
//! BrownoutCheck ──low──────────────────────────────────────────▶ Sleep(ceiling)
//!      │
//! ResumeCheck ──InProgress(n>1)──▶ persist n-1 ─────────────────▶ Sleep(ceiling)
//!      │      └─FinalSyncWake───▶ WiFi + time ─▶ exact / replan ▶ Sleep(..)
//!      │                                        └─window over─┐
//! NormalCycle ◀───────────────────────────────────────────────┘
//!   bus recovery ▶ probe ▶ init ▶ measure ▶ WiFi ▶ time ▶ MQ ▶ publish
//!      │ any fault ─────────────────────────────────────────────▶ Sleep(retry)
//! Reschedule ──quiet──▶ persist chunks ──────────────────────────▶ Sleep(chunk)
//!            └─not quiet / no time ─▶ clear ─────────────────────▶ Sleep(normal)
//! ```
//!
//! Every path returns a [`SleepRequest`], and the only way to build one is
//! the sleep primitive, which turns the radio off first.

mod sleep;

use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::bus::BusRecovery;
use crate::config::OperationalConfig;
use crate::network::{NetworkBringUp, NetworkLink};
use crate::schedule::{FinalSyncDecision, QuietHoursPlanner, QuietPlan};
use crate::sensors::{AdcChannel, BatteryMonitor, Co2Sensor, Reading, SensorAcquisition};
use crate::storage::{PersistentRecord, RetentionMemory, ScheduleStore};

pub use sleep::{DeepSleep, RadioOnWake, SleepReason, SleepRequest, clamp_duration};

/// Platform capabilities handed to the lifecycle for one boot.
pub struct Board<A, B, S, D, N, M> {
    pub adc: A,
    pub bus: B,
    pub sensor: S,
    pub delay: D,
    pub link: N,
    pub memory: M,
}

/// Terminal state of a boot, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Not finished yet.
    Running,
    Brownout,
    /// Intermediate quiet wake; this many chunks are persisted for the next.
    ChunkDecremented { remaining_chunks: u32 },
    /// Final-sync wake slept the corrected remainder.
    FinalSynced { sleep_secs: u32 },
    /// Final-sync wake found more than one ceiling left and started over.
    Replanned { chunks: u32 },
    /// Final-sync wake could not get time; `attempts` failures so far.
    FinalSyncFailed { attempts: u32, plan_abandoned: bool },
    BusFault,
    SensorFault,
    WifiFault,
    MessageQueueFault,
    /// Normal cycle finished; `quiet_chunks` is set when quiet mode was entered.
    Measured { quiet_chunks: Option<u32> },
}

/// What one boot did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootReport {
    pub voltage: Option<f32>,
    /// Plan found in retention memory at boot.
    pub plan: QuietPlan,
    /// Advisory SDA-released flag from bus recovery.
    pub bus_released: Option<bool>,
    pub reading: Option<Reading>,
    /// The reading reached [`OperationalConfig::co2_warning_ppm`].
    pub co2_warning: bool,
    pub time_synced: bool,
    pub published: bool,
    pub outcome: CycleOutcome,
}

impl BootReport {
    const fn new() -> Self {
        Self {
            voltage: None,
            plan: QuietPlan::NoPlan,
            bus_released: None,
            reading: None,
            co2_warning: false,
            time_synced: false,
            published: false,
            outcome: CycleOutcome::Running,
        }
    }
}

/// The per-boot state machine.
pub struct Lifecycle<A, B, S, D, N, M> {
    config: OperationalConfig,
    battery: BatteryMonitor<A>,
    bus: B,
    sensor: SensorAcquisition<S, D>,
    network: NetworkBringUp<N>,
    store: ScheduleStore<M>,
    planner: QuietHoursPlanner,
    report: BootReport,
}

impl<A, B, S, D, N, M> Lifecycle<A, B, S, D, N, M>
where
    A: AdcChannel,
    B: BusRecovery,
    S: Co2Sensor,
    D: DelayNs,
    N: NetworkLink,
    M: RetentionMemory,
{
    /// `config` is expected to have passed [`OperationalConfig::validate`].
    pub fn new(config: OperationalConfig, device_id: &'static str, board: Board<A, B, S, D, N, M>) -> Self {
        Self {
            battery: BatteryMonitor::new(board.adc, config.voltage_divider),
            bus: board.bus,
            sensor: SensorAcquisition::new(board.sensor, board.delay, &config),
            network: NetworkBringUp::new(board.link, config.timeouts, device_id),
            store: ScheduleStore::new(board.memory),
            planner: QuietHoursPlanner::new(&config),
            config,
            report: BootReport::new(),
        }
    }

    /// Runs one boot and returns how long to sleep.
    pub async fn run(&mut self) -> SleepRequest {
        self.report = BootReport::new();

        let voltage = match self.battery.read_voltage() {
            Ok(volts) => {
                self.report.voltage = Some(volts);
                if volts < self.config.min_operating_volts {
                    warn!(
                        "Brownout: {} V below {} V, abandoning any quiet plan",
                        volts, self.config.min_operating_volts
                    );
                    self.store.clear();
                    self.report.outcome = CycleOutcome::Brownout;
                    return self
                        .sleep(i64::from(self.config.max_sleep_secs), SleepReason::Brownout)
                        .await;
                }
                volts
            }
            Err(e) => {
                warn!("Battery read failed, skipping brownout check: {}", e);
                f32::NAN
            }
        };

        let plan = QuietPlan::from_record(self.store.read().as_ref());
        self.report.plan = plan;
        debug!("Resume check: {:?}", plan);

        let request = match plan {
            QuietPlan::NoPlan => self.normal_cycle(voltage).await,
            QuietPlan::InProgress {
                remaining_chunks,
                wake_target_epoch,
            } => self.continue_quiet(remaining_chunks, wake_target_epoch).await,
            QuietPlan::FinalSyncWake {
                wake_target_epoch,
                attempts,
            } => self.final_sync(wake_target_epoch, attempts, voltage).await,
        };

        info!(
            "Boot done: {:?}, sleeping {} s ({:?})",
            self.report.outcome,
            request.seconds(),
            request.reason()
        );
        request
    }

    /// Intermediate quiet wake: decrement and go straight back to sleep.
    async fn continue_quiet(&mut self, remaining_chunks: u32, wake_target_epoch: u32) -> SleepRequest {
        let next = remaining_chunks - 1;
        self.store
            .write(&PersistentRecord::plan(next, wake_target_epoch));
        info!("Quiet chunk: {} -> {} remaining", remaining_chunks, next);
        self.report.outcome = CycleOutcome::ChunkDecremented {
            remaining_chunks: next,
        };

        self.sleep_with_hint(
            i64::from(self.config.max_sleep_secs),
            SleepReason::QuietChunk,
            RadioOnWake::for_remaining_chunks(next),
        )
        .await
    }

    /// Last quiet wake: correct clock drift before the final sleep.
    async fn final_sync(&mut self, wake_target_epoch: u32, attempts: u32, voltage: f32) -> SleepRequest {
        info!("Final-sync wake, target {}", wake_target_epoch);

        let synced = match self.network.connect_wifi().await {
            Ok(()) => self.network.sync_time().await,
            Err(e) => Err(e),
        };

        let synced = match synced {
            Ok(epoch) => epoch,
            Err(e) => {
                let attempts = attempts.saturating_add(1);
                let abandon = attempts >= self.config.max_final_sync_attempts;
                if abandon {
                    error!(
                        "Final sync failed {} times ({}), abandoning quiet plan",
                        attempts, e
                    );
                    self.store.clear();
                } else {
                    warn!("Final sync failed ({}), attempt {}", e, attempts);
                    self.store.write(&PersistentRecord {
                        remaining_chunks: 1,
                        wake_target_epoch,
                        final_sync_attempts: attempts,
                    });
                }
                self.report.outcome = CycleOutcome::FinalSyncFailed {
                    attempts,
                    plan_abandoned: abandon,
                };
                return self
                    .sleep(
                        i64::from(self.config.retry_interval_secs),
                        SleepReason::FinalSyncFailed,
                    )
                    .await;
            }
        };
        self.report.time_synced = true;

        let now = self.network.now().unwrap_or(synced);
        match self.planner.final_sync(now, wake_target_epoch) {
            FinalSyncDecision::WindowOver => {
                info!("Quiet window already over, measuring now");
                self.store.clear();
                self.network.shutdown().await;
                self.report.time_synced = false;
                self.normal_cycle(voltage).await
            }
            FinalSyncDecision::SleepExact(secs) => {
                self.store.clear();
                self.report.outcome = CycleOutcome::FinalSynced { sleep_secs: secs };
                self.sleep(i64::from(secs), SleepReason::QuietFinal).await
            }
            FinalSyncDecision::Replan { chunks } => {
                warn!(
                    "{} s still left after sync, replanning {} chunk(s)",
                    i64::from(wake_target_epoch) - i64::from(now),
                    chunks
                );
                self.store
                    .write(&PersistentRecord::plan(chunks, wake_target_epoch));
                self.report.outcome = CycleOutcome::Replanned { chunks };
                self.sleep_with_hint(
                    i64::from(self.config.max_sleep_secs),
                    SleepReason::QuietChunk,
                    RadioOnWake::for_remaining_chunks(chunks),
                )
                .await
            }
        }
    }

    async fn normal_cycle(&mut self, voltage: f32) -> SleepRequest {
        let released = self.bus.recover().await;
        self.report.bus_released = Some(released);

        if !self.bus.device_present(self.config.sensor_address).await {
            error!(
                "Sensor not found at {:#04x}",
                self.config.sensor_address
            );
            self.bus.scan().await;
            return self.transient(CycleOutcome::BusFault).await;
        }

        if let Err(e) = self.sensor.init(self.config.warmup_readings).await {
            error!("Sensor init failed: {}", e);
            return self.transient(CycleOutcome::SensorFault).await;
        }

        let mut reading = match self.sensor.measure_single_shot(self.config.timeouts.sensor_ms).await {
            Ok(reading) => reading,
            Err(e) => {
                error!("Measurement failed: {}", e);
                return self.transient(CycleOutcome::SensorFault).await;
            }
        };
        reading.voltage = voltage;
        self.report.reading = Some(reading);

        let warning = reading.co2 >= self.config.co2_warning_ppm;
        if warning {
            warn!(
                "CO2 warning: {} ppm at or above {} ppm",
                reading.co2, self.config.co2_warning_ppm
            );
        }
        self.report.co2_warning = warning;

        // valid data exists; only now is the radio worth powering
        if self.network.connect_wifi().await.is_err() {
            return self.transient(CycleOutcome::WifiFault).await;
        }

        let synced = self.network.sync_time().await.ok();
        reading.timestamp = synced;
        self.report.time_synced = synced.is_some();
        self.report.reading = Some(reading);

        if self.network.connect_message_queue().await.is_err() {
            return self.transient(CycleOutcome::MessageQueueFault).await;
        }

        match self.network.publish(&reading, warning).await {
            Ok(()) => self.report.published = true,
            Err(e) => warn!("Reading not delivered this cycle: {}", e),
        }

        self.reschedule(synced).await
    }

    async fn reschedule(&mut self, synced: Option<u32>) -> SleepRequest {
        let entry = match synced {
            Some(synced) => {
                let now = self.network.now().unwrap_or(synced);
                if self.planner.is_quiet_at(now) {
                    self.planner.plan_entry(now)
                } else {
                    debug!("Outside quiet hours");
                    None
                }
            }
            None => {
                info!("No network time, quiet hours not evaluated");
                None
            }
        };

        match entry {
            Some(plan) => {
                info!(
                    "Entering quiet hours until {}: {} chunk(s)",
                    plan.wake_target_epoch, plan.chunks
                );
                self.store
                    .write(&PersistentRecord::plan(plan.chunks, plan.wake_target_epoch));
                self.report.outcome = CycleOutcome::Measured {
                    quiet_chunks: Some(plan.chunks),
                };
                self.sleep_with_hint(
                    i64::from(plan.first_sleep_secs),
                    SleepReason::QuietChunk,
                    RadioOnWake::for_remaining_chunks(plan.chunks),
                )
                .await
            }
            None => {
                self.store.clear();
                self.report.outcome = CycleOutcome::Measured { quiet_chunks: None };
                self.sleep(
                    i64::from(self.config.sleep_interval_secs),
                    SleepReason::Normal,
                )
                .await
            }
        }
    }

    async fn transient(&mut self, outcome: CycleOutcome) -> SleepRequest {
        self.report.outcome = outcome;
        self.sleep(
            i64::from(self.config.retry_interval_secs),
            SleepReason::TransientFailure,
        )
        .await
    }

    /// The sleep primitive. Shuts the radio down, clamps `requested_secs` to
    /// the hardware ceiling and replaces a non-positive request with the
    /// normal interval.
    pub async fn sleep(&mut self, requested_secs: i64, reason: SleepReason) -> SleepRequest {
        self.sleep_with_hint(requested_secs, reason, RadioOnWake::Enabled)
            .await
    }

    async fn sleep_with_hint(
        &mut self,
        requested_secs: i64,
        reason: SleepReason,
        radio_on_wake: RadioOnWake,
    ) -> SleepRequest {
        self.network.shutdown().await;
        let seconds = clamp_duration(
            requested_secs,
            self.config.sleep_interval_secs,
            self.config.max_sleep_secs,
        );
        SleepRequest::new(seconds, reason, radio_on_wake)
    }

    pub const fn report(&self) -> &BootReport {
        &self.report
    }

    pub const fn config(&self) -> &OperationalConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkBringUp<N> {
        &self.network
    }

    pub fn store(&self) -> &ScheduleStore<M> {
        &self.store
    }

    /// Hands the capabilities back, e.g. to carry retention memory into the
    /// next simulated boot.
    pub fn into_board(self) -> Board<A, B, S, D, N, M> {
        let (sensor, delay) = self.sensor.into_parts();
        Board {
            adc: self.battery.into_inner(),
            bus: self.bus,
            sensor,
            delay,
            link: self.network.into_link(),
            memory: self.store.into_inner(),
        }
    }
}
