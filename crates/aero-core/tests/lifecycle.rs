mod common;

use aero_core::config::OperationalConfig;
use aero_core::lifecycle::{CycleOutcome, Lifecycle, RadioOnWake, SleepReason};
use aero_core::network::Telemetry;
use aero_core::schedule::{QuietPlan, QuietWindow};
use aero_core::sensors::{RawMeasurement, SensorError};
use aero_core::storage::PersistentRecord;
use common::*;
use embassy_futures::block_on;

#[test]
fn normal_cycle_runs_in_strict_order() {
    let (rig, _, _) = Rig::new().boot();
    let events = rig.events();

    let order = [
        "adc",
        "bus.recover",
        "bus.probe",
        "sensor.stop",
        "sensor.trigger",
        "sensor.read",
        "wifi.connect",
        "time.sync",
        "mq.connect",
        "publish",
        "radio.shutdown",
    ];
    let positions: Vec<usize> = order.iter().map(|e| position(&events, e)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "out of order: {events:?}"
    );
    assert_eq!(events.last(), Some(&"radio.shutdown"));
}

#[test]
fn daytime_reading_is_published_and_sleeps_normal_interval() {
    let mut rig = Rig::new();
    rig.board.link.clock = at(14, 0);

    let (rig, request, report) = rig.boot();

    let reading = report.reading.unwrap();
    assert!(reading.valid);
    assert_eq!(reading.co2, 850);
    assert!((reading.voltage - 3.95).abs() < 0.01);
    assert_eq!(reading.timestamp, Some(at(14, 0)));

    assert!(report.time_synced);
    assert!(report.published);
    assert_eq!(report.outcome, CycleOutcome::Measured { quiet_chunks: None });
    assert_eq!(rig.record(), Some(PersistentRecord::idle()));

    assert_eq!(request.seconds(), 1800);
    assert_eq!(request.reason(), SleepReason::Normal);
    assert_eq!(request.radio_on_wake(), RadioOnWake::Enabled);
    assert!(!rig.board.link.radio_on);

    let sent: Telemetry = postcard::from_bytes(&rig.board.link.payloads[0]).unwrap();
    assert_eq!(sent.device_id, DEVICE_ID);
    assert_eq!(sent.co2, 850);
    assert_eq!(sent.timestamp, Some(at(14, 0)));
    assert!(!sent.warning);
    assert!(!report.co2_warning);
}

#[test]
fn high_co2_is_flagged_but_keeps_the_normal_schedule() {
    let mut rig = Rig::new();
    rig.board.sensor.value = RawMeasurement {
        co2_ppm: 1450,
        ..GOOD_AIR
    };

    let (rig, request, report) = rig.boot();

    assert!(report.co2_warning);
    assert!(report.published);
    assert_eq!(request.seconds(), 1800);
    assert_eq!(request.reason(), SleepReason::Normal);
    assert!(!rig.board.link.radio_on);

    let sent: Telemetry = postcard::from_bytes(&rig.board.link.payloads[0]).unwrap();
    assert_eq!(sent.co2, 1450);
    assert!(sent.warning);
}

#[test]
fn warning_threshold_is_inclusive() {
    let mut config = test_config();
    config.co2_warning_ppm = 850;

    let (rig, _, report) = Rig::with_config(config).boot();

    assert!(report.co2_warning);
    let sent: Telemetry = postcard::from_bytes(&rig.board.link.payloads[0]).unwrap();
    assert!(sent.warning);
}

#[test]
fn every_boot_sends_its_own_reading_without_buffering() {
    let mut rig = Rig::new();
    rig.board.link.clock = at(10, 0);

    let (rig, _, _) = rig.boot();
    assert_eq!(rig.board.link.payloads.len(), 1);
    assert_eq!(rig.record(), Some(PersistentRecord::idle()));

    let (rig, _, report) = rig.boot();
    assert!(report.published);
    assert_eq!(rig.board.link.payloads.len(), 2);

    let first: Telemetry = postcard::from_bytes(&rig.board.link.payloads[0]).unwrap();
    let second: Telemetry = postcard::from_bytes(&rig.board.link.payloads[1]).unwrap();
    assert_eq!(first.timestamp, Some(at(10, 0)));
    assert_eq!(second.timestamp, Some(at(10, 30)));
}

#[test]
fn entering_quiet_hours_at_22_05_persists_seven_chunks() {
    let mut rig = Rig::new();
    rig.board.link.clock = at(22, 5);

    let (rig, request, report) = rig.boot();

    assert!(report.published);
    assert_eq!(
        report.outcome,
        CycleOutcome::Measured {
            quiet_chunks: Some(7)
        }
    );
    assert_eq!(rig.record(), Some(PersistentRecord::plan(7, at(24 + 6, 0))));
    assert_eq!(request.seconds(), 3600);
    assert_eq!(request.reason(), SleepReason::QuietChunk);
    assert_eq!(request.radio_on_wake(), RadioOnWake::Disabled);
}

#[test]
fn quiet_night_from_entry_to_morning() {
    let mut rig = Rig::new();
    rig.board.link.clock = at(22, 5);
    let (mut rig, _, _) = rig.boot();

    for expected in (1..=6).rev() {
        let (next, request, report) = rig.boot();
        rig = next;
        assert_eq!(
            report.outcome,
            CycleOutcome::ChunkDecremented {
                remaining_chunks: expected
            }
        );
        assert_eq!(request.seconds(), 3600);
    }
    // seven hours after 22:05
    assert_eq!(rig.board.link.clock, at(24 + 5, 5));

    let (rig, request, report) = rig.boot();
    assert_eq!(
        report.plan,
        QuietPlan::FinalSyncWake {
            wake_target_epoch: at(24 + 6, 0),
            attempts: 0
        }
    );
    assert_eq!(report.outcome, CycleOutcome::FinalSynced { sleep_secs: 55 * 60 });
    assert_eq!(request.seconds(), 55 * 60);
    assert_eq!(request.reason(), SleepReason::QuietFinal);
    assert_eq!(rig.record(), Some(PersistentRecord::idle()));
    assert_eq!(rig.board.link.payloads.len(), 1);

    let (rig, request, report) = rig.boot();
    assert_eq!(rig.board.link.clock - request.seconds(), at(24 + 6, 0));
    assert_eq!(report.plan, QuietPlan::NoPlan);
    assert!(report.published);
    assert_eq!(request.reason(), SleepReason::Normal);
    assert_eq!(rig.board.link.payloads.len(), 2);
}

#[test]
fn ten_hour_window_takes_nine_decrements_then_final_sync() {
    let mut config = test_config();
    config.quiet_window = QuietWindow::from_hm(20, 0, 6, 0);
    let mut rig = Rig::with_config(config);
    rig.board.link.clock = at(20, 0);

    let (mut rig, request, report) = rig.boot();
    assert_eq!(
        report.outcome,
        CycleOutcome::Measured {
            quiet_chunks: Some(10)
        }
    );
    assert_eq!(request.seconds(), 3600);
    assert_eq!(rig.record().unwrap().remaining_chunks, 10);

    for wake in 1..=9 {
        let (next, request, report) = rig.boot();
        rig = next;
        let left = 10 - wake;
        assert_eq!(
            report.outcome,
            CycleOutcome::ChunkDecremented {
                remaining_chunks: left
            },
            "wake {wake}"
        );
        assert_eq!(request.reason(), SleepReason::QuietChunk);
        assert_eq!(request.seconds(), 3600);
        assert_eq!(
            request.radio_on_wake(),
            if left > 1 {
                RadioOnWake::Disabled
            } else {
                RadioOnWake::Enabled
            }
        );
        // plain decrement wakes never touch sensor or radio
        assert_eq!(rig.events(), ["adc", "radio.shutdown"]);
    }
    assert_eq!(rig.board.link.wifi_attempts, 1);
    assert_eq!(rig.record().unwrap().remaining_chunks, 1);

    // tenth wake: 06:00 exactly, the window is over
    let (rig, request, report) = rig.boot();
    assert!(matches!(report.plan, QuietPlan::FinalSyncWake { .. }));
    assert_eq!(report.outcome, CycleOutcome::Measured { quiet_chunks: None });
    assert!(report.published);
    assert_eq!(request.reason(), SleepReason::Normal);
    assert_eq!(request.seconds(), 1800);
    assert_eq!(rig.record(), Some(PersistentRecord::idle()));
}

#[test]
fn final_sync_replans_when_more_than_a_ceiling_is_left() {
    let mut rig = Rig::new();
    rig.seed(PersistentRecord::plan(1, at(6, 0)));
    rig.board.link.clock = at(3, 30);

    let (rig, request, report) = rig.boot();

    assert_eq!(report.outcome, CycleOutcome::Replanned { chunks: 2 });
    assert_eq!(rig.record(), Some(PersistentRecord::plan(2, at(6, 0))));
    assert_eq!(request.seconds(), 3600);
    assert_eq!(request.reason(), SleepReason::QuietChunk);
    assert_eq!(request.radio_on_wake(), RadioOnWake::Disabled);
    assert_eq!(rig.board.sensor.commands, 0);
    assert_eq!(rig.board.link.mq_connects, 0);
}

#[test]
fn final_sync_failure_retries_then_abandons_plan() {
    let mut rig = Rig::new();
    rig.seed(PersistentRecord::plan(1, at(6, 0)));
    rig.board.link.clock = at(5, 0);
    rig.board.link.wifi_ok = false;

    for attempts in 1..=2 {
        let (next, request, report) = rig.boot();
        rig = next;
        assert_eq!(
            report.outcome,
            CycleOutcome::FinalSyncFailed {
                attempts,
                plan_abandoned: false
            }
        );
        assert_eq!(request.seconds(), 300);
        assert_eq!(request.reason(), SleepReason::FinalSyncFailed);
        assert_eq!(
            rig.record(),
            Some(PersistentRecord {
                remaining_chunks: 1,
                wake_target_epoch: at(6, 0),
                final_sync_attempts: attempts,
            })
        );
    }

    let (rig, _, report) = rig.boot();
    assert_eq!(
        report.outcome,
        CycleOutcome::FinalSyncFailed {
            attempts: 3,
            plan_abandoned: true
        }
    );
    assert_eq!(rig.record(), Some(PersistentRecord::idle()));
    assert_eq!(rig.board.sensor.commands, 0);

    let (_, request, report) = rig.boot();
    assert_eq!(report.plan, QuietPlan::NoPlan);
    assert_eq!(report.outcome, CycleOutcome::WifiFault);
    assert_eq!(request.reason(), SleepReason::TransientFailure);
}

#[test]
fn final_sync_rejects_unset_clock() {
    let mut rig = Rig::new();
    rig.seed(PersistentRecord::plan(1, at(6, 0)));
    rig.board.link.bogus_time = Some(86_400);

    let (rig, request, _) = rig.boot();

    assert_eq!(request.reason(), SleepReason::FinalSyncFailed);
    assert_eq!(rig.record().unwrap().final_sync_attempts, 1);
}

#[test]
fn brownout_clears_plan_and_rests_for_the_ceiling() {
    let mut rig = Rig::new();
    rig.seed(PersistentRecord::plan(5, at(6, 0)));
    rig.board.adc.set_volts(3.1);

    let (rig, request, report) = rig.boot();

    assert_eq!(report.outcome, CycleOutcome::Brownout);
    assert_eq!(request.seconds(), 3600);
    assert_eq!(request.reason(), SleepReason::Brownout);
    assert_eq!(rig.record(), Some(PersistentRecord::idle()));
    assert_eq!(rig.events(), ["adc", "radio.shutdown"]);
}

#[test]
fn adc_failure_skips_brownout_guard() {
    let mut rig = Rig::new();
    rig.board.adc.raw = Err(SensorError::ReadFailed {
        sensor: "battery",
        operation: "ADC sample",
        details: "conversion failed",
    });

    let (_, request, report) = rig.boot();

    assert_eq!(report.voltage, None);
    assert!(report.reading.unwrap().voltage.is_nan());
    assert!(report.published);
    assert_eq!(request.reason(), SleepReason::Normal);
}

#[test]
fn sensor_init_failure_makes_no_wifi_attempt() {
    let mut rig = Rig::new();
    rig.board.sensor.acks = false;

    let (rig, request, report) = rig.boot();

    assert_eq!(rig.board.link.wifi_attempts, 0);
    assert_eq!(report.outcome, CycleOutcome::SensorFault);
    assert_eq!(request.seconds(), 300);
    assert_eq!(request.reason(), SleepReason::TransientFailure);
    assert_eq!(rig.board.link.shutdowns, 1);
}

#[test]
fn missing_sensor_scans_bus_and_skips_network() {
    let mut rig = Rig::new();
    rig.board.bus.present = false;

    let (rig, request, report) = rig.boot();

    assert_eq!(report.outcome, CycleOutcome::BusFault);
    assert_eq!(rig.board.bus.scans, 1);
    assert_eq!(rig.board.sensor.commands, 0);
    assert_eq!(rig.board.link.wifi_attempts, 0);
    assert_eq!(request.reason(), SleepReason::TransientFailure);
}

#[test]
fn sensor_timeout_skips_network() {
    let mut rig = Rig::new();
    rig.board.sensor.never_ready = true;

    let (rig, request, report) = rig.boot();

    assert_eq!(report.outcome, CycleOutcome::SensorFault);
    assert_eq!(rig.board.link.wifi_attempts, 0);
    assert_eq!(request.reason(), SleepReason::TransientFailure);
}

#[test]
fn implausible_reading_is_never_sent() {
    let mut rig = Rig::new();
    rig.board.sensor.value = RawMeasurement {
        co2_ppm: 6500,
        ..GOOD_AIR
    };

    let (rig, request, report) = rig.boot();

    assert_eq!(report.outcome, CycleOutcome::SensorFault);
    assert!(report.reading.is_none());
    assert_eq!(rig.board.link.wifi_attempts, 0);
    assert!(rig.board.link.payloads.is_empty());
    assert_eq!(request.reason(), SleepReason::TransientFailure);
}

#[test]
fn wifi_failure_is_transient() {
    let mut rig = Rig::new();
    rig.board.link.wifi_ok = false;

    let (rig, request, report) = rig.boot();

    assert_eq!(report.outcome, CycleOutcome::WifiFault);
    assert_eq!(rig.board.link.time_syncs, 0);
    assert_eq!(rig.board.link.mq_connects, 0);
    assert_eq!(request.seconds(), 300);
    assert!(!rig.board.link.radio_on);
}

#[test]
fn message_queue_failure_is_transient() {
    let mut rig = Rig::new();
    rig.board.link.mq_ok = false;

    let (rig, request, report) = rig.boot();

    assert_eq!(report.outcome, CycleOutcome::MessageQueueFault);
    assert_eq!(rig.board.link.publish_attempts, 0);
    assert_eq!(request.reason(), SleepReason::TransientFailure);
}

#[test]
fn time_sync_failure_still_publishes_without_quiet_check() {
    let mut rig = Rig::new();
    // inside the window, but the node cannot know
    rig.board.link.clock = at(23, 0);
    rig.board.link.time_ok = false;

    let (rig, request, report) = rig.boot();

    assert!(report.published);
    assert!(!report.time_synced);
    assert_eq!(report.reading.unwrap().timestamp, None);
    assert_eq!(report.outcome, CycleOutcome::Measured { quiet_chunks: None });
    assert_eq!(request.seconds(), 1800);
    assert_eq!(rig.record(), Some(PersistentRecord::idle()));

    let sent: Telemetry = postcard::from_bytes(&rig.board.link.payloads[0]).unwrap();
    assert_eq!(sent.timestamp, None);
}

#[test]
fn publish_is_retried_once_after_reconnect() {
    let mut rig = Rig::new();
    rig.board.link.publish_failures_left = 1;

    let (rig, _, report) = rig.boot();

    assert!(report.published);
    assert_eq!(rig.board.link.mq_connects, 2);
    assert_eq!(rig.board.link.publish_attempts, 2);
    assert_eq!(rig.board.link.payloads.len(), 1);
}

#[test]
fn second_publish_failure_is_not_fatal() {
    let mut rig = Rig::new();
    rig.board.link.publish_failures_left = 5;

    let (rig, request, report) = rig.boot();

    assert!(!report.published);
    assert_eq!(rig.board.link.publish_attempts, 2);
    assert_eq!(report.outcome, CycleOutcome::Measured { quiet_chunks: None });
    assert_eq!(request.reason(), SleepReason::Normal);
}

#[test]
fn corrupt_record_falls_back_to_normal_cycle() {
    let mut rig = Rig::new();
    rig.seed(PersistentRecord::plan(5, at(6, 0)));
    rig.board.memory.bytes[10] ^= 0x01;

    let (_, _, report) = rig.boot();

    assert_eq!(report.plan, QuietPlan::NoPlan);
    assert!(report.published);
}

#[test]
fn sleep_primitive_clamps_and_turns_radio_off() {
    let trace = Trace::default();
    let mut lifecycle = Lifecycle::new(test_config(), DEVICE_ID, board(&trace));

    let long = block_on(lifecycle.sleep(7200, SleepReason::QuietFinal));
    assert_eq!(long.seconds(), 3600);

    let zero = block_on(lifecycle.sleep(0, SleepReason::QuietFinal));
    assert_eq!(zero.seconds(), 1800);

    let negative = block_on(lifecycle.sleep(-30, SleepReason::Normal));
    assert_eq!(negative.seconds(), 1800);

    assert!(lifecycle.network().is_radio_off());
    // shutdown reaches the link once, later calls are no-ops
    assert_eq!(lifecycle.into_board().link.shutdowns, 1);
}

#[test]
fn periodic_mode_discards_warmup_before_measuring() {
    let mut config: OperationalConfig = test_config();
    config.measurement_mode = aero_core::config::MeasurementMode::Periodic;
    config.warmup_readings = 2;

    let (rig, _, report) = Rig::with_config(config).boot();

    assert!(report.published);
    let events = rig.events();
    assert!(events.contains(&"sensor.start"));
    assert!(!events.contains(&"sensor.trigger"));
    assert_eq!(events.iter().filter(|e| **e == "sensor.read").count(), 3);
}
