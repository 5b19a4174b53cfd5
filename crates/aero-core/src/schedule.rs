//! Quiet-hours planning across multiple deep-sleep cycles.
//!
//! A quiet window is usually far longer than the longest single deep sleep
//! the hardware supports, so it is covered by a chain of full-length sleep
//! chunks. The chain lives in retention memory as a chunk counter plus the
//! absolute wake target; every wake either decrements the counter and goes
//! straight back to sleep, or (on the last chunk) resynchronizes the clock and
//! sleeps the exact remainder.
//!
//! Chunk convention: the count persisted on entry is
//! `max(1, floor(seconds_until_target / max_sleep))` and the entry sleep is the
//! first chunk. A wake that reads `n > 1` persists `n - 1`; a wake that reads
//! `1` is the final-sync wake.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Timelike};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{OperationalConfig, TimeOfDay};
use crate::storage::PersistentRecord;

/// Do-not-disturb window expressed in local time of day.
///
/// `start` is inclusive, `end` is exclusive. A window with `start > end`
/// wraps past midnight. `start == end` is empty.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl QuietWindow {
    pub const fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    /// Builds a window from raw hour/minute pairs.
    ///
    /// # Panics
    ///
    /// Panics if any component is out of range. Intended for constants, where
    /// the panic surfaces at compile time.
    pub const fn from_hm(start_hour: u8, start_minute: u8, end_hour: u8, end_minute: u8) -> Self {
        let start = match TimeOfDay::new(start_hour, start_minute) {
            Some(t) => t,
            None => panic!("quiet window start out of range"),
        };
        let end = match TimeOfDay::new(end_hour, end_minute) {
            Some(t) => t,
            None => panic!("quiet window end out of range"),
        };
        Self { start, end }
    }

    pub const fn crosses_midnight(&self) -> bool {
        self.start.minutes_since_midnight() > self.end.minutes_since_midnight()
    }

    /// Whether `hour:minute` falls inside the window.
    pub fn contains(&self, hour: u8, minute: u8) -> bool {
        let now = u16::from(hour) * 60 + u16::from(minute);
        let start = self.start.minutes_since_midnight();
        let end = self.end.minutes_since_midnight();

        if self.crosses_midnight() {
            now >= start || now < end
        } else {
            now >= start && now < end
        }
    }
}

/// Resumable quiet-hours state, reconstructed from retention memory on boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuietPlan {
    NoPlan,
    /// More than one chunk is left; this wake only decrements and re-sleeps.
    InProgress {
        remaining_chunks: u32,
        wake_target_epoch: u32,
    },
    /// Last chunk: resync time and sleep the corrected remainder.
    FinalSyncWake {
        wake_target_epoch: u32,
        attempts: u32,
    },
}

impl QuietPlan {
    /// Interprets a record read from the store. `None` (missing or corrupt)
    /// and a zero chunk count both mean no plan.
    pub fn from_record(record: Option<&PersistentRecord>) -> Self {
        match record {
            None => Self::NoPlan,
            Some(r) if r.remaining_chunks == 0 => Self::NoPlan,
            Some(r) if r.remaining_chunks == 1 => Self::FinalSyncWake {
                wake_target_epoch: r.wake_target_epoch,
                attempts: r.final_sync_attempts,
            },
            Some(r) => Self::InProgress {
                remaining_chunks: r.remaining_chunks,
                wake_target_epoch: r.wake_target_epoch,
            },
        }
    }
}

/// Result of deciding to enter quiet mode at the end of a normal cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPlan {
    pub wake_target_epoch: u32,
    /// Chunk count to persist before the first sleep.
    pub chunks: u32,
    /// Length of the entry sleep, never above the ceiling.
    pub first_sleep_secs: u32,
}

/// What the final-sync wake does once it knows the real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalSyncDecision {
    /// The window already ended; run a normal cycle now.
    WindowOver,
    /// Sleep exactly this long, then wake into a normal cycle.
    SleepExact(u32),
    /// Drift left more than one ceiling to go; start another chunk chain.
    Replan { chunks: u32 },
}

/// Stateless planner built from the node configuration.
#[derive(Debug, Clone, Copy)]
pub struct QuietHoursPlanner {
    window: QuietWindow,
    enabled: bool,
    utc_offset_secs: i32,
    max_sleep_secs: u32,
}

impl QuietHoursPlanner {
    pub fn new(config: &OperationalConfig) -> Self {
        Self {
            window: config.quiet_window,
            enabled: config.quiet_hours_enabled,
            utc_offset_secs: config.utc_offset_secs,
            max_sleep_secs: config.max_sleep_secs,
        }
    }

    pub const fn window(&self) -> QuietWindow {
        self.window
    }

    /// Whether local `hour:minute` is inside the configured window.
    pub fn is_quiet_now(&self, hour: u8, minute: u8) -> bool {
        self.enabled && self.window.contains(hour, minute)
    }

    /// Whether the absolute time `now_epoch` is inside the window.
    pub fn is_quiet_at(&self, now_epoch: u32) -> bool {
        match local_time_of_day(now_epoch, self.utc_offset_secs) {
            Some(t) => self.is_quiet_now(t.hour(), t.minute()),
            None => false,
        }
    }

    /// Next absolute time, strictly after `now_epoch`, at which the window
    /// ends. Rolls over to tomorrow when today's end has already passed.
    pub fn calculate_wake_target(&self, now_epoch: u32) -> Option<u32> {
        next_occurrence(now_epoch, self.window.end, self.utc_offset_secs)
    }

    /// Plans the chunk chain for a window entered at `now_epoch`.
    pub fn plan_entry(&self, now_epoch: u32) -> Option<EntryPlan> {
        let target = self.calculate_wake_target(now_epoch)?;
        let plan = split_into_chunks(now_epoch, target, self.max_sleep_secs);
        debug!(
            "Quiet entry: target={} in {} s -> {} chunk(s), first sleep {} s",
            target,
            target - now_epoch,
            plan.chunks,
            plan.first_sleep_secs
        );
        Some(plan)
    }

    /// Decides the final-sync wake given freshly synchronized time.
    pub fn final_sync(&self, now_epoch: u32, wake_target_epoch: u32) -> FinalSyncDecision {
        let remaining = i64::from(wake_target_epoch) - i64::from(now_epoch);
        let ceiling = i64::from(self.max_sleep_secs);

        if remaining <= 0 {
            FinalSyncDecision::WindowOver
        } else if remaining <= ceiling {
            // remaining fits in u32 because it is bounded by the ceiling
            FinalSyncDecision::SleepExact(remaining as u32)
        } else {
            let chunks = (remaining / ceiling).clamp(1, i64::from(u32::MAX)) as u32;
            FinalSyncDecision::Replan { chunks }
        }
    }
}

fn split_into_chunks(now_epoch: u32, wake_target_epoch: u32, max_sleep_secs: u32) -> EntryPlan {
    let seconds_until = wake_target_epoch.saturating_sub(now_epoch);
    let max_sleep = max_sleep_secs.max(1);

    EntryPlan {
        wake_target_epoch,
        chunks: (seconds_until / max_sleep).max(1),
        first_sleep_secs: seconds_until.min(max_sleep),
    }
}

fn to_local(epoch: u32, utc_offset_secs: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(utc_offset_secs)?;
    let utc = DateTime::from_timestamp(i64::from(epoch), 0)?;
    Some(utc.with_timezone(&offset))
}

/// Local time of day for an absolute Unix time.
pub fn local_time_of_day(epoch: u32, utc_offset_secs: i32) -> Option<TimeOfDay> {
    let local = to_local(epoch, utc_offset_secs)?;
    TimeOfDay::new(local.hour() as u8, local.minute() as u8)
}

/// Next Unix time strictly after `now_epoch` whose local time of day is `at`.
pub fn next_occurrence(now_epoch: u32, at: TimeOfDay, utc_offset_secs: i32) -> Option<u32> {
    let local = to_local(now_epoch, utc_offset_secs)?;
    let offset = *local.offset();
    let on = |date: NaiveDate| {
        date.and_hms_opt(u32::from(at.hour()), u32::from(at.minute()), 0)
            .and_then(|naive| offset.from_local_datetime(&naive).single())
    };

    let today = local.date_naive();
    let mut target = on(today)?;
    if target.timestamp() <= i64::from(now_epoch) {
        target = on(today.succ_opt()?)?;
    }
    u32::try_from(target.timestamp()).ok()
}
