use core::time::Duration;

use log::warn;

/// Why a boot ended in the sleep it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    /// Cycle completed outside quiet hours.
    Normal,
    /// Bus, sensor, WiFi or message-queue fault; retry soon.
    TransientFailure,
    /// Supply below the operating minimum; rest as long as possible.
    Brownout,
    /// One full-length chunk of a quiet plan.
    QuietChunk,
    /// Time-corrected remainder of a quiet window.
    QuietFinal,
    /// The final-sync wake could not reach the network.
    FinalSyncFailed,
}

/// Whether the radio needs to be available on the next wake.
///
/// A wake that only decrements the chunk counter never touches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioOnWake {
    Enabled,
    Disabled,
}

impl RadioOnWake {
    /// Hint for a sleep after which `remaining_chunks` will be read.
    pub const fn for_remaining_chunks(remaining_chunks: u32) -> Self {
        if remaining_chunks > 1 {
            Self::Disabled
        } else {
            Self::Enabled
        }
    }
}

/// The single way a boot ends.
///
/// Only the lifecycle's sleep primitive can build one, so holding a
/// `SleepRequest` means the radio is already off and the duration is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepRequest {
    seconds: u32,
    reason: SleepReason,
    radio_on_wake: RadioOnWake,
}

impl SleepRequest {
    pub(super) const fn new(seconds: u32, reason: SleepReason, radio_on_wake: RadioOnWake) -> Self {
        Self {
            seconds,
            reason,
            radio_on_wake,
        }
    }

    pub const fn seconds(&self) -> u32 {
        self.seconds
    }

    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds as u64)
    }

    pub const fn reason(&self) -> SleepReason {
        self.reason
    }

    pub const fn radio_on_wake(&self) -> RadioOnWake {
        self.radio_on_wake
    }
}

/// Platform deep sleep. Execution resumes at the top of boot.
pub trait DeepSleep {
    fn enter(&mut self, request: &SleepRequest) -> !;
}

/// Bounds a requested duration to `1..=ceiling`.
///
/// A non-positive request is an arithmetic slip upstream; sleeping zero
/// seconds would reboot-loop the battery flat, so `fallback` is used instead.
pub fn clamp_duration(requested_secs: i64, fallback_secs: u32, ceiling_secs: u32) -> u32 {
    let ceiling = ceiling_secs.max(1);
    if requested_secs <= 0 {
        warn!(
            "Sleep of {} s requested, using {} s fallback",
            requested_secs, fallback_secs
        );
        return fallback_secs.clamp(1, ceiling);
    }
    if requested_secs > i64::from(ceiling) {
        warn!("Sleep of {} s clamped to {} s ceiling", requested_secs, ceiling);
        return ceiling;
    }
    // in 1..=ceiling, so it fits
    requested_secs as u32
}
