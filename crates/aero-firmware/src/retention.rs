//! Schedule record storage in RTC fast memory.

use core::sync::atomic::{AtomicBool, Ordering};

use aero_core::storage::{RECORD_LEN, RetentionMemory};

/// Survives deep sleep; cold boots leave bytes the CRC rejects.
#[esp_hal::ram(unstable(rtc_fast))]
static mut RETAINED: [u8; RECORD_LEN] = [0; RECORD_LEN];

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Sole handle onto the retained record bytes.
pub struct RtcRetention {
    _private: (),
}

impl RtcRetention {
    /// Returns the handle once per boot.
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self { _private: () })
        }
    }
}

impl RetentionMemory for RtcRetention {
    fn load(&mut self) -> [u8; RECORD_LEN] {
        // SAFETY: `take` hands out a single handle, so nothing else touches
        // the static while it lives.
        unsafe { (&raw const RETAINED).read() }
    }

    fn store(&mut self, bytes: &[u8; RECORD_LEN]) {
        // SAFETY: as in `load`.
        unsafe { (&raw mut RETAINED).write(*bytes) }
    }
}
