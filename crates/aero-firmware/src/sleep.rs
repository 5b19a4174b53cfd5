//! Deep sleep on the RTC timer.

use core::time::Duration;

use aero_core::config::OperationalConfig;
use aero_core::lifecycle::{DeepSleep, SleepRequest};
use esp_hal::peripherals::LPWR;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use log::info;

/// Rest taken by a boot that never reached the lifecycle's own sleep.
pub const FAULT_REST_SECS: u32 = OperationalConfig::defaults().retry_interval_secs;

pub struct RtcDeepSleep {
    rtc: Rtc<'static>,
}

impl RtcDeepSleep {
    pub fn new(lpwr: LPWR<'static>) -> Self {
        Self {
            rtc: Rtc::new(lpwr),
        }
    }

    /// Timed deep sleep without a [`SleepRequest`]. Deep sleep powers the
    /// radio domain down whatever state the link was left in.
    pub fn rest(&mut self, seconds: u32) -> ! {
        let timer = TimerWakeupSource::new(Duration::from_secs(seconds.into()));
        self.rtc.sleep_deep(&[&timer])
    }
}

impl DeepSleep for RtcDeepSleep {
    /// The radio is already down when a [`SleepRequest`] exists. The wake hint
    /// needs no action here because the link only starts the radio on demand.
    fn enter(&mut self, request: &SleepRequest) -> ! {
        info!(
            "Deep sleep {} s ({:?}, radio on wake: {:?})",
            request.seconds(),
            request.reason(),
            request.radio_on_wake()
        );
        let timer = TimerWakeupSource::new(request.duration());
        self.rtc.sleep_deep(&[&timer])
    }
}

/// Deep sleep from the panic handler, which owns no peripherals.
pub fn rest_after_panic() -> ! {
    // SAFETY: nothing that held LPWR runs again after a panic.
    let lpwr = unsafe { LPWR::steal() };
    RtcDeepSleep::new(lpwr).rest(FAULT_REST_SECS)
}
