//! Lazy network bring-up: WiFi, time sync, message queue, publish.
//!
//! Nothing here is called until a valid reading exists. The link itself is a
//! capability supplied by the platform; this module owns ordering, the
//! publish retry, and the guarantee that the radio is off before sleep.

mod payload;
pub mod sntp;

use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::config::Timeouts;
use crate::sensors::Reading;

pub use payload::{PAYLOAD_CAPACITY, Telemetry};

/// Earliest Unix time accepted from time sync (2023-11-14). Anything before
/// this is an unset clock, not a real answer.
pub const MIN_VALID_EPOCH: u32 = 1_700_000_000;

/// First Unix time past the end of NTP era 0 (2036-02-07 06:28:16). A zeroed
/// NTP timestamp wraps to exactly this value, so it and anything later is
/// refused.
pub const MAX_VALID_EPOCH: u32 = 0u32.wrapping_sub(sntp::NTP_UNIX_OFFSET);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    #[error("WiFi association timed out after {timeout_ms} ms")]
    WifiTimeout { timeout_ms: u32 },

    #[error("WiFi failed: {details}")]
    WifiFailed { details: &'static str },

    #[error("Time sync failed: {details}")]
    TimeSyncFailed { details: &'static str },

    #[error("Time sync returned implausible epoch {0}")]
    ImplausibleTime(u32),

    #[error("Message queue connect failed: {details}")]
    MessageQueueFailed { details: &'static str },

    #[error("Publish failed: {details}")]
    PublishFailed { details: &'static str },

    #[error("Telemetry does not fit the {capacity} byte payload buffer")]
    PayloadTooLarge { capacity: usize },
}

/// Radio, time and message-queue primitives of the platform.
///
/// Implementations must not persist WiFi credentials to flash; they are
/// supplied from configuration on every connect.
pub trait NetworkLink {
    fn connect_wifi(&mut self, timeout_ms: u32) -> impl Future<Output = Result<(), NetworkError>>;

    /// One-shot network time fetch, returning Unix seconds.
    fn sync_time(&mut self, timeout_ms: u32) -> impl Future<Output = Result<u32, NetworkError>>;

    /// Current Unix time from the clock set by the last successful sync.
    fn now(&mut self) -> Option<u32>;

    fn connect_message_queue(&mut self, timeout_ms: u32)
    -> impl Future<Output = Result<(), NetworkError>>;

    fn publish(&mut self, payload: &[u8]) -> impl Future<Output = Result<(), NetworkError>>;

    /// Disconnects and powers the radio down. Safe to call when it never
    /// came up.
    fn shutdown(&mut self) -> impl Future<Output = ()>;
}

/// Sequencing and failure policy over a [`NetworkLink`].
pub struct NetworkBringUp<N> {
    link: N,
    timeouts: Timeouts,
    device_id: &'static str,
    radio_off: bool,
    synced: bool,
}

impl<N: NetworkLink> NetworkBringUp<N> {
    pub fn new(link: N, timeouts: Timeouts, device_id: &'static str) -> Self {
        Self {
            link,
            timeouts,
            device_id,
            radio_off: false,
            synced: false,
        }
    }

    pub async fn connect_wifi(&mut self) -> Result<(), NetworkError> {
        self.radio_off = false;
        info!("Connecting WiFi (timeout {} ms)", self.timeouts.wifi_ms);
        match self.link.connect_wifi(self.timeouts.wifi_ms).await {
            Ok(()) => {
                info!("WiFi connected");
                Ok(())
            }
            Err(e) => {
                error!("WiFi connect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Fetches network time and rejects epochs outside
    /// [`MIN_VALID_EPOCH`]`..`[`MAX_VALID_EPOCH`].
    pub async fn sync_time(&mut self) -> Result<u32, NetworkError> {
        let epoch = self
            .link
            .sync_time(self.timeouts.time_sync_ms)
            .await
            .inspect_err(|e| warn!("Time sync failed: {}", e))?;

        if !(MIN_VALID_EPOCH..MAX_VALID_EPOCH).contains(&epoch) {
            warn!(
                "Time sync returned {} outside {}..{}, ignoring",
                epoch, MIN_VALID_EPOCH, MAX_VALID_EPOCH
            );
            return Err(NetworkError::ImplausibleTime(epoch));
        }

        info!("Time synced: {}", epoch);
        self.synced = true;
        Ok(epoch)
    }

    /// Current time, available only after a successful [`Self::sync_time`].
    pub fn now(&mut self) -> Option<u32> {
        if !self.synced {
            return None;
        }
        self.link
            .now()
            .filter(|t| (MIN_VALID_EPOCH..MAX_VALID_EPOCH).contains(t))
    }

    pub async fn connect_message_queue(&mut self) -> Result<(), NetworkError> {
        self.link
            .connect_message_queue(self.timeouts.message_queue_ms)
            .await
            .inspect(|()| info!("Message queue connected"))
            .inspect_err(|e| error!("Message queue connect failed: {}", e))
    }

    /// Encodes `reading` into a fixed buffer and publishes it, flagged when
    /// `warning` is set.
    ///
    /// On failure the message queue is reconnected once and the publish
    /// retried once. A second failure is returned to the caller.
    pub async fn publish(&mut self, reading: &Reading, warning: bool) -> Result<(), NetworkError> {
        let mut buf = [0u8; PAYLOAD_CAPACITY];
        let payload = Telemetry::from_reading(self.device_id, reading, warning).encode(&mut buf)?;
        debug!("Publishing {} byte payload", payload.len());

        let first = match self.link.publish(payload).await {
            Ok(()) => {
                info!("Published");
                return Ok(());
            }
            Err(e) => e,
        };

        warn!("Publish failed ({}), reconnecting once", first);
        self.link
            .connect_message_queue(self.timeouts.message_queue_ms)
            .await
            .inspect_err(|e| error!("Reconnect failed: {}", e))?;

        self.link
            .publish(payload)
            .await
            .inspect(|()| info!("Published on retry"))
            .inspect_err(|e| error!("Publish retry failed: {}", e))
    }

    /// Powers the radio down. Repeated calls within one boot are no-ops.
    pub async fn shutdown(&mut self) {
        if self.radio_off {
            return;
        }
        self.link.shutdown().await;
        self.radio_off = true;
        self.synced = false;
        debug!("Radio off");
    }

    pub const fn is_radio_off(&self) -> bool {
        self.radio_off
    }

    pub fn link(&self) -> &N {
        &self.link
    }

    pub fn into_link(self) -> N {
        self.link
    }
}
