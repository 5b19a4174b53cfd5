//! SNTP request and reply framing (RFC 4330), kept free of any socket so the
//! checks on a server's answer can run on the host.

use super::NetworkError;

pub const NTP_PORT: u16 = 123;
pub const NTP_PACKET_LEN: usize = 48;

/// Seconds between 1900-01-01 and 1970-01-01.
pub const NTP_UNIX_OFFSET: u32 = 2_208_988_800;

/// LI = 0, VN = 4, Mode = 3 (client).
const CLIENT_HEADER: u8 = 0x23;
const MODE_SERVER: u8 = 4;
/// Leap indicator 3: the server's own clock is not synchronised.
const LEAP_ALARM: u8 = 3;
const TRANSMIT_SECONDS: usize = 40;

/// A client request with every field but the header zeroed.
pub const fn request() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet
}

/// Validates a server reply and returns its transmit time as Unix seconds.
///
/// Rejects short packets, anything that is not a server-mode answer,
/// kiss-o'-death (stratum 0) and unsynchronised servers, and transmit
/// timestamps that do not fall after the Unix epoch.
pub fn decode_reply(packet: &[u8]) -> Result<u32, NetworkError> {
    if packet.len() < NTP_PACKET_LEN {
        return Err(NetworkError::TimeSyncFailed {
            details: "short NTP reply",
        });
    }

    let header = packet[0];
    if header & 0x07 != MODE_SERVER {
        return Err(NetworkError::TimeSyncFailed {
            details: "NTP reply is not from a server",
        });
    }
    if header >> 6 == LEAP_ALARM {
        return Err(NetworkError::TimeSyncFailed {
            details: "NTP server is unsynchronised",
        });
    }
    if !(1..=15).contains(&packet[1]) {
        return Err(NetworkError::TimeSyncFailed {
            details: "NTP kiss-o'-death or bad stratum",
        });
    }

    let seconds = u32::from_be_bytes([
        packet[TRANSMIT_SECONDS],
        packet[TRANSMIT_SECONDS + 1],
        packet[TRANSMIT_SECONDS + 2],
        packet[TRANSMIT_SECONDS + 3],
    ]);
    seconds
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or(NetworkError::TimeSyncFailed {
            details: "NTP transmit timestamp before 1970",
        })
}
