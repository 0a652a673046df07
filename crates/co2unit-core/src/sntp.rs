//! SNTP packet format: a 48-byte client request and the transmit
//! timestamp of the server's reply.

use chrono::{DateTime, NaiveDateTime};

pub const NTP_PORT: u16 = 123;
pub const PACKET_LEN: usize = 48;
pub const DEFAULT_SERVER: &str = "pool.ntp.org";

/// Seconds from 1900-01-01 to 1970-01-01.
const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;
/// Version 3, client mode.
const REQUEST_FLAGS: u8 = 0x1B;
const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;
const LEAP_UNSYNCHRONIZED: u8 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SntpError {
    Short,
    NotServerReply,
    /// Stratum 0: the server refuses to serve us right now.
    KissOfDeath,
    Unsynchronized,
    OutOfRange,
}

pub fn request_packet() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = REQUEST_FLAGS;
    packet
}

/// Server transmit time as UTC.
pub fn parse_reply(packet: &[u8]) -> Result<NaiveDateTime, SntpError> {
    if packet.len() < PACKET_LEN {
        return Err(SntpError::Short);
    }
    let mode = packet[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(SntpError::NotServerReply);
    }
    if packet[0] >> 6 == LEAP_UNSYNCHRONIZED {
        return Err(SntpError::Unsynchronized);
    }
    if packet[1] == 0 {
        return Err(SntpError::KissOfDeath);
    }

    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let frac = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    // Era 1 starts in 2036; timestamps there have the top bit clear.
    let era_secs = if secs & 0x8000_0000 == 0 {
        secs as i64 + (1i64 << 32)
    } else {
        secs as i64
    };
    let nanos = ((frac as u64 * 1_000_000_000) >> 32) as u32;
    DateTime::from_timestamp(era_secs - NTP_UNIX_OFFSET_SECS, nanos)
        .map(|t| t.naive_utc())
        .ok_or(SntpError::OutOfRange)
}
