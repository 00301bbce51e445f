//! Reproducible pseudorandom payloads.
//!
//! The payload for a run is derived only from the minute the transmission
//! starts, so a receiver that knows the schedule can regenerate the exact
//! string it should have heard without any side channel.
//!
//! The derivation is pinned:
//!
//! 1. seed string: start minute (UTC) formatted `%d-%m-%Y %H:%M`
//! 2. checksum: CRC-32 (ISO-HDLC) of the seed string's UTF-8 bytes
//! 3. generator: ChaCha8 seeded with the checksum as a `u64`
//! 4. symbols: top six bits of successive `next_u32()` outputs, values
//!    of 62 or more rejected, indexing `A-Z a-z 0-9`
//! 5. wire string: `DE <callsign> $$$$$<body>$$$$$`

use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use beacon_core::error::{Error, Result};
use beacon_core::types::{StationConfig, TxPayload};

/// `strftime` format of the seed string.
pub const SEED_FORMAT: &str = "%d-%m-%Y %H:%M";

/// Symbols the body is drawn from.
pub const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Framing around the body on the wire.
pub const MARKER: &str = "$$$$$";

/// Builds the payload for a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadGenerator {
    callsign: String,
    length: usize,
}

impl PayloadGenerator {
    pub fn new(callsign: &str, length: usize) -> Self {
        PayloadGenerator {
            callsign: callsign.to_string(),
            length,
        }
    }

    pub fn from_config(config: &StationConfig) -> Self {
        Self::new(&config.callsign, config.beacon.payload_length)
    }

    /// The payload for a given seed string.
    pub fn generate(&self, seed_string: &str) -> TxPayload {
        let body = draw_body(seed_string, self.length);
        let wire_string = format!("DE {} {MARKER}{body}{MARKER}", self.callsign);
        TxPayload::new(seed_string.to_string(), body, wire_string)
    }

    /// The payload for the transmission starting at `minute`.
    pub fn for_minute(&self, minute: DateTime<Utc>) -> TxPayload {
        self.generate(&seed_for_minute(minute))
    }

    /// The payload a minute-aligned run asked for at `now` would carry.
    pub fn for_aligned_start(&self, now: DateTime<Utc>) -> TxPayload {
        self.for_minute(aligned_start(now))
    }
}

/// The minute an aligned run asked for at `now` starts in: this one when
/// `now` is already at second zero, otherwise the next.
pub fn aligned_start(now: DateTime<Utc>) -> DateTime<Utc> {
    if now.second() == 0 {
        now
    } else {
        now + TimeDelta::minutes(1)
    }
}

/// Format the seed string for `minute`. Seconds are dropped.
pub fn seed_for_minute(minute: DateTime<Utc>) -> String {
    minute.format(SEED_FORMAT).to_string()
}

/// Parse a seed string back into the minute it names.
pub fn parse_seed(seed: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(seed.trim(), SEED_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|e| Error::Config(format!("invalid minute {seed:?} (want dd-mm-YYYY HH:MM): {e}")))
}

/// CRC-32 of the seed string.
pub fn seed_checksum(seed: &str) -> u32 {
    crc32fast::hash(seed.as_bytes())
}

fn draw_body(seed: &str, length: usize) -> String {
    let mut rng = ChaCha8Rng::seed_from_u64(u64::from(seed_checksum(seed)));
    let mut body = String::with_capacity(length);
    while body.len() < length {
        let index = (rng.next_u32() >> 26) as usize;
        if let Some(&symbol) = ALPHABET.get(index) {
            body.push(symbol as char);
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn generator() -> PayloadGenerator {
        PayloadGenerator::new("VK5QI", 64)
    }

    #[test]
    fn same_seed_same_payload() {
        let a = generator().generate("19-10-2026 12:01");
        let b = generator().generate("19-10-2026 12:01");
        assert_eq!(a, b);
    }

    #[test]
    fn different_minutes_differ() {
        let a = generator().generate("19-10-2026 12:01");
        let b = generator().generate("19-10-2026 12:02");
        assert_ne!(a.body(), b.body());
    }

    #[test]
    fn body_length_and_alphabet() {
        for length in [32, 64] {
            let p = PayloadGenerator::new("VK5QI", length).generate("01-01-2027 00:00");
            assert_eq!(p.body().len(), length);
            assert!(p.body().bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn wire_string_framing() {
        let p = generator().generate("19-10-2026 12:01");
        assert_eq!(p.wire_string(), format!("DE VK5QI $$$$${}$$$$$", p.body()));
        assert_eq!(p.seed_string(), "19-10-2026 12:01");
    }

    #[test]
    fn callsign_does_not_change_body() {
        let a = PayloadGenerator::new("VK5QI", 32).generate("19-10-2026 12:01");
        let b = PayloadGenerator::new("VK5ARG", 32).generate("19-10-2026 12:01");
        assert_eq!(a.body(), b.body());
        assert_ne!(a.wire_string(), b.wire_string());
    }

    #[test]
    fn seed_is_zero_padded() {
        let t = Utc.with_ymd_and_hms(2026, 3, 5, 7, 9, 42).unwrap();
        assert_eq!(seed_for_minute(t), "05-03-2026 07:09");
    }

    #[test]
    fn aligned_start_rolls_over_day() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 30).unwrap();
        let p = generator().for_aligned_start(now);
        assert_eq!(p.seed_string(), "01-01-2027 00:00");
    }

    #[test]
    fn aligned_start_at_second_zero_is_this_minute() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        assert_eq!(aligned_start(now), now);
        let p = generator().for_aligned_start(now);
        assert_eq!(p.seed_string(), "19-10-2026 12:00");
    }

    #[test]
    fn regenerating_from_the_minute_matches() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 45).unwrap();
        let sent = generator().for_aligned_start(now);
        let minute = parse_seed(sent.seed_string()).unwrap();
        assert_eq!(generator().for_minute(minute), sent);
    }

    #[test]
    fn parse_seed_rejects_other_formats() {
        assert!(parse_seed("2026-10-19 12:01").is_err());
        assert!(parse_seed("19-10-2026").is_err());
    }

    #[test]
    fn checksum_is_crc32() {
        assert_eq!(seed_checksum("123456789"), 0xCBF4_3926);
    }
}
