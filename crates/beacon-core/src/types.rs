//! Core types shared by the link, the payload generator and the schedule engine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Default serial device of the QITX controller board.
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/arduino";

/// Default serial baud rate of the QITX controller board.
pub const DEFAULT_BAUD: u32 = 38_400;

// ---------------------------------------------------------------
// Modes
// ---------------------------------------------------------------

/// A transmission mode the beacon knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Morse identification, timed by the device.
    Ident,
    /// Unmodulated carrier held for the configured duration.
    Carrier,
    /// BPSK at 31.25 baud.
    Bpsk31,
    /// BPSK at 62.5 baud.
    Bpsk63,
    /// BPSK at 125 baud.
    Bpsk125,
    /// BPSK at 250 baud.
    Bpsk250,
    /// DominoEX 8, run natively by the device.
    DominoEx8,
    /// RTTY with the configured baud rate and shift.
    Rtty,
    /// Selective call to the configured destination.
    Selcall,
    /// Selective call channel test.
    SelcallTest,
}

impl Mode {
    /// Every mode, in declaration order.
    pub const ALL: [Mode; 10] = [
        Mode::Ident,
        Mode::Carrier,
        Mode::Bpsk31,
        Mode::Bpsk63,
        Mode::Bpsk125,
        Mode::Bpsk250,
        Mode::DominoEx8,
        Mode::Rtty,
        Mode::Selcall,
        Mode::SelcallTest,
    ];

    /// The schedule-file name of this mode.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Ident => "IDENT",
            Mode::Carrier => "CARRIER",
            Mode::Bpsk31 => "BPSK31",
            Mode::Bpsk63 => "BPSK63",
            Mode::Bpsk125 => "BPSK125",
            Mode::Bpsk250 => "BPSK250",
            Mode::DominoEx8 => "DOMINOEX8",
            Mode::Rtty => "RTTY",
            Mode::Selcall => "SELCALL",
            Mode::SelcallTest => "SELTEST",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a string does not name a known [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(pub String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode: {}", self.0)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Mode::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

/// The mode named by a schedule entry.
///
/// Unknown names are kept rather than rejected at load time: the engine
/// logs and skips them without aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScheduledMode {
    Known(Mode),
    Unrecognized(String),
}

impl ScheduledMode {
    /// The mode name as written in the schedule.
    pub fn name(&self) -> &str {
        match self {
            ScheduledMode::Known(mode) => mode.name(),
            ScheduledMode::Unrecognized(name) => name,
        }
    }
}

impl From<String> for ScheduledMode {
    fn from(s: String) -> Self {
        match s.parse::<Mode>() {
            Ok(mode) => ScheduledMode::Known(mode),
            Err(_) => ScheduledMode::Unrecognized(s),
        }
    }
}

impl From<ScheduledMode> for String {
    fn from(m: ScheduledMode) -> Self {
        m.name().to_string()
    }
}

impl From<Mode> for ScheduledMode {
    fn from(mode: Mode) -> Self {
        ScheduledMode::Known(mode)
    }
}

impl fmt::Display for ScheduledMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------

/// One segment of a beacon run.
///
/// A schedule is an ordered `Vec<ScheduleEntry>`; the order is
/// authoritative and never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Lower bound, in seconds after the run start, for dispatching this entry.
    #[serde(rename = "starttime")]
    pub start_offset_seconds: u64,
    pub mode: ScheduledMode,
    /// Frequency to set before waiting for this entry.
    #[serde(
        rename = "freq",
        default,
        deserialize_with = "deserialize_freq",
        skip_serializing_if = "Option::is_none"
    )]
    pub frequency_override: Option<String>,
}

impl ScheduleEntry {
    pub fn new(start_offset_seconds: u64, mode: impl Into<ScheduledMode>) -> Self {
        ScheduleEntry {
            start_offset_seconds,
            mode: mode.into(),
            frequency_override: None,
        }
    }

    pub fn with_frequency(mut self, freq: &str) -> Self {
        self.frequency_override = Some(freq.to_string());
        self
    }
}

/// Schedule files carry `freq` as either a string or a bare integer.
fn deserialize_freq<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FreqValue {
        Text(String),
        Number(u64),
    }

    Ok(
        Option::<FreqValue>::deserialize(deserializer)?.map(|v| match v {
            FreqValue::Text(s) => s,
            FreqValue::Number(n) => n.to_string(),
        }),
    )
}

// ---------------------------------------------------------------
// Station configuration
// ---------------------------------------------------------------

/// Station configuration.
///
/// Read-only for the whole run except `grace_counter`, which the inhibit
/// guard mutates and persists through a [`ConfigStore`](crate::store::ConfigStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_serial_device")]
    pub serial_device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    pub callsign: String,
    #[serde(default)]
    pub sitename: String,
    /// Carrier frequency, passed verbatim to the `FREQ` command.
    pub freq: String,
    /// BFO offset, passed verbatim to the `FREQOFF` command.
    pub freq_offset: String,
    /// Sideband, passed verbatim to the `FREQSSB` command.
    pub freq_sideband: String,
    pub power: String,
    #[serde(default)]
    pub inhibit_active: bool,
    #[serde(default)]
    pub grace_threshold: u32,
    #[serde(default)]
    pub grace_counter: u32,
    #[serde(default)]
    pub beacon: BeaconSettings,
    #[serde(default)]
    pub timings: Timings,
}

fn default_serial_device() -> String {
    DEFAULT_SERIAL_DEVICE.to_string()
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

/// Per-mode parameters that are not part of the schedule itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconSettings {
    /// Number of pseudorandom symbols in the payload body.
    pub payload_length: usize,
    /// How long a `CARRIER` segment holds the carrier.
    pub carrier_seconds: u64,
    pub rtty_baud: u32,
    pub rtty_shift: u32,
    pub selcall_source: u32,
    pub selcall_dest: u32,
}

impl Default for BeaconSettings {
    fn default() -> Self {
        BeaconSettings {
            payload_length: 64,
            carrier_seconds: 10,
            rtty_baud: 50,
            rtty_shift: 170,
            selcall_source: 1881,
            selcall_dest: 1882,
        }
    }
}

/// Timeouts and polling granularities, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Bound on each line read during a parameter exchange.
    pub command_timeout_ms: u64,
    /// Bound on waiting for a blocking transmission to be confirmed.
    pub transmit_timeout_ms: u64,
    /// Sleep between checks for buffered device bytes.
    pub byte_poll_ms: u64,
    /// Sleep between checks of the wall clock while waiting for an entry.
    pub schedule_poll_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            command_timeout_ms: 1_000,
            transmit_timeout_ms: 180_000,
            byte_poll_ms: 500,
            schedule_poll_ms: 100,
        }
    }
}

impl Timings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_millis(self.transmit_timeout_ms)
    }

    pub fn byte_poll(&self) -> Duration {
        Duration::from_millis(self.byte_poll_ms.max(1))
    }

    pub fn schedule_poll(&self) -> Duration {
        Duration::from_millis(self.schedule_poll_ms.max(1))
    }
}

// ---------------------------------------------------------------
// Payload
// ---------------------------------------------------------------

/// The pseudorandom payload of one run.
///
/// Created once before transmission starts and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPayload {
    seed_string: String,
    body: String,
    wire_string: String,
}

impl TxPayload {
    pub fn new(seed_string: String, body: String, wire_string: String) -> Self {
        TxPayload {
            seed_string,
            body,
            wire_string,
        }
    }

    /// The quantized timestamp the payload was derived from.
    pub fn seed_string(&self) -> &str {
        &self.seed_string
    }

    /// The pseudorandom symbols alone.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The exact character sequence sent over the air.
    pub fn wire_string(&self) -> &str {
        &self.wire_string
    }
}

// ---------------------------------------------------------------
// Protocol outcomes
// ---------------------------------------------------------------

/// A classified reply to a value exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResponse {
    /// A success-marker line, with the value after its comma if any.
    Ok(Option<String>),
    /// A value line confirmed by a trailing success-marker line.
    Data(String),
    /// A reply that could not be parsed into a value.
    Malformed,
    /// No complete reply before the deadline.
    Timeout,
}

impl ProtocolResponse {
    /// The carried value, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            ProtocolResponse::Ok(v) => v.as_deref(),
            ProtocolResponse::Data(v) => Some(v),
            ProtocolResponse::Malformed | ProtocolResponse::Timeout => None,
        }
    }
}

/// Result of one transmission segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentResult {
    /// The device reported success.
    Confirmed,
    /// The device answered with something other than the success marker.
    Rejected(String),
    /// The device did not answer before the transmit timeout.
    TimedOut,
    /// Nothing was sent: the mode is not recognized.
    Skipped,
}

impl SegmentResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SegmentResult::Confirmed)
    }
}

impl fmt::Display for SegmentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentResult::Confirmed => write!(f, "OK"),
            SegmentResult::Rejected(line) => write!(f, "rejected ({line})"),
            SegmentResult::TimedOut => write!(f, "timed out"),
            SegmentResult::Skipped => write!(f, "skipped"),
        }
    }
}

/// What the inhibit guard decided for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InhibitDecision {
    /// Whether transmission goes ahead.
    pub proceed: bool,
    /// Whether the device inhibit was cleared to force transmission.
    pub override_applied: bool,
    /// The grace counter after this decision.
    pub new_grace_counter: u32,
}
