//! The schedule engine.
//!
//! A run configures the transmitter, optionally waits for the top of the
//! minute, derives the payload from the minute it actually started in, then
//! walks the schedule in list order. Each entry's offset is a
//! lower bound: the engine waits until at least that many seconds have
//! passed since the run started, and an entry whose time has already come
//! is dispatched immediately rather than skipped.
//!
//! The transmitter is powered off and the link released when the run ends,
//! whether it completed, hit a link failure, or was dropped mid-way by the
//! caller (see [`TransmitterLink::shutdown`]).

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use beacon_core::clock::Clock;
use beacon_core::error::Result;
use beacon_core::types::{
    Mode, ScheduleEntry, ScheduledMode, SegmentResult, StationConfig, Timings, TxPayload,
};
use beacon_link::TransmitterLink;

use crate::modes::{self, SegmentContext};
use crate::payload::PayloadGenerator;

/// Knobs that change how a run waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Wait for second zero of the minute before starting.
    pub align_to_minute: bool,
    /// Granularity of the alignment and offset waits.
    pub poll_interval: Duration,
}

impl EngineOptions {
    pub fn from_timings(timings: &Timings) -> Self {
        EngineOptions {
            align_to_minute: true,
            poll_interval: timings.schedule_poll(),
        }
    }

    pub fn without_alignment(mut self) -> Self {
        self.align_to_minute = false;
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_timings(&Timings::default())
    }
}

/// One dispatched (or skipped) schedule entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    pub index: usize,
    pub mode: ScheduledMode,
    pub offset_seconds: u64,
    pub dispatched_at: DateTime<Utc>,
    pub result: SegmentResult,
}

/// What happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Wall-clock time the schedule offsets are measured from.
    pub start_time: DateTime<Utc>,
    /// Seeded from the minute of `start_time`.
    pub payload: TxPayload,
    pub segments: Vec<SegmentRecord>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.result.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| !s.result.is_success() && s.result != SegmentResult::Skipped)
            .count()
    }
}

/// Drives one beacon run over an open [`TransmitterLink`].
pub struct ScheduleEngine<'a> {
    schedule: &'a [ScheduleEntry],
    config: &'a StationConfig,
    clock: &'a dyn Clock,
    options: EngineOptions,
}

impl<'a> ScheduleEngine<'a> {
    pub fn new(
        schedule: &'a [ScheduleEntry],
        config: &'a StationConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        ScheduleEngine {
            schedule,
            config,
            clock,
            options: EngineOptions::from_timings(&config.timings),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the whole schedule, then power off and release the link.
    ///
    /// Failed or timed-out segments are recorded and the run continues. A
    /// link failure ends the run early and is returned after the release.
    pub async fn run(&self, link: &mut TransmitterLink) -> Result<RunReport> {
        let outcome = self.drive(link).await;
        let released = link.shutdown().await;
        match outcome {
            Ok(report) => {
                released?;
                info!(
                    segments = report.segments.len(),
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    "run complete"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(close_err) = released {
                    warn!(error = %close_err, "release after failed run also failed");
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, link: &mut TransmitterLink) -> Result<RunReport> {
        configure(link, self.config).await?;
        if !link.power_on(true).await? {
            warn!("power amplifier on not confirmed");
        }

        if self.options.align_to_minute {
            self.align().await;
        }
        let start_time = self.clock.now();
        let start = start_time.timestamp();
        info!(start = %start_time.format("%H:%M:%S"), "schedule started");

        let payload = PayloadGenerator::from_config(self.config).for_minute(start_time);
        info!(seed = %payload.seed_string(), body = %payload.body(), "payload");

        let ctx = SegmentContext {
            payload: &payload,
            settings: &self.config.beacon,
        };
        let mut segments = Vec::with_capacity(self.schedule.len());

        for (index, entry) in self.schedule.iter().enumerate() {
            if let Some(freq) = &entry.frequency_override {
                if !link.set_parameter("FREQ", freq).await? {
                    warn!(index, freq = %freq, "frequency override not confirmed");
                }
            }

            self.wait_for_offset(start, entry.start_offset_seconds).await;
            let dispatched_at = self.clock.now();
            info!(
                index,
                mode = %entry.mode,
                offset = entry.start_offset_seconds,
                late_s = (dispatched_at.timestamp() - start)
                    .saturating_sub(entry.start_offset_seconds as i64),
                "dispatching segment"
            );

            let result = match &entry.mode {
                ScheduledMode::Known(mode) => self.dispatch(*mode, link, &ctx).await?,
                ScheduledMode::Unrecognized(name) => {
                    warn!(index, mode = %name, "unrecognized mode, skipping");
                    SegmentResult::Skipped
                }
            };

            if result.is_success() || result == SegmentResult::Skipped {
                info!(index, %result, "segment finished");
            } else {
                warn!(index, mode = %entry.mode, %result, "segment failed");
            }

            segments.push(SegmentRecord {
                index,
                mode: entry.mode.clone(),
                offset_seconds: entry.start_offset_seconds,
                dispatched_at,
                result,
            });
        }

        Ok(RunReport {
            start_time,
            payload,
            segments,
        })
    }

    async fn dispatch(
        &self,
        mode: Mode,
        link: &mut TransmitterLink,
        ctx: &SegmentContext<'_>,
    ) -> Result<SegmentResult> {
        match modes::execute(mode, link, ctx).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_link_fatal() => {
                error!(%mode, error = %e, "link failed, abandoning schedule");
                Err(e)
            }
            Err(e) => Ok(SegmentResult::Rejected(e.to_string())),
        }
    }

    /// Wait for second zero of the minute.
    async fn align(&self) {
        let now = self.clock.now();
        if now.second() != 0 {
            debug!(second = now.second(), "waiting for top of minute");
        }
        while self.clock.now().second() != 0 {
            sleep(self.options.poll_interval).await;
        }
    }

    async fn wait_for_offset(&self, start: i64, offset: u64) {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        while self.clock.epoch_seconds() - start < offset {
            sleep(self.options.poll_interval).await;
        }
    }
}

/// Load the station parameters into the transmitter.
///
/// Mismatched echoes are logged and otherwise ignored.
pub async fn configure(link: &mut TransmitterLink, config: &StationConfig) -> Result<()> {
    let params = [
        ("FREQ", config.freq.as_str()),
        ("FREQOFF", config.freq_offset.as_str()),
        ("FREQSSB", config.freq_sideband.as_str()),
        ("POWER", config.power.as_str()),
        ("CALL", config.callsign.as_str()),
    ];
    for (name, value) in params {
        if !link.set_parameter(name, value).await? {
            warn!(parameter = name, value, "transmitter setup not confirmed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::Error;
    use beacon_core::types::BeaconSettings;
    use beacon_test_harness::{MockTransport, PausedClock, Reply, SimulatedQitx};
    use pretty_assertions::assert_eq;

    fn config() -> StationConfig {
        StationConfig {
            serial_device: "/dev/null".into(),
            baud: 38_400,
            callsign: "VK5QI".into(),
            sitename: "Adelaide".into(),
            freq: "7038000".into(),
            freq_offset: "1500".into(),
            freq_sideband: "USB".into(),
            power: "10".into(),
            inhibit_active: true,
            grace_threshold: 5,
            grace_counter: 0,
            beacon: BeaconSettings {
                payload_length: 32,
                carrier_seconds: 10,
                ..BeaconSettings::default()
            },
            timings: Timings::default(),
        }
    }

    fn payload(config: &StationConfig, minute: &str) -> TxPayload {
        PayloadGenerator::from_config(config).generate(minute)
    }

    fn link(transport: MockTransport) -> TransmitterLink {
        TransmitterLink::new(Box::new(transport), Timings::default())
    }

    const SETUP: [&str; 6] = [
        "FREQ,7038000",
        "FREQOFF,1500",
        "FREQSSB,USB",
        "POWER,10",
        "CALL,VK5QI",
        "PA,ON",
    ];

    #[tokio::test(start_paused = true)]
    async fn entries_run_in_order_after_their_offsets() {
        let sim = SimulatedQitx::new();
        let mock = sim.transport();
        let handle = mock.handle();
        let mut link = link(mock);
        let config = config();
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 57);
        let schedule = vec![
            ScheduleEntry::new(0, Mode::Ident),
            ScheduleEntry::new(15, Mode::Carrier),
            ScheduleEntry::new(30, Mode::Bpsk31),
        ];

        let report = ScheduleEngine::new(&schedule, &config, &clock)
            .run(&mut link)
            .await
            .unwrap();

        assert_eq!(report.start_time.second(), 0);
        assert_eq!(report.start_time.minute(), 1);

        let modes: Vec<_> = report.segments.iter().map(|s| s.mode.clone()).collect();
        assert_eq!(
            modes,
            vec![
                ScheduledMode::from(Mode::Ident),
                ScheduledMode::from(Mode::Carrier),
                ScheduledMode::from(Mode::Bpsk31),
            ]
        );
        let start = report.start_time.timestamp();
        let mut previous = start;
        for seg in &report.segments {
            let t = seg.dispatched_at.timestamp();
            assert!(t >= start + seg.offset_seconds as i64, "{seg:?}");
            assert!(t >= previous);
            previous = t;
            assert_eq!(seg.result, SegmentResult::Confirmed);
        }

        let mut expected: Vec<String> = SETUP.iter().map(|s| s.to_string()).collect();
        expected.extend(
            ["IDENT", "CARRIER,ON", "CARRIER,OFF", "PSKTERM,31", "PA,OFF"]
                .iter()
                .map(|s| s.to_string()),
        );
        assert_eq!(sim.commands(), expected);
        let sent = payload(&config, "19-10-2026 12:01");
        assert_eq!(report.payload, sent);
        assert_eq!(sim.terminal_text(), sent.wire_string());
        assert_eq!(handle.close_count(), 1);
    }

    async fn aligned_psk_run(clock: &PausedClock) -> (SimulatedQitx, RunReport) {
        let sim = SimulatedQitx::new();
        let mut link = link(sim.transport());
        let config = config();
        let schedule = vec![ScheduleEntry::new(0, Mode::Bpsk250)];

        let report = ScheduleEngine::new(&schedule, &config, clock)
            .run(&mut link)
            .await
            .unwrap();
        (sim, report)
    }

    #[tokio::test(start_paused = true)]
    async fn run_starting_on_the_minute_uses_that_minute() {
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 0);
        let (sim, report) = aligned_psk_run(&clock).await;

        assert_eq!(report.start_time.minute(), 0);
        let sent = payload(&config(), "19-10-2026 12:00");
        assert_eq!(report.payload, sent);
        assert_eq!(sim.terminal_text(), sent.wire_string());
    }

    #[tokio::test(start_paused = true)]
    async fn run_asked_for_late_in_a_minute_uses_the_next() {
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 59);
        let (sim, report) = aligned_psk_run(&clock).await;

        assert_eq!(report.start_time.minute(), 1);
        let sent = payload(&config(), "19-10-2026 12:01");
        assert_eq!(report.payload, sent);
        assert_eq!(sim.terminal_text(), sent.wire_string());
    }

    #[tokio::test(start_paused = true)]
    async fn unaligned_run_uses_the_current_minute() {
        let sim = SimulatedQitx::new();
        let mut link = link(sim.transport());
        let config = config();
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 30);
        let schedule = vec![ScheduleEntry::new(0, Mode::Bpsk250)];

        let report = ScheduleEngine::new(&schedule, &config, &clock)
            .with_options(EngineOptions::default().without_alignment())
            .run(&mut link)
            .await
            .unwrap();

        assert_eq!(report.payload.seed_string(), "19-10-2026 12:00");
        assert_eq!(sim.terminal_text(), report.payload.wire_string());
    }

    #[tokio::test(start_paused = true)]
    async fn late_entry_runs_late_instead_of_skipping() {
        let sim = SimulatedQitx::new().with_duration("IDENT", Duration::from_secs(20));
        let mut link = link(sim.transport());
        let config = config();
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 0);
        let schedule = vec![
            ScheduleEntry::new(0, Mode::Ident),
            ScheduleEntry::new(5, Mode::DominoEx8),
            ScheduleEntry::new(2, Mode::Ident),
        ];

        let report = ScheduleEngine::new(&schedule, &config, &clock)
            .with_options(EngineOptions::default().without_alignment())
            .run(&mut link)
            .await
            .unwrap();

        let start = report.start_time.timestamp();
        let at: Vec<i64> = report
            .segments
            .iter()
            .map(|s| s.dispatched_at.timestamp() - start)
            .collect();
        assert_eq!(at, vec![0, 20, 21]);
        assert_eq!(report.succeeded(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_mode_is_skipped() {
        let sim = SimulatedQitx::new();
        let mut link = link(sim.transport());
        let config = config();
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 0);
        let schedule = vec![
            ScheduleEntry::new(0, ScheduledMode::from("HELL".to_string())),
            ScheduleEntry::new(0, Mode::Ident),
        ];

        let report = ScheduleEngine::new(&schedule, &config, &clock)
            .with_options(EngineOptions::default().without_alignment())
            .run(&mut link)
            .await
            .unwrap();

        assert_eq!(report.segments[0].result, SegmentResult::Skipped);
        assert_eq!(report.segments[1].result, SegmentResult::Confirmed);
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_segment_does_not_stop_the_run() {
        let sim = SimulatedQitx::new().rejecting("DOMINO");
        let mut link = link(sim.transport());
        let config = config();
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 0);
        let schedule = vec![
            ScheduleEntry::new(0, Mode::DominoEx8),
            ScheduleEntry::new(10, Mode::Ident),
        ];

        let report = ScheduleEngine::new(&schedule, &config, &clock)
            .with_options(EngineOptions::default().without_alignment())
            .run(&mut link)
            .await
            .unwrap();

        assert_eq!(
            report.segments[0].result,
            SegmentResult::Rejected("ERROR".into())
        );
        assert_eq!(report.segments[1].result, SegmentResult::Confirmed);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frequency_override_is_set_before_the_segment() {
        let sim = SimulatedQitx::new();
        let mut link = link(sim.transport());
        let config = config();
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 0);
        let schedule = vec![ScheduleEntry::new(0, Mode::Ident).with_frequency("14100000")];

        ScheduleEngine::new(&schedule, &config, &clock)
            .with_options(EngineOptions::default().without_alignment())
            .run(&mut link)
            .await
            .unwrap();

        let commands = sim.commands();
        assert_eq!(&commands[SETUP.len()..], ["FREQ,14100000", "IDENT", "PA,OFF"]);
        assert_eq!(sim.param("FREQ").as_deref(), Some("14100000"));
    }

    #[tokio::test(start_paused = true)]
    async fn severed_link_still_releases() {
        let mock = MockTransport::with_responder(|data| {
            if data.starts_with(b"IDENT") {
                Reply::Disconnect
            } else {
                let line = String::from_utf8_lossy(data).trim_end().to_string();
                Reply::now(format!("{line}\nOK\n").as_bytes())
            }
        });
        let handle = mock.handle();
        let mut link = link(mock);
        let config = config();
        let clock = PausedClock::at(2026, 10, 19, 12, 0, 0);
        let schedule = vec![
            ScheduleEntry::new(0, Mode::Ident),
            ScheduleEntry::new(10, Mode::Carrier),
        ];

        let err = ScheduleEngine::new(&schedule, &config, &clock)
            .with_options(EngineOptions::default().without_alignment())
            .run(&mut link)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionLost));
        assert_eq!(handle.close_count(), 1);
        assert!(!handle.sent_lines().iter().any(|l| l.starts_with("CARRIER")));
    }
}
