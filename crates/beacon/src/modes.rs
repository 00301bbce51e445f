//! Per-mode transmission routines.
//!
//! Each [`Mode`] maps through [`MODE_TABLE`] to a [`ModeProfile`] carrying
//! the numeric parameters the mode needs, and [`execute`] runs the profile
//! against a [`TransmitterLink`]. Routines report the device's verdict as a
//! [`SegmentResult`]; only a failure of the link itself is an error.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use beacon_core::error::Result;
use beacon_core::types::{BeaconSettings, Mode, SegmentResult, TxPayload};
use beacon_link::TransmitterLink;

/// Idle (phase reference) sent before the first PSK character.
pub const PSK_PREAMBLE: Duration = Duration::from_secs(3);

/// Idle sent after the last PSK character.
pub const PSK_POSTAMBLE: Duration = Duration::from_secs(1);

/// How a mode is transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeProfile {
    Ident,
    Carrier,
    /// Character pass-through at `baud`, one character every `char_delay`.
    Psk { baud: u32, char_delay: Duration },
    DominoEx8,
    Rtty,
    Selcall { test: bool },
}

/// Every mode and how to send it.
pub const MODE_TABLE: &[(Mode, ModeProfile)] = &[
    (Mode::Ident, ModeProfile::Ident),
    (Mode::Carrier, ModeProfile::Carrier),
    (
        Mode::Bpsk31,
        ModeProfile::Psk {
            baud: 31,
            char_delay: Duration::from_millis(400),
        },
    ),
    (
        Mode::Bpsk63,
        ModeProfile::Psk {
            baud: 63,
            char_delay: Duration::from_millis(250),
        },
    ),
    (
        Mode::Bpsk125,
        ModeProfile::Psk {
            baud: 125,
            char_delay: Duration::from_millis(100),
        },
    ),
    (
        Mode::Bpsk250,
        ModeProfile::Psk {
            baud: 250,
            char_delay: Duration::from_millis(100),
        },
    ),
    (Mode::DominoEx8, ModeProfile::DominoEx8),
    (Mode::Rtty, ModeProfile::Rtty),
    (Mode::Selcall, ModeProfile::Selcall { test: false }),
    (Mode::SelcallTest, ModeProfile::Selcall { test: true }),
];

/// Look up the profile for `mode`.
pub fn profile(mode: Mode) -> Option<ModeProfile> {
    MODE_TABLE
        .iter()
        .find(|(m, _)| *m == mode)
        .map(|(_, p)| *p)
}

/// What a segment needs besides the link.
#[derive(Debug, Clone, Copy)]
pub struct SegmentContext<'a> {
    pub payload: &'a TxPayload,
    pub settings: &'a BeaconSettings,
}

/// Expected on-air time of a PSK segment carrying `chars` characters.
///
/// Saturates at [`Duration::MAX`] rather than overflowing.
pub fn psk_duration(chars: usize, char_delay: Duration) -> Duration {
    let chars = u32::try_from(chars).unwrap_or(u32::MAX);
    PSK_PREAMBLE
        .saturating_add(char_delay.saturating_mul(chars))
        .saturating_add(PSK_POSTAMBLE)
}

/// Transmit one segment in `mode`.
pub async fn execute(
    mode: Mode,
    link: &mut TransmitterLink,
    ctx: &SegmentContext<'_>,
) -> Result<SegmentResult> {
    let Some(profile) = profile(mode) else {
        warn!(%mode, "no transmission profile");
        return Ok(SegmentResult::Skipped);
    };
    let settings = ctx.settings;

    match profile {
        ModeProfile::Ident => link.transmit_ident().await,
        ModeProfile::Carrier => {
            send_carrier(link, Duration::from_secs(settings.carrier_seconds)).await
        }
        ModeProfile::Psk { baud, char_delay } => {
            send_psk(link, baud, char_delay, ctx.payload.wire_string()).await
        }
        ModeProfile::DominoEx8 => link.transmit_domino().await,
        ModeProfile::Rtty => {
            link.transmit_rtty(settings.rtty_baud, settings.rtty_shift)
                .await
        }
        ModeProfile::Selcall { test } => {
            link.transmit_selcall(settings.selcall_source, settings.selcall_dest, test)
                .await
        }
    }
}

/// Key an unmodulated carrier for `hold`.
pub async fn send_carrier(link: &mut TransmitterLink, hold: Duration) -> Result<SegmentResult> {
    let on = link.set_parameter("CARRIER", "ON").await?;
    if !on {
        warn!("carrier on not confirmed");
    }
    info!(seconds = hold.as_secs(), "carrier keyed");
    sleep(hold).await;
    let off = link.set_parameter("CARRIER", "OFF").await?;
    if !off {
        warn!("carrier off not confirmed");
    }

    Ok(if on && off {
        SegmentResult::Confirmed
    } else {
        SegmentResult::Rejected("carrier not confirmed".to_string())
    })
}

/// Send `text` through PSK pass-through at `baud`.
pub async fn send_psk(
    link: &mut TransmitterLink,
    baud: u32,
    char_delay: Duration,
    text: &str,
) -> Result<SegmentResult> {
    let expected = psk_duration(text.len(), char_delay);
    info!(baud, chars = text.len(), expected_s = expected.as_secs_f64(), "PSK segment");

    link.start_psk_terminal(baud).await?;
    sleep(PSK_PREAMBLE).await;
    for byte in text.bytes() {
        link.send_raw(&[byte]).await?;
        sleep(char_delay).await;
    }
    sleep(PSK_POSTAMBLE).await;

    let result = link.finish_psk_terminal().await?;
    debug!(baud, %result, "PSK segment finished");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::types::Timings;
    use beacon_test_harness::SimulatedQitx;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    fn payload() -> TxPayload {
        crate::payload::PayloadGenerator::new("VK5QI", 32).generate("19-10-2026 12:01")
    }

    fn link(sim: &SimulatedQitx) -> TransmitterLink {
        TransmitterLink::new(Box::new(sim.transport()), Timings::default())
    }

    #[test]
    fn every_mode_has_a_profile() {
        for mode in Mode::ALL {
            assert!(profile(mode).is_some(), "{mode}");
        }
    }

    #[test]
    fn psk_delays() {
        let delay = |m| match profile(m) {
            Some(ModeProfile::Psk { char_delay, .. }) => char_delay.as_millis(),
            _ => 0,
        };
        assert_eq!(delay(Mode::Bpsk31), 400);
        assert_eq!(delay(Mode::Bpsk63), 250);
        assert_eq!(delay(Mode::Bpsk125), 100);
        assert_eq!(delay(Mode::Bpsk250), 100);
    }

    #[test]
    fn expected_psk_time() {
        assert_eq!(
            psk_duration(64, Duration::from_millis(400)),
            Duration::from_millis(3_000 + 25_600 + 1_000)
        );
    }

    #[test]
    fn huge_psk_text_saturates_instead_of_wrapping() {
        let delay = Duration::from_millis(400);
        let wrapped = (u32::MAX as usize) + 2;
        assert!(psk_duration(wrapped, delay) > psk_duration(u32::MAX as usize - 1, delay));
        assert_eq!(psk_duration(usize::MAX, Duration::MAX), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn bpsk31_pacing() {
        let sim = SimulatedQitx::new();
        let mut link = link(&sim);
        let payload = payload();
        let settings = BeaconSettings::default();
        let ctx = SegmentContext {
            payload: &payload,
            settings: &settings,
        };

        let start = Instant::now();
        let result = execute(Mode::Bpsk31, &mut link, &ctx).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(result, SegmentResult::Confirmed);
        assert_eq!(sim.terminal_text(), payload.wire_string());
        assert_eq!(sim.commands(), vec!["PSKTERM,31"]);

        let expected = psk_duration(payload.wire_string().len(), Duration::from_millis(400));
        assert!(elapsed >= expected, "{elapsed:?} < {expected:?}");
        assert!(elapsed <= expected + Duration::from_millis(500), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn carrier_holds_then_releases() {
        let sim = SimulatedQitx::new();
        let mut link = link(&sim);
        let payload = payload();
        let settings = BeaconSettings {
            carrier_seconds: 7,
            ..BeaconSettings::default()
        };
        let ctx = SegmentContext {
            payload: &payload,
            settings: &settings,
        };

        let start = Instant::now();
        let result = execute(Mode::Carrier, &mut link, &ctx).await.unwrap();
        assert_eq!(result, SegmentResult::Confirmed);
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert_eq!(sim.commands(), vec!["CARRIER,ON", "CARRIER,OFF"]);
    }

    #[tokio::test(start_paused = true)]
    async fn native_modes_use_device_commands() {
        let sim = SimulatedQitx::new();
        let mut link = link(&sim);
        let payload = payload();
        let settings = BeaconSettings::default();
        let ctx = SegmentContext {
            payload: &payload,
            settings: &settings,
        };

        for mode in [Mode::Ident, Mode::DominoEx8, Mode::Rtty, Mode::SelcallTest] {
            assert!(execute(mode, &mut link, &ctx).await.unwrap().is_success());
        }
        assert_eq!(
            sim.commands(),
            vec!["IDENT", "DOMINO,8", "RTTY,50,170", "SELTEST,1881,1882"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_ident_is_a_result_not_an_error() {
        let sim = SimulatedQitx::new().rejecting("IDENT");
        let mut link = link(&sim);
        let payload = payload();
        let settings = BeaconSettings::default();
        let ctx = SegmentContext {
            payload: &payload,
            settings: &settings,
        };

        assert_eq!(
            execute(Mode::Ident, &mut link, &ctx).await.unwrap(),
            SegmentResult::Rejected("ERROR".into())
        );
    }
}
