//! Transmit-inhibit guard with a bounded grace period.
//!
//! When the controller reports its inhibit as set, the run is skipped and
//! the persisted grace counter is bumped. Once the counter exceeds the
//! configured threshold the guard clears the inhibit itself and lets the
//! run proceed, so a stuck interlock silences the station for at most
//! `grace_threshold + 1` consecutive runs.

use tracing::{info, warn};

use beacon_core::error::Result;
use beacon_core::store::ConfigStore;
use beacon_core::types::{InhibitDecision, StationConfig};
use beacon_link::TransmitterLink;

/// The pure decision, given the device state and the persisted counter.
pub fn decide(
    inhibited: bool,
    inhibit_active: bool,
    grace_counter: u32,
    grace_threshold: u32,
) -> InhibitDecision {
    if !inhibited || !inhibit_active {
        return InhibitDecision {
            proceed: true,
            override_applied: false,
            new_grace_counter: grace_counter,
        };
    }
    let counter = grace_counter.saturating_add(1);
    if counter > grace_threshold {
        InhibitDecision {
            proceed: true,
            override_applied: true,
            new_grace_counter: 0,
        }
    } else {
        InhibitDecision {
            proceed: false,
            override_applied: false,
            new_grace_counter: counter,
        }
    }
}

/// Query the device and apply the grace policy.
///
/// `config.grace_counter` is updated in place and written through `store`
/// before this returns, at each of the two points where it changes. A
/// failed write is returned as an error.
pub async fn check(
    link: &mut TransmitterLink,
    config: &mut StationConfig,
    store: &mut dyn ConfigStore,
) -> Result<InhibitDecision> {
    let inhibited = link.tx_inhibited().await?;
    let decision = decide(
        inhibited,
        config.inhibit_active,
        config.grace_counter,
        config.grace_threshold,
    );

    if !inhibited {
        return Ok(decision);
    }
    if !config.inhibit_active {
        info!("transmitter inhibited, but inhibit handling is disabled");
        return Ok(decision);
    }

    if decision.override_applied {
        warn!(
            threshold = config.grace_threshold,
            "inhibit grace period exhausted, overriding"
        );
        if !link.clear_inhibit().await? {
            warn!("inhibit clear not confirmed");
        }
    } else {
        info!(
            grace_counter = decision.new_grace_counter,
            threshold = config.grace_threshold,
            "transmitter inhibited, skipping this run"
        );
    }

    config.grace_counter = decision.new_grace_counter;
    store.persist(config)?;
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::Error;
    use beacon_core::types::Timings;
    use beacon_test_harness::SimulatedQitx;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingStore {
        saved: Vec<u32>,
        fail: bool,
    }

    impl ConfigStore for RecordingStore {
        fn persist(&mut self, config: &StationConfig) -> Result<()> {
            if self.fail {
                return Err(Error::Persist("read-only".into()));
            }
            self.saved.push(config.grace_counter);
            Ok(())
        }
    }

    fn config(counter: u32, threshold: u32) -> StationConfig {
        StationConfig {
            serial_device: "/dev/null".into(),
            baud: 38_400,
            callsign: "VK5QI".into(),
            sitename: String::new(),
            freq: "7038000".into(),
            freq_offset: "1500".into(),
            freq_sideband: "USB".into(),
            power: "10".into(),
            inhibit_active: true,
            grace_threshold: threshold,
            grace_counter: counter,
            beacon: Default::default(),
            timings: Timings::default(),
        }
    }

    #[test]
    fn not_inhibited_proceeds() {
        let d = decide(false, true, 3, 5);
        assert!(d.proceed);
        assert!(!d.override_applied);
        assert_eq!(d.new_grace_counter, 3);
    }

    #[test]
    fn inactive_ignores_inhibit() {
        let d = decide(true, false, 3, 5);
        assert!(d.proceed);
        assert_eq!(d.new_grace_counter, 3);
    }

    #[test]
    fn within_grace_skips() {
        let d = decide(true, true, 3, 5);
        assert_eq!(
            d,
            InhibitDecision {
                proceed: false,
                override_applied: false,
                new_grace_counter: 4
            }
        );
    }

    #[test]
    fn exceeding_threshold_overrides() {
        let d = decide(true, true, 5, 5);
        assert_eq!(
            d,
            InhibitDecision {
                proceed: true,
                override_applied: true,
                new_grace_counter: 0
            }
        );
    }

    #[test]
    fn zero_threshold_overrides_immediately() {
        assert!(decide(true, true, 0, 0).override_applied);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_persists_incremented_counter() {
        let sim = SimulatedQitx::new().with_param("INHIBIT", "ON");
        let mut link = TransmitterLink::new(Box::new(sim.transport()), Timings::default());
        let mut cfg = config(3, 5);
        let mut store = RecordingStore::default();

        let d = check(&mut link, &mut cfg, &mut store).await.unwrap();
        assert!(!d.proceed);
        assert_eq!(cfg.grace_counter, 4);
        assert_eq!(store.saved, vec![4]);
        assert_eq!(sim.param("INHIBIT").as_deref(), Some("ON"));
    }

    #[tokio::test(start_paused = true)]
    async fn override_clears_device_and_resets() {
        let sim = SimulatedQitx::new().with_param("INHIBIT", "ON");
        let mut link = TransmitterLink::new(Box::new(sim.transport()), Timings::default());
        let mut cfg = config(5, 5);
        let mut store = RecordingStore::default();

        let d = check(&mut link, &mut cfg, &mut store).await.unwrap();
        assert!(d.proceed && d.override_applied);
        assert_eq!(cfg.grace_counter, 0);
        assert_eq!(store.saved, vec![0]);
        assert_eq!(sim.param("INHIBIT").as_deref(), Some("OFF"));
        assert_eq!(sim.commands(), vec!["INHIBIT", "INHIBIT,OFF"]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_device_does_not_persist() {
        let sim = SimulatedQitx::new();
        let mut link = TransmitterLink::new(Box::new(sim.transport()), Timings::default());
        let mut cfg = config(2, 5);
        let mut store = RecordingStore::default();

        let d = check(&mut link, &mut cfg, &mut store).await.unwrap();
        assert!(d.proceed);
        assert_eq!(cfg.grace_counter, 2);
        assert!(store.saved.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn persist_failure_is_returned() {
        let sim = SimulatedQitx::new().with_param("INHIBIT", "ON");
        let mut link = TransmitterLink::new(Box::new(sim.transport()), Timings::default());
        let mut cfg = config(0, 5);
        let mut store = RecordingStore {
            fail: true,
            ..Default::default()
        };

        let err = check(&mut link, &mut cfg, &mut store).await.unwrap_err();
        assert!(matches!(err, Error::Persist(_)));
    }
}
