//! Schedule file (JSON).
//!
//! A schedule is a JSON array of `{"starttime": <seconds>, "mode": <name>}`
//! records with an optional `"freq"`, string or integer. Order in the file
//! is the order of transmission.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use beacon_core::error::{Error, Result};
use beacon_core::types::{Mode, ScheduleEntry, ScheduledMode};

pub fn parse_schedule(text: &str) -> Result<Vec<ScheduleEntry>> {
    serde_json::from_str(text).map_err(|e| Error::Schedule(e.to_string()))
}

pub fn load_schedule(path: &Path) -> Result<Vec<ScheduleEntry>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Schedule(format!("cannot read {}: {e}", path.display())))?;
    parse_schedule(&text).map_err(|e| Error::Schedule(format!("{}: {e}", path.display())))
}

/// The standard one-minute beacon cycle.
pub fn default_schedule() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry::new(0, Mode::Ident),
        ScheduleEntry::new(15, Mode::Carrier),
        ScheduleEntry::new(30, Mode::Bpsk31),
        ScheduleEntry::new(90, Mode::DominoEx8),
    ]
}

pub fn log_schedule(schedule: &[ScheduleEntry]) {
    info!(entries = schedule.len(), "schedule");
    for entry in schedule {
        let freq = entry.frequency_override.as_deref().unwrap_or("-");
        match &entry.mode {
            ScheduledMode::Known(_) => {
                info!(offset = entry.start_offset_seconds, mode = %entry.mode, freq, "  entry")
            }
            ScheduledMode::Unrecognized(name) => warn!(
                offset = entry.start_offset_seconds,
                mode = %name,
                "  entry has unrecognized mode and will be skipped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_entries_in_file_order() {
        let text = r#"[
            {"starttime": 30, "mode": "BPSK31"},
            {"starttime": 0, "mode": "IDENT", "freq": "7038000"},
            {"starttime": 45, "mode": "dominoex8", "freq": 14100000}
        ]"#;
        let schedule = parse_schedule(text).unwrap();
        assert_eq!(
            schedule,
            vec![
                ScheduleEntry::new(30, Mode::Bpsk31),
                ScheduleEntry::new(0, Mode::Ident).with_frequency("7038000"),
                ScheduleEntry::new(45, Mode::DominoEx8).with_frequency("14100000"),
            ]
        );
    }

    #[test]
    fn unknown_mode_is_kept() {
        let schedule = parse_schedule(r#"[{"starttime": 0, "mode": "OLIVIA"}]"#).unwrap();
        assert_eq!(
            schedule[0].mode,
            ScheduledMode::Unrecognized("OLIVIA".to_string())
        );
    }

    #[test]
    fn missing_starttime_is_an_error() {
        let err = parse_schedule(r#"[{"mode": "IDENT"}]"#).unwrap_err();
        assert!(matches!(err, Error::Schedule(_)));
    }

    #[test]
    fn negative_starttime_is_an_error() {
        assert!(parse_schedule(r#"[{"starttime": -5, "mode": "IDENT"}]"#).is_err());
    }

    #[test]
    fn not_json() {
        assert!(matches!(parse_schedule("IDENT 0"), Err(Error::Schedule(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        fs::write(&path, r#"[{"starttime": 0, "mode": "CARRIER"}]"#).unwrap();
        assert_eq!(
            load_schedule(&path).unwrap(),
            vec![ScheduleEntry::new(0, Mode::Carrier)]
        );
        assert!(load_schedule(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn default_cycle_is_ordered() {
        let offsets: Vec<u64> = default_schedule()
            .iter()
            .map(|e| e.start_offset_seconds)
            .collect();
        assert_eq!(offsets, vec![0, 15, 30, 90]);
    }
}
