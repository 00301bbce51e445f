//! Station configuration file (TOML).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use beacon_core::error::{Error, Result};
use beacon_core::store::ConfigStore;
use beacon_core::types::StationConfig;

/// Parse and validate a station configuration.
pub fn parse_config(text: &str) -> Result<StationConfig> {
    let config: StationConfig =
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &StationConfig) -> Result<()> {
    let required = [
        ("callsign", &config.callsign),
        ("freq", &config.freq),
        ("freq_offset", &config.freq_offset),
        ("freq_sideband", &config.freq_sideband),
        ("power", &config.power),
        ("serial_device", &config.serial_device),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(Error::Config(format!("{field} must not be empty")));
        }
    }
    if config.baud == 0 {
        return Err(Error::Config("baud must be positive".into()));
    }
    if config.beacon.payload_length == 0 {
        return Err(Error::Config("beacon.payload_length must be positive".into()));
    }
    let t = &config.timings;
    if t.command_timeout_ms == 0
        || t.transmit_timeout_ms == 0
        || t.byte_poll_ms == 0
        || t.schedule_poll_ms == 0
    {
        return Err(Error::Config("timings must all be positive".into()));
    }
    Ok(())
}

/// Log the settings a run will use.
pub fn log_config(config: &StationConfig) {
    info!(
        callsign = %config.callsign,
        site = %config.sitename,
        freq = %config.freq,
        sideband = %config.freq_sideband,
        offset = %config.freq_offset,
        power = %config.power,
        "station"
    );
    debug!(
        device = %config.serial_device,
        baud = config.baud,
        inhibit_active = config.inhibit_active,
        grace_counter = config.grace_counter,
        grace_threshold = config.grace_threshold,
        "station details"
    );
}

/// A configuration file on disk, also the write-back target for the
/// grace counter.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StationConfig> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", self.path.display()))
        })?;
        parse_config(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", self.path.display())))
    }

    /// Temporary sibling written before the rename.
    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for ConfigFile {
    /// Replace the file in one rename so a crash never leaves it half written.
    fn persist(&mut self, config: &StationConfig) -> Result<()> {
        let text = toml::to_string_pretty(config).map_err(|e| Error::Persist(e.to_string()))?;
        let staging = self.staging_path();
        fs::write(&staging, text)
            .and_then(|()| fs::rename(&staging, &self.path))
            .map_err(|e| Error::Persist(format!("{}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), grace_counter = config.grace_counter, "config saved");
        Ok(())
    }
}
