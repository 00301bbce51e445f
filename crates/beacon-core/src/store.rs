//! Persistence seam for the one runtime-mutated configuration field.

use crate::error::Result;
use crate::types::StationConfig;

/// Writes the station configuration back to wherever it was loaded from.
///
/// Called synchronously, once per mutation of
/// [`StationConfig::grace_counter`], before the run continues.
pub trait ConfigStore {
    fn persist(&mut self, config: &StationConfig) -> Result<()>;
}
