//! beacon-core: Core traits, types, and error definitions for the QITX
//! beacon controller.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level channel to the transmitter
//! - [`Clock`] -- wall-clock source for minute alignment
//! - [`ScheduleEntry`], [`StationConfig`], [`TxPayload`] -- the data model
//! - [`ConfigStore`] -- write-back of the mutated grace counter
//! - [`Error`] / [`Result`] -- error handling

pub mod clock;
pub mod error;
pub mod store;
pub mod transport;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use error::{Error, Result};
pub use store::ConfigStore;
pub use transport::Transport;
pub use types::*;
