//! # beacon -- scheduled multi-mode beacon for the QITX controller
//!
//! `beacon` drives a QITX transmitter controller over its serial line
//! protocol to send timed beacon cycles: a Morse ident, an unmodulated
//! carrier, PSK at several rates, DominoEX 8, RTTY and selcall. Runs start
//! on the top of the minute and carry a pseudorandom payload derived from
//! that minute, so a receiver can regenerate exactly what was sent.
//!
//! ```no_run
//! use beacon::{
//!     ConfigFile, EngineOptions, SystemClock, TransmitterLink, default_schedule, run_beacon,
//! };
//!
//! # async fn demo() -> beacon::Result<()> {
//! let mut store = ConfigFile::new("beacon.toml");
//! let mut config = store.load()?;
//! let mut link = TransmitterLink::open(&config.serial_device, config.baud, config.timings).await?;
//! let options = EngineOptions::from_timings(&config.timings);
//! run_beacon(&mut link, &mut config, &mut store, &default_schedule(), &SystemClock, options).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                         |
//! |-----------------------|-------------------------------------------------|
//! | `beacon-core`         | Traits ([`Transport`], [`Clock`]), types, errors |
//! | `beacon-transport`    | Serial transport                                |
//! | `beacon-link`         | Line protocol and [`TransmitterLink`]           |
//! | **`beacon`**          | Payload, inhibit guard, modes, schedule engine  |

pub mod config;
pub mod engine;
pub mod inhibit;
pub mod modes;
pub mod payload;
pub mod schedule;
pub mod station;

pub use beacon_core::*;
pub use beacon_link::{ExchangeState, TransmitterLink, protocol};

pub use config::{ConfigFile, log_config, parse_config};
pub use engine::{EngineOptions, RunReport, ScheduleEngine, SegmentRecord};
pub use modes::{MODE_TABLE, ModeProfile, SegmentContext};
pub use payload::PayloadGenerator;
pub use schedule::{default_schedule, load_schedule, log_schedule, parse_schedule};
pub use station::{RunOutcome, run_beacon};
