//! Command/response link to the QITX beacon controller.
//!
//! - [`protocol`] -- pure encode/classify helpers for the line protocol
//! - [`link`] -- [`TransmitterLink`], the exclusive owner of the connection

pub mod link;
pub mod protocol;

pub use link::{ExchangeState, PA_PARAMETER, TransmitterLink};
