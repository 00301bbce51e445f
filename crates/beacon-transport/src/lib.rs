//! Transport implementations for the beacon controller.
//!
//! - [`SerialTransport`]: USB virtual COM port to the QITX controller board

pub mod serial;

pub use serial::SerialTransport;
