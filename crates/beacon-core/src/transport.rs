//! Byte-level transport to the transmitter.
//!
//! The QITX command protocol is line oriented, but framing lives one level
//! up in `beacon-link`. A [`Transport`] only moves bytes: the serial port
//! in production (`beacon-transport`), a scripted device in tests
//! (`beacon-test-harness`).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the transmitter.
///
/// Implementations are used by exactly one owner at a time and never
/// reentered; there is no internal locking.
#[async_trait]
pub trait Transport: Send {
    /// Write all of `data` and flush it to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever bytes are available into `buf`, waiting at most
    /// `timeout` for the first byte.
    ///
    /// Returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrived before the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Release the underlying device. Calling it twice is harmless.
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport still holds the device.
    fn is_connected(&self) -> bool;
}
