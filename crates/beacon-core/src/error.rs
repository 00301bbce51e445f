//! Error types for the beacon controller.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Connection, transport, protocol and
//! configuration failures are all captured here.
//!
//! Parameter-level protocol failures (an echo that does not match, a reply
//! with no value) are *not* errors: they are reported to the caller as
//! `bool` / `Option` values. Only failures that make the device unusable
//! surface as [`Error`].

/// The error type for all beacon operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial device could not be opened. Fatal for the run.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transport-level error (serial port write/read failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (unexpected or undecodable device output).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the transmitter to answer.
    ///
    /// Distinct from a parsed failure: the device said nothing at all
    /// before the deadline.
    #[error("timeout waiting for response")]
    Timeout,

    /// The link has been closed or was never opened.
    #[error("not connected")]
    NotConnected,

    /// The connection to the transmitter was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The station configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// The schedule could not be loaded or is invalid.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// The mutated station configuration could not be written back.
    #[error("persist error: {0}")]
    Persist(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the link to the transmitter is gone.
    ///
    /// The schedule engine stops dispatching further entries when this
    /// returns `true`.
    pub fn is_link_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Transport(_)
                | Error::NotConnected
                | Error::ConnectionLost
                | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
