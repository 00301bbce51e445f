//! TransmitterLink -- command/response exchanges with the QITX controller.
//!
//! The protocol is strictly half duplex: one command, then its reply, then
//! the next command. Every public operation here is one complete exchange
//! (`Idle -> CommandSent -> AwaitingResponse -> Idle`), and `&mut self`
//! keeps a second exchange from starting while one is in flight.
//!
//! Every wait for device output is bounded. Parameter exchanges wait at
//! most [`Timings::command_timeout`] per line; blocking transmissions wait
//! at most [`Timings::transmit_timeout`] for their confirmation. Running out
//! of time is reported as a timeout outcome, never as a parsed failure.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use beacon_core::error::{Error, Result};
use beacon_core::transport::Transport;
use beacon_core::types::{ProtocolResponse, SegmentResult, Timings};
use beacon_transport::SerialTransport;

use crate::protocol::{self, EOT, INHIBIT_ACTIVE, INHIBIT_INACTIVE};

/// Parameter toggling the power amplifier.
pub const PA_PARAMETER: &str = "PA";

/// A completion reply is at least `OK\r\n` or `ERROR`; fewer buffered
/// bytes cannot be a whole reply yet.
const MIN_COMPLETION_BYTES: usize = 4;

/// Upper bound on buffered, unconsumed device output.
const MAX_BUF: usize = 4096;

/// How long `flush_input` waits for more stale bytes.
const FLUSH_QUIET: Duration = Duration::from_millis(50);

/// Where the link is in the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    CommandSent,
    AwaitingResponse,
    /// PSK pass-through: raw characters go straight on air until EOT.
    PskTerminal,
}

/// The exclusive owner of the connection to the transmitter.
pub struct TransmitterLink {
    transport: Box<dyn Transport>,
    timings: Timings,
    rx_buf: Vec<u8>,
    state: ExchangeState,
    /// The last exchange ended without a clean reply; more of it may still
    /// be buffered or on its way.
    dirty: bool,
    closed: bool,
}

impl TransmitterLink {
    /// Wrap an already-open transport.
    pub fn new(transport: Box<dyn Transport>, timings: Timings) -> Self {
        TransmitterLink {
            transport,
            timings,
            rx_buf: Vec::new(),
            state: ExchangeState::Idle,
            dirty: false,
            closed: false,
        }
    }

    /// Open the serial device and wrap it.
    ///
    /// Fails with [`Error::Connection`] if the device cannot be opened.
    pub async fn open(device: &str, baud: u32, timings: Timings) -> Result<Self> {
        let transport = SerialTransport::open(device, baud).await?;
        Ok(Self::new(Box::new(transport), timings))
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Whether the link still holds the device.
    pub fn is_open(&self) -> bool {
        !self.closed && self.transport.is_connected()
    }

    // ---------------------------------------------------------------
    // Raw exchange primitives
    // ---------------------------------------------------------------

    /// Send `NAME` or `NAME,arg1,...` as one line.
    pub async fn send_command(&mut self, name: &str, args: &[&str]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        if matches!(
            self.state,
            ExchangeState::CommandSent | ExchangeState::AwaitingResponse
        ) {
            // A previous exchange was abandoned mid-way; its reply is stale.
            warn!(state = ?self.state, "previous exchange incomplete, discarding buffered input");
            self.dirty = true;
        }
        if self.dirty {
            let quiet = self.timings.byte_poll();
            self.drain(quiet).await?;
        }
        let line = protocol::encode_command(name, args);
        debug!(command = %String::from_utf8_lossy(&line).trim_end(), "sending command");
        self.transport.send(&line).await?;
        self.state = ExchangeState::CommandSent;
        Ok(())
    }

    /// Read and classify the reply to a value exchange.
    ///
    /// A leading success line is a spurious early acknowledgment: it is
    /// skipped, once, and the next line is parsed instead. The value line
    /// must contain a comma and must be followed by a success line.
    pub async fn read_response(&mut self) -> Result<ProtocolResponse> {
        self.state = ExchangeState::AwaitingResponse;
        let result = self.read_value_reply().await;
        self.state = ExchangeState::Idle;
        if !matches!(result, Ok(ProtocolResponse::Data(_))) {
            self.dirty = true;
        }
        result
    }

    async fn read_value_reply(&mut self) -> Result<ProtocolResponse> {
        let timeout = self.timings.command_timeout();

        let Some(mut line) = self.read_line(timeout).await? else {
            return Ok(ProtocolResponse::Timeout);
        };

        if protocol::is_success(&line) {
            debug!(line = %line, "skipping early acknowledgment");
            match self.read_line(timeout).await? {
                Some(next) => line = next,
                None => return Ok(ProtocolResponse::Timeout),
            }
        }

        let Some(value) = protocol::extract_value(&line) else {
            debug!(line = %line, "reply has no value");
            return Ok(ProtocolResponse::Malformed);
        };

        match self.read_line(timeout).await? {
            Some(confirm) if protocol::is_success(&confirm) => Ok(ProtocolResponse::Data(value)),
            Some(other) => {
                debug!(value = %value, line = %other, "value not confirmed");
                Ok(ProtocolResponse::Malformed)
            }
            None => Ok(ProtocolResponse::Timeout),
        }
    }

    /// Wait for one complete line, up to `timeout`.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = protocol::take_line(&mut self.rx_buf) {
                debug!(line = %line, "received line");
                return Ok(Some(line));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.fill(deadline - now).await?;
        }
    }

    /// Wait until at least `min` bytes or one whole line are buffered,
    /// polling every [`Timings::byte_poll`], for at most `timeout`.
    async fn wait_for_bytes(&mut self, min: usize, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        while self.rx_buf.len() < min && !self.rx_buf.contains(&protocol::LINE_TERMINATOR) {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let wait = (deadline - now).min(self.timings.byte_poll());
            self.fill(wait).await?;
        }
        Ok(true)
    }

    /// One bounded read into the receive buffer. `Ok(false)` on timeout.
    async fn fill(&mut self, timeout: Duration) -> Result<bool> {
        let mut chunk = [0u8; 256];
        match self.transport.receive(&mut chunk, timeout).await {
            Ok(n) => {
                self.rx_buf.extend_from_slice(&chunk[..n]);
                if self.rx_buf.len() > MAX_BUF {
                    warn!(len = self.rx_buf.len(), "receive buffer overflow, clearing");
                    self.rx_buf.clear();
                }
                Ok(n > 0)
            }
            Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Wait for the line that ends a blocking transmission.
    async fn await_completion(&mut self) -> Result<SegmentResult> {
        self.state = ExchangeState::AwaitingResponse;
        let result = self.read_completion().await;
        self.state = ExchangeState::Idle;
        if !matches!(result, Ok(SegmentResult::Confirmed)) {
            self.dirty = true;
        }
        result
    }

    async fn read_completion(&mut self) -> Result<SegmentResult> {
        let transmit_timeout = self.timings.transmit_timeout();
        if !self
            .wait_for_bytes(MIN_COMPLETION_BYTES, transmit_timeout)
            .await?
        {
            warn!(
                timeout_s = transmit_timeout.as_secs(),
                "no completion from transmitter"
            );
            return Ok(SegmentResult::TimedOut);
        }
        match self.read_line(self.timings.command_timeout()).await? {
            Some(line) => Ok(protocol::classify_completion(&line)),
            None => Ok(SegmentResult::TimedOut),
        }
    }

    /// Discard anything the device sent that nobody asked for.
    ///
    /// Reads until the line has been quiet for a short while, but never for
    /// longer than [`Timings::command_timeout`] in total.
    pub async fn flush_input(&mut self) -> Result<usize> {
        self.drain(FLUSH_QUIET).await
    }

    async fn drain(&mut self, quiet: Duration) -> Result<usize> {
        let mut discarded = std::mem::take(&mut self.rx_buf).len();
        let deadline = Instant::now() + self.timings.command_timeout();
        let mut chunk = [0u8; 256];
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(bytes = discarded, "device still sending, giving up on flush");
                break;
            }
            match self.transport.receive(&mut chunk, quiet.min(deadline - now)).await {
                Ok(n) if n > 0 => discarded += n,
                Ok(_) | Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        self.dirty = false;
        if discarded > 0 {
            debug!(bytes = discarded, "flushed stale input");
        }
        Ok(discarded)
    }

    // ---------------------------------------------------------------
    // Parameters
    // ---------------------------------------------------------------

    /// Set a parameter and report whether the device echoed the same value.
    ///
    /// A mismatch, malformed reply or timeout yields `Ok(false)`; only a
    /// failure of the link itself is an error.
    pub async fn set_parameter(&mut self, name: &str, value: &str) -> Result<bool> {
        self.send_command(name, &[value]).await?;
        let response = self.read_response().await?;
        let matched = response.value() == Some(value);
        if !matched {
            warn!(parameter = name, requested = value, ?response, "parameter not confirmed");
        }
        Ok(matched)
    }

    /// Read a parameter. `Ok(None)` is the failure sentinel.
    pub async fn get_parameter(&mut self, name: &str) -> Result<Option<String>> {
        self.send_command(name, &[]).await?;
        match self.read_response().await? {
            ProtocolResponse::Data(value) => Ok(Some(value)),
            other => {
                debug!(parameter = name, response = ?other, "parameter read failed");
                Ok(None)
            }
        }
    }

    /// Switch the power amplifier on or off.
    pub async fn power_on(&mut self, on: bool) -> Result<bool> {
        let value = if on { "ON" } else { "OFF" };
        info!(pa = value, "power amplifier");
        self.set_parameter(PA_PARAMETER, value).await
    }

    /// Whether the device reports its transmit inhibit as active.
    pub async fn tx_inhibited(&mut self) -> Result<bool> {
        Ok(self.get_parameter("INHIBIT").await?.as_deref() == Some(INHIBIT_ACTIVE))
    }

    /// Release the device's transmit inhibit.
    pub async fn clear_inhibit(&mut self) -> Result<bool> {
        self.set_parameter("INHIBIT", INHIBIT_INACTIVE).await
    }

    // ---------------------------------------------------------------
    // Blocking transmissions
    // ---------------------------------------------------------------

    async fn transmit(&mut self, name: &str, args: &[&str]) -> Result<SegmentResult> {
        self.send_command(name, args).await?;
        let result = self.await_completion().await?;
        debug!(command = name, %result, "transmission finished");
        Ok(result)
    }

    /// Send the Morse identification. Duration is set by the device.
    pub async fn transmit_ident(&mut self) -> Result<SegmentResult> {
        self.transmit("IDENT", &[]).await
    }

    /// Send the device's stored message as PSK at `baud`.
    pub async fn transmit_psk(&mut self, baud: u32) -> Result<SegmentResult> {
        self.transmit("PSK", &[&baud.to_string()]).await
    }

    /// Send the device's stored message as RTTY.
    pub async fn transmit_rtty(&mut self, baud: u32, shift: u32) -> Result<SegmentResult> {
        self.transmit("RTTY", &[&baud.to_string(), &shift.to_string()])
            .await
    }

    /// Send a selective call, or a selcall channel test.
    pub async fn transmit_selcall(
        &mut self,
        source: u32,
        dest: u32,
        test_mode: bool,
    ) -> Result<SegmentResult> {
        let name = if test_mode { "SELTEST" } else { "SELCALL" };
        self.transmit(name, &[&source.to_string(), &dest.to_string()])
            .await
    }

    /// Send the device's stored message as DominoEX 8.
    pub async fn transmit_domino(&mut self) -> Result<SegmentResult> {
        self.transmit("DOMINO", &["8"]).await
    }

    // ---------------------------------------------------------------
    // PSK pass-through
    // ---------------------------------------------------------------

    /// Enter character pass-through at `baud`. The device starts sending
    /// idle phase reversals immediately.
    pub async fn start_psk_terminal(&mut self, baud: u32) -> Result<()> {
        self.send_command("PSKTERM", &[&baud.to_string()]).await?;
        self.state = ExchangeState::PskTerminal;
        Ok(())
    }

    /// Send raw bytes in pass-through mode.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        if self.state != ExchangeState::PskTerminal {
            return Err(Error::Protocol("raw send outside PSK terminal mode".into()));
        }
        self.transport.send(data).await
    }

    /// Leave pass-through with EOT and wait for the device to confirm.
    pub async fn finish_psk_terminal(&mut self) -> Result<SegmentResult> {
        self.send_raw(&[EOT]).await?;
        self.await_completion().await
    }

    // ---------------------------------------------------------------
    // Release
    // ---------------------------------------------------------------

    /// Release the device. Only the first call reaches the transport.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state = ExchangeState::Idle;
        self.transport.close().await
    }

    /// Best-effort power-off followed by [`close`](Self::close).
    ///
    /// Safe on every exit path, including after an abandoned exchange or a
    /// lost connection: failures before the close are logged, not returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.transport.is_connected() {
            if self.state == ExchangeState::PskTerminal {
                if let Err(e) = self.transport.send(&[EOT]).await {
                    warn!(error = %e, "failed to end PSK terminal during shutdown");
                }
                self.state = ExchangeState::Idle;
                self.dirty = true;
            }
            match self.power_on(false).await {
                Ok(true) => {}
                Ok(false) => warn!("power amplifier off not confirmed"),
                Err(e) => warn!(error = %e, "failed to power off during shutdown"),
            }
        }
        self.close().await
    }
}
