//! Mock transport for deterministic testing of the transmitter link.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/reply pairs. Replies can be delayed, which together with
//! tokio's paused clock lets tests exercise timeouts and blocking
//! transmissions without waiting in real time.
//!
//! # Example
//!
//! ```
//! use beacon_test_harness::{MockTransport, Reply};
//! use std::time::Duration;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"FREQ,7038000\n", Reply::now(b"FREQ,7038000\nOK\n"));
//! mock.expect(b"IDENT\n", Reply::after(Duration::from_secs(15), b"OK\n"));
//! let handle = mock.handle();
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use beacon_core::error::{Error, Result};
use beacon_core::transport::Transport;

/// How the mock device answers one `send()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Make `data` readable once `delay` has elapsed.
    Respond { data: Vec<u8>, delay: Duration },
    /// Accept the bytes and say nothing.
    Silent,
    /// Fail the send with [`Error::ConnectionLost`] and drop the link.
    Disconnect,
}

impl Reply {
    /// Reply immediately.
    pub fn now(data: &[u8]) -> Self {
        Reply::Respond {
            data: data.to_vec(),
            delay: Duration::ZERO,
        }
    }

    /// Reply after `delay`.
    pub fn after(delay: Duration, data: &[u8]) -> Self {
        Reply::Respond {
            data: data.to_vec(),
            delay,
        }
    }
}

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    reply: Reply,
}

#[derive(Debug)]
struct PendingChunk {
    ready_at: Instant,
    data: Vec<u8>,
}

/// One `send()` call as seen by the mock.
#[derive(Debug)]
struct SentRecord {
    at: Instant,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Journal {
    sent: Vec<SentRecord>,
    closes: usize,
}

/// Shared view of what a [`MockTransport`] has seen.
///
/// Clone it out of the mock before handing the mock to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    journal: Arc<Mutex<Journal>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Every `send()` so far as text, with the trailing newline removed.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .map(|r| {
                String::from_utf8_lossy(&r.data)
                    .trim_end_matches(['\r', '\n'])
                    .to_string()
            })
            .collect()
    }

    /// Time of the first `send()` whose bytes equal `data`.
    pub fn first_sent_at(&self, data: &[u8]) -> Option<Instant> {
        self.lock()
            .sent
            .iter()
            .find(|r| r.data == data)
            .map(|r| r.at)
    }

    /// How many times `close()` was called.
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Reply + Send>;

/// A mock [`Transport`] for testing without the controller board.
///
/// Expectations are consumed in order. When they run out, the optional
/// responder answers instead; with neither, `send()` fails with
/// [`Error::Protocol`].
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    responder: Option<Responder>,
    pending: VecDeque<PendingChunk>,
    connected: bool,
    handle: MockHandle,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            responder: None,
            pending: VecDeque::new(),
            connected: true,
            handle: MockHandle::default(),
        }
    }

    /// Create a mock answered entirely by `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Reply + Send + 'static,
    {
        let mut mock = Self::new();
        mock.responder = Some(Box::new(responder));
        mock
    }

    /// Expect `request` next and answer it with `reply`.
    pub fn expect(&mut self, request: &[u8], reply: Reply) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply,
        });
    }

    /// Make `data` readable immediately, without any request.
    pub fn push_unsolicited(&mut self, data: &[u8]) {
        self.queue(data.to_vec(), Duration::ZERO);
    }

    /// A handle for inspecting traffic after the mock has been moved.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Chunks become readable in the order they were queued.
    fn queue(&mut self, data: Vec<u8>, delay: Duration) {
        if data.is_empty() {
            return;
        }
        let mut ready_at = Instant::now() + delay;
        if let Some(last) = self.pending.back() {
            ready_at = ready_at.max(last.ready_at);
        }
        self.pending.push_back(PendingChunk { ready_at, data });
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.handle.lock().sent.push(SentRecord {
            at: Instant::now(),
            data: data.to_vec(),
        });

        let reply = if let Some(expectation) = self.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&expectation.request),
                    String::from_utf8_lossy(data)
                )));
            }
            expectation.reply
        } else if let Some(responder) = self.responder.as_mut() {
            responder(data)
        } else {
            return Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            ));
        };

        match reply {
            Reply::Respond { data, delay } => {
                self.queue(data, delay);
                Ok(())
            }
            Reply::Silent => Ok(()),
            Reply::Disconnect => {
                self.connected = false;
                self.pending.clear();
                Err(Error::ConnectionLost)
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.connected {
                return Err(Error::NotConnected);
            }

            let now = Instant::now();
            let next_ready = self.pending.front().map(|c| c.ready_at);
            match next_ready {
                Some(ready_at) if ready_at <= now => {
                    let Some(chunk) = self.pending.front_mut() else {
                        continue;
                    };
                    let n = chunk.data.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk.data[..n]);
                    chunk.data.drain(..n);
                    if chunk.data.is_empty() {
                        self.pending.pop_front();
                    }
                    return Ok(n);
                }
                Some(ready_at) if ready_at <= deadline => {
                    tokio::time::sleep_until(ready_at).await;
                }
                _ => {
                    tokio::time::sleep_until(deadline).await;
                    return Err(Error::Timeout);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        self.handle.lock().closes += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
