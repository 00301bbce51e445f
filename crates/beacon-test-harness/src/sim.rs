//! A behavioral model of the QITX controller for end-to-end tests.
//!
//! [`SimulatedQitx`] produces a [`MockTransport`] whose responder speaks the
//! controller's line protocol: parameter writes are echoed and confirmed,
//! parameter reads return the stored value, transmission commands confirm
//! after a configurable on-air duration, and `PSKTERM` switches into
//! character pass-through until the end-of-transmission byte arrives.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::mock_serial::{MockTransport, Reply};

/// End-of-transmission byte that leaves PSK pass-through.
const EOT: u8 = 0x04;

/// Commands that key the transmitter and confirm when done.
const TRANSMIT_COMMANDS: &[&str] = &["IDENT", "PSK", "RTTY", "SELCALL", "SELTEST", "DOMINO"];

#[derive(Debug, Default)]
struct SimState {
    params: HashMap<String, String>,
    durations: HashMap<String, Duration>,
    rejected: HashSet<String>,
    echo_overrides: HashMap<String, String>,
    commands: Vec<String>,
    terminal_text: String,
    in_terminal: bool,
    line_buf: Vec<u8>,
}

/// Shared, inspectable model of the controller.
#[derive(Debug, Clone, Default)]
pub struct SimulatedQitx {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedQitx {
    pub fn new() -> Self {
        let sim = Self::default();
        sim.lock()
            .params
            .insert("INHIBIT".to_string(), "OFF".to_string());
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Preset a parameter value.
    pub fn with_param(self, name: &str, value: &str) -> Self {
        self.lock()
            .params
            .insert(name.to_string(), value.to_string());
        self
    }

    /// How long a transmission command keeps the device busy.
    pub fn with_duration(self, command: &str, duration: Duration) -> Self {
        self.lock()
            .durations
            .insert(command.to_string(), duration);
        self
    }

    /// Make `command` answer `ERROR` instead of `OK`.
    pub fn rejecting(self, command: &str) -> Self {
        self.lock().rejected.insert(command.to_string());
        self
    }

    /// Echo `value` for writes to `name`, whatever was requested.
    pub fn echoing(self, name: &str, value: &str) -> Self {
        self.lock()
            .echo_overrides
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Current value of a parameter.
    pub fn param(&self, name: &str) -> Option<String> {
        self.lock().params.get(name).cloned()
    }

    /// Every complete command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Characters received in PSK pass-through mode.
    pub fn terminal_text(&self) -> String {
        self.lock().terminal_text.clone()
    }

    /// A mock transport driven by this model.
    pub fn transport(&self) -> MockTransport {
        let sim = self.clone();
        MockTransport::with_responder(move |data| sim.handle_bytes(data))
    }

    fn handle_bytes(&self, data: &[u8]) -> Reply {
        let mut state = self.lock();
        let mut reply = Reply::Silent;
        for &byte in data {
            if state.in_terminal {
                if byte == EOT {
                    state.in_terminal = false;
                    reply = Reply::now(b"OK\n");
                } else {
                    state.terminal_text.push(byte as char);
                }
                continue;
            }
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&state.line_buf)
                    .trim_end_matches('\r')
                    .to_string();
                state.line_buf.clear();
                reply = handle_line(&mut state, &line);
            } else {
                state.line_buf.push(byte);
            }
        }
        reply
    }
}

fn handle_line(state: &mut SimState, line: &str) -> Reply {
    state.commands.push(line.to_string());

    let mut parts = line.split(',');
    let name = parts.next().unwrap_or_default().to_string();
    let args: Vec<&str> = parts.collect();

    if state.rejected.contains(&name) {
        return Reply::now(b"ERROR\n");
    }

    if name == "PSKTERM" {
        state.in_terminal = true;
        return Reply::Silent;
    }

    if TRANSMIT_COMMANDS.contains(&name.as_str()) {
        let delay = state
            .durations
            .get(&name)
            .copied()
            .unwrap_or(Duration::from_secs(1));
        return Reply::after(delay, b"OK\n");
    }

    match args.first() {
        Some(value) => {
            state.params.insert(name.clone(), value.to_string());
            let echoed = state
                .echo_overrides
                .get(&name)
                .cloned()
                .unwrap_or_else(|| value.to_string());
            Reply::now(format!("{name},{echoed}\nOK\n").as_bytes())
        }
        None => match state.params.get(&name) {
            Some(value) => Reply::now(format!("{name},{value}\nOK\n").as_bytes()),
            None => Reply::now(b"ERROR\n"),
        },
    }
}
