//! QITX line protocol encode/decode.
//!
//! Commands are newline-terminated ASCII lines, `NAME` or
//! `NAME,arg1,arg2,...`. Replies are lines too: a success line starts with
//! `OK` (optionally `OK,value`), a value line is `NAME,value`, and anything
//! else is an error from the controller.
//!
//! All functions here are pure; [`crate::link`] does the I/O.

use beacon_core::types::{ProtocolResponse, SegmentResult};

/// Prefix of every success line.
pub const SUCCESS_MARKER: &str = "OK";

/// Byte that terminates every command and reply line.
pub const LINE_TERMINATOR: u8 = b'\n';

/// End-of-transmission byte that ends PSK pass-through mode.
pub const EOT: u8 = 0x04;

/// `INHIBIT` value reported while transmission is blocked.
pub const INHIBIT_ACTIVE: &str = "ON";

/// `INHIBIT` value that releases the block.
pub const INHIBIT_INACTIVE: &str = "OFF";

/// Encode a command line.
///
/// # Examples
///
/// ```
/// use beacon_link::protocol::encode_command;
///
/// assert_eq!(encode_command("IDENT", &[]), b"IDENT\n");
/// assert_eq!(encode_command("RTTY", &["50", "170"]), b"RTTY,50,170\n");
/// ```
pub fn encode_command(name: &str, args: &[&str]) -> Vec<u8> {
    let mut line = String::with_capacity(name.len() + 16);
    line.push_str(name);
    for arg in args {
        line.push(',');
        line.push_str(arg);
    }
    let mut bytes = line.into_bytes();
    bytes.push(LINE_TERMINATOR);
    bytes
}

/// Whether a reply line carries the success marker.
pub fn is_success(line: &str) -> bool {
    line.starts_with(SUCCESS_MARKER)
}

/// The value of a `NAME,value` line: the field after the first comma.
///
/// Returns `None` when the line has no comma.
pub fn extract_value(line: &str) -> Option<String> {
    let mut fields = line.split(',');
    fields.next()?;
    fields
        .next()
        .map(|v| v.trim_end_matches(['\r', '\n']).to_string())
}

/// Classify a single reply line on its own.
pub fn classify_line(line: &str) -> ProtocolResponse {
    if is_success(line) {
        ProtocolResponse::Ok(extract_value(line))
    } else {
        match extract_value(line) {
            Some(value) => ProtocolResponse::Data(value),
            None => ProtocolResponse::Malformed,
        }
    }
}

/// Classify the line that ends a blocking transmission.
pub fn classify_completion(line: &str) -> SegmentResult {
    match classify_line(line) {
        ProtocolResponse::Ok(_) => SegmentResult::Confirmed,
        _ => SegmentResult::Rejected(line.to_string()),
    }
}

/// Remove and return the first complete line in `buf`, without its
/// terminator or a trailing carriage return.
///
/// Returns `None` if `buf` holds no terminator yet.
pub fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == LINE_TERMINATOR)?;
    let line: Vec<u8> = buf.drain(..=pos).collect();
    let text = String::from_utf8_lossy(&line[..pos]);
    Some(text.trim_end_matches('\r').to_string())
}
