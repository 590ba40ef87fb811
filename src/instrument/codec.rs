// ASCII framing: command + argument + terminator out, trimmed lines back

use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::debug;

use super::commands::ArgumentStyle;
use super::error::{InstrumentError, Result};
use super::sentinel::{ReadState, SentinelOutcome, SentinelReader};
use crate::transport::{deadline_after, Transport};

/// Back-off between empty polls of a sentinel read
const SENTINEL_POLL: Duration = Duration::from_millis(10);

/// Line terminator appended to every frame (constant per device family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    None,
    Lf,
    Cr,
    CrLf,
    FormFeed,
}

impl Terminator {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Terminator::None => b"",
            Terminator::Lf => b"\n",
            Terminator::Cr => b"\r",
            Terminator::CrLf => b"\r\n",
            Terminator::FormFeed => b"\x0c",
        }
    }
}

/// One command ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: String,
    pub terminator: Terminator,
}

impl Frame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 2);
        bytes.extend_from_slice(self.payload.as_bytes());
        bytes.extend_from_slice(self.terminator.as_bytes());
        bytes
    }
}

/// Lines received for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub lines: Vec<String>,
    pub received_at: Instant,
}

impl RawResponse {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            received_at: Instant::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// The value line of echo-then-value replies
    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Build a frame; the command is upper-cased, the argument is sent verbatim
pub fn encode(
    command: &str,
    argument: Option<&str>,
    style: ArgumentStyle,
    terminator: Terminator,
) -> Frame {
    let command = command.trim().to_uppercase();
    let payload = match argument {
        Some(argument) => format!("{}{}{}", command, style.separator(), argument),
        None => command,
    };
    Frame {
        payload,
        terminator,
    }
}

fn clean_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Read exactly `n` terminator-delimited lines
///
/// Each read blocks up to `timeout`; an empty read means the device went
/// silent and fails the whole response.
pub fn decode_fixed_lines<T: Transport + ?Sized>(
    transport: &mut T,
    command: &str,
    terminator: Terminator,
    n: usize,
    timeout: Duration,
) -> Result<RawResponse> {
    let mut lines = Vec::with_capacity(n);
    for _ in 0..n {
        let raw = transport.read_until(terminator.as_bytes(), timeout)?;
        if raw.is_empty() {
            return Err(InstrumentError::CommunicationTimeout {
                command: command.to_string(),
                timeout,
            });
        }
        lines.push(clean_line(&raw));
    }
    Ok(RawResponse::new(lines))
}

/// Wait `settle_delay`, then drain everything buffered in one shot
pub fn decode_until_idle<T: Transport + ?Sized>(
    transport: &mut T,
    command: &str,
    settle_delay: Duration,
) -> Result<RawResponse> {
    sleep(settle_delay);
    let raw = transport.read_available()?;
    if raw.is_empty() {
        return Err(InstrumentError::CommunicationTimeout {
            command: command.to_string(),
            timeout: settle_delay,
        });
    }

    let lines = raw
        .split(|&byte| byte == b'\n' || byte == b'\r' || byte == b'\x0c')
        .map(clean_line)
        .filter(|line| !line.is_empty())
        .collect();
    Ok(RawResponse::new(lines))
}

/// Read lines until an end-token line and one trailing line, or `timeout`
///
/// Never fails on timeout: the partial outcome is returned and the caller
/// decides what an incomplete response means.
pub fn decode_until_token<T: Transport + ?Sized>(
    transport: &mut T,
    tokens: &'static [&'static str],
    timeout: Duration,
) -> Result<SentinelOutcome> {
    let deadline = deadline_after(timeout);
    let mut reader = SentinelReader::new(tokens);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("Sentinel read timed out in state {:?}", reader.state());
            break;
        }
        let chunk = transport.read_until(b"\n", remaining)?;
        if chunk.is_empty() {
            sleep(SENTINEL_POLL.min(remaining));
            continue;
        }
        if reader.push_bytes(&chunk) == ReadState::Done {
            break;
        }
    }

    Ok(reader.finish())
}
