// Generic ASCII instrument
//
// Provides:
// - Framing codec (command + argument + terminator, line decoding)
// - Command tables with per-command response metadata
// - Register bitfield decoding and error-code tables
// - `Instrument`, the per-connection dispatcher every device family is built on

pub mod codec;
pub mod commands;
mod error;
pub mod register;
pub mod sentinel;

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_READ_TIMEOUT, HANDSHAKE_DELAY, STATUS_SETTLE_DELAY};
use crate::transport::Transport;

pub use codec::{Frame, RawResponse, Terminator};
pub use commands::{ArgumentStyle, CommandSet, CommandSpec, CommandTable, ResponseMode};
pub use error::{InstrumentError, Result};
pub use register::{ErrorCodeTable, RegisterBitfield, RegisterLayout};
pub use sentinel::SentinelOutcome;

/// How a device family reports its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityQuery {
    /// The device cannot identify itself
    Placeholder,
    /// IEEE-488.2 style `*IDN?` returning `maker,model,serial,firmware`
    Idn,
}

/// Identity reported at connect time, for display only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub serial_number: String,
    pub model_number: String,
    pub serial_string: String,
    pub firmware_version: String,
}

impl Identity {
    pub fn placeholder() -> Self {
        Self {
            serial_number: "xxxx".to_string(),
            model_number: "xxxx".to_string(),
            serial_string: "xxxx/xxxx".to_string(),
            firmware_version: "xxxx".to_string(),
        }
    }

    fn from_idn(reply: &str) -> Option<Self> {
        let fields: Vec<&str> = reply.split(',').map(str::trim).collect();
        match fields.as_slice() {
            [_maker, model, serial, firmware] => Some(Self {
                serial_number: serial.to_string(),
                model_number: model.to_string(),
                serial_string: format!("{}/{}", model, serial),
                firmware_version: firmware.to_string(),
            }),
            _ => None,
        }
    }
}

/// Immutable per-family configuration held by every `Instrument`
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub terminator: Terminator,
    pub commands: CommandTable,
    pub identity: IdentityQuery,
    pub read_timeout: Duration,
    pub settle_delay: Duration,
}

impl DeviceProfile {
    pub fn new<C: CommandSet>(name: &'static str, terminator: Terminator, style: ArgumentStyle) -> Self {
        Self {
            name,
            terminator,
            commands: CommandTable::from_set::<C>(style),
            identity: IdentityQuery::Placeholder,
            read_timeout: DEFAULT_READ_TIMEOUT,
            settle_delay: STATUS_SETTLE_DELAY,
        }
    }

    pub fn with_identity(mut self, identity: IdentityQuery) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Frame a command for this family
    pub fn encode(&self, command: &str, argument: Option<&str>) -> Frame {
        codec::encode(command, argument, self.commands.style(), self.terminator)
    }
}

/// Transport plus whatever per-connection state a driver keeps
struct Session<T, S> {
    transport: T,
    state: S,
}

/// One connection to one instrument
///
/// All traffic goes through `lock()`, so concurrent callers queue instead of
/// interleaving writes and reads on the same channel.
pub struct Instrument<T: Transport, S = ()> {
    profile: DeviceProfile,
    session: Mutex<Session<T, S>>,
}

impl<T: Transport> Instrument<T> {
    /// Wrap an already-open transport without any I/O
    pub fn new(transport: T, profile: DeviceProfile) -> Self {
        Self::with_state(transport, profile, ())
    }

    /// Wrap a transport and run the connect handshake
    pub fn connect(transport: T, profile: DeviceProfile) -> Result<Self> {
        let instrument = Self::new(transport, profile);
        instrument.handshake()?;
        Ok(instrument)
    }
}

impl<T: Transport, S> Instrument<T, S> {
    pub fn with_state(transport: T, profile: DeviceProfile, state: S) -> Self {
        Self {
            profile,
            session: Mutex::new(Session { transport, state }),
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Take exclusive use of the connection
    pub fn lock(&self) -> Exchange<'_, T, S> {
        Exchange {
            profile: &self.profile,
            session: self.session.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Send a bare terminator, wait, and drop whatever an earlier session left
    pub fn handshake(&self) -> Result<()> {
        let mut exchange = self.lock();
        let terminator = self.profile.terminator.as_bytes();
        if !terminator.is_empty() {
            exchange.session.transport.write(terminator)?;
        }
        sleep(HANDSHAKE_DELAY);
        exchange.session.transport.reset_input_buffer()?;
        info!("Connected to {}", self.profile.name);
        Ok(())
    }

    /// Fire-and-forget command
    pub fn command(&self, name: &str, argument: Option<&str>) -> Result<()> {
        self.lock().command(name, argument)
    }

    /// Command plus read, shaped by the command's `ResponseMode`
    pub fn query(&self, name: &str, argument: Option<&str>) -> Result<RawResponse> {
        self.lock().query(name, argument)
    }

    /// Identity for display; never fails
    pub fn identity(&self) -> Identity {
        match self.profile.identity {
            IdentityQuery::Placeholder => Identity::placeholder(),
            IdentityQuery::Idn => {
                let reply = self.query("*IDN?", None);
                match reply.as_ref().ok().and_then(RawResponse::last_line).and_then(Identity::from_idn) {
                    Some(identity) => identity,
                    None => {
                        warn!("{} identity unavailable ({:?}), using placeholders", self.profile.name, reply);
                        Identity::placeholder()
                    }
                }
            }
        }
    }

    /// Read the per-connection state under the connection lock
    pub fn read_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock().session.state)
    }
}

/// Exclusive access to one connection for the duration of an operation
pub struct Exchange<'a, T, S> {
    profile: &'a DeviceProfile,
    session: MutexGuard<'a, Session<T, S>>,
}

impl<T: Transport, S> Exchange<'_, T, S> {
    pub fn profile(&self) -> &DeviceProfile {
        self.profile
    }

    pub fn state(&self) -> &S {
        &self.session.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.session.state
    }

    /// Look up a command and the frame it goes out as
    ///
    /// A command that takes no argument is framed by its table name, so an
    /// inline argument (`VERSION=9`) is dropped like an explicit one.
    fn resolve(&self, name: &str, argument: Option<&str>) -> Result<(CommandSpec, Frame)> {
        let spec = *self.profile.commands.lookup(name)?;
        if spec.expects_argument {
            return Ok((spec, self.profile.encode(name, argument)));
        }
        let inline = !name.trim().eq_ignore_ascii_case(spec.name);
        if argument.is_some() || inline {
            warn!(
                "{} command does not accept arguments, dropping argument {:?}",
                spec.name,
                argument.unwrap_or(name)
            );
        }
        Ok((spec, self.profile.encode(spec.name, None)))
    }

    /// Write a frame as-is
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        debug!("{} <- {:?}", self.profile.name, frame.payload);
        self.session.transport.write(&frame.to_bytes())?;
        Ok(())
    }

    /// Read `n` lines with the profile's terminator and read timeout
    pub fn read_lines(&mut self, label: &str, n: usize) -> Result<RawResponse> {
        let response = codec::decode_fixed_lines(
            &mut self.session.transport,
            label,
            self.profile.terminator,
            n,
            self.profile.read_timeout,
        )?;
        debug!("{} -> {:?}", self.profile.name, response.lines);
        Ok(response)
    }

    pub fn command(&mut self, name: &str, argument: Option<&str>) -> Result<()> {
        let (_, frame) = self.resolve(name, argument)?;
        self.write_frame(&frame)
    }

    /// End-token commands wait for the profile's read timeout here; use
    /// `query_until_token` when the command carries its own deadline.
    pub fn query(&mut self, name: &str, argument: Option<&str>) -> Result<RawResponse> {
        let (spec, frame) = self.resolve(name, argument)?;

        self.session.transport.reset_input_buffer()?;
        self.write_frame(&frame)?;

        match spec.response {
            ResponseMode::Silent => Ok(RawResponse::empty()),
            ResponseMode::Lines(n) => self.read_lines(&frame.payload, n),
            ResponseMode::UntilIdle => {
                let response = codec::decode_until_idle(
                    &mut self.session.transport,
                    &frame.payload,
                    self.profile.settle_delay,
                )?;
                debug!("{} -> {:?}", self.profile.name, response.lines);
                Ok(response)
            }
            ResponseMode::UntilToken(tokens) => {
                let outcome = self.read_until_token(tokens, self.profile.read_timeout)?;
                Ok(RawResponse::new(outcome.lines))
            }
        }
    }

    /// Query an end-token command, reading for at most `timeout`
    ///
    /// A missing end token is not an error here; the outcome says whether
    /// the response completed.
    pub fn query_until_token(
        &mut self,
        name: &str,
        argument: Option<&str>,
        timeout: Duration,
    ) -> Result<SentinelOutcome> {
        let (spec, frame) = self.resolve(name, argument)?;
        let ResponseMode::UntilToken(tokens) = spec.response else {
            return Err(InstrumentError::invalid_response(
                spec.name,
                format!("{:?} responses have no end token", spec.response),
            ));
        };

        self.session.transport.reset_input_buffer()?;
        self.write_frame(&frame)?;
        self.read_until_token(tokens, timeout)
    }

    fn read_until_token(&mut self, tokens: &'static [&'static str], timeout: Duration) -> Result<SentinelOutcome> {
        let outcome = codec::decode_until_token(&mut self.session.transport, tokens, timeout)?;
        debug!("{} -> {:?} ({:?})", self.profile.name, outcome.lines, outcome.state);
        Ok(outcome)
    }
}
