// Vacuum gauges: Kurt J. Lesker 392, Pfeiffer dual gauge, MKS 392B (RS485)

use tracing::{debug, warn};

use super::{parse_field, value_line, Housekeeping, LogDict};
use crate::instrument::{
    ArgumentStyle, CommandSet, CommandSpec, DeviceProfile, ErrorCodeTable, Identity, Instrument, InstrumentError,
    RawResponse, ResponseMode, Result, Terminator,
};
use crate::transport::{SerialSettings, Transport};

pub fn lesker_serial_settings() -> SerialSettings {
    SerialSettings::eight_n_one(19200)
}

pub fn pfeiffer_serial_settings() -> SerialSettings {
    SerialSettings::eight_n_one(9600)
}

pub fn mks_serial_settings() -> SerialSettings {
    SerialSettings::eight_n_one(9600)
}

// ---------------------------------------------------------------------------
// Lesker 392
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeskerCommand {
    /// System pressure
    ReadSystem,
    /// Ion gauge pressure
    ReadIonGauge,
    ReadConvectron1,
    ReadConvectron2,
    IonGaugeOn,
    IonGaugeOff,
}

impl CommandSet for LeskerCommand {
    const ALL: &'static [Self] = &[
        LeskerCommand::ReadSystem,
        LeskerCommand::ReadIonGauge,
        LeskerCommand::ReadConvectron1,
        LeskerCommand::ReadConvectron2,
        LeskerCommand::IonGaugeOn,
        LeskerCommand::IonGaugeOff,
    ];

    fn spec(self) -> CommandSpec {
        let name = match self {
            LeskerCommand::ReadSystem => "#01RDS",
            LeskerCommand::ReadIonGauge => "#01RD",
            LeskerCommand::ReadConvectron1 => "#01RDCG1",
            LeskerCommand::ReadConvectron2 => "#01RDCG2",
            LeskerCommand::IonGaugeOn => "#01IG1",
            LeskerCommand::IonGaugeOff => "#01IG0",
        };
        CommandSpec::new(name, false, ResponseMode::Lines(1))
    }
}

/// Addressed ion gauge controller; replies look like `*01 1.23E-06`
pub struct Lesker392<T: Transport> {
    instrument: Instrument<T>,
}

impl<T: Transport> Lesker392<T> {
    pub fn profile() -> DeviceProfile {
        DeviceProfile::new::<LeskerCommand>("lesker392", Terminator::Cr, ArgumentStyle::Equals)
    }

    pub fn new(transport: T) -> Self {
        Self::with_profile(transport, Self::profile())
    }

    pub fn with_profile(transport: T, profile: DeviceProfile) -> Self {
        Self {
            instrument: Instrument::new(transport, profile),
        }
    }

    pub fn connect(transport: T) -> Result<Self> {
        let lesker = Self::new(transport);
        lesker.instrument.handshake()?;
        Ok(lesker)
    }

    fn read(&self, command: LeskerCommand) -> Result<f64> {
        let response = self.instrument.query(command.name(), None)?;
        let line = value_line(command.name(), &response)?;
        let value = line.split_whitespace().last().unwrap_or_default();
        parse_field(command.name(), value)
    }

    /// System pressure (mbar)
    pub fn pressure(&self) -> Result<f64> {
        self.read(LeskerCommand::ReadSystem)
    }

    pub fn pressure_ion_gauge(&self) -> Result<f64> {
        self.read(LeskerCommand::ReadIonGauge)
    }

    pub fn pressure_cg1(&self) -> Result<f64> {
        self.read(LeskerCommand::ReadConvectron1)
    }

    pub fn pressure_cg2(&self) -> Result<f64> {
        self.read(LeskerCommand::ReadConvectron2)
    }

    pub fn set_ion_gauge(&self, on: bool) -> Result<String> {
        let command = if on { LeskerCommand::IonGaugeOn } else { LeskerCommand::IonGaugeOff };
        let response = self.instrument.query(command.name(), None)?;
        Ok(response.text())
    }
}

impl<T: Transport> Housekeeping for Lesker392<T> {
    fn name(&self) -> &str {
        self.instrument.profile().name
    }

    fn identity(&self) -> Identity {
        self.instrument.identity()
    }

    fn query(&self, command: &str, argument: Option<&str>) -> Result<RawResponse> {
        self.instrument.query(command, argument)
    }

    fn log_dict(&self) -> Result<LogDict> {
        Ok(LogDict::from([("lesker392_pressure_mbar".to_string(), self.pressure()?)]))
    }
}

// ---------------------------------------------------------------------------
// Pfeiffer dual gauge
// ---------------------------------------------------------------------------

const ACK: &str = "\u{6}";
const NAK: &str = "\u{15}";
const ENQ: &str = "\u{5}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfeifferCommand {
    Pressure1,
    Pressure2,
}

impl CommandSet for PfeifferCommand {
    const ALL: &'static [Self] = &[PfeifferCommand::Pressure1, PfeifferCommand::Pressure2];

    fn spec(self) -> CommandSpec {
        match self {
            PfeifferCommand::Pressure1 => CommandSpec::new("PR1", false, ResponseMode::Lines(1)),
            PfeifferCommand::Pressure2 => CommandSpec::new("PR2", false, ResponseMode::Lines(1)),
        }
    }
}

/// Measurement status preceding every pressure value
pub static PFEIFFER_STATUS: ErrorCodeTable = ErrorCodeTable {
    entries: &[
        ("1", "Underrange"),
        ("2", "Overrange"),
        ("3", "Sensor error"),
        ("4", "Sensor off"),
        ("5", "No sensor"),
        ("6", "Identification error"),
    ],
};

/// Parse `status,value` as sent after an enquiry
pub fn parse_pfeiffer_reading(command: &str, line: &str) -> Result<f64> {
    let (status, value) = line
        .split_once(',')
        .ok_or_else(|| InstrumentError::invalid_response(command, format!("{:?} has no status field", line)))?;
    PFEIFFER_STATUS.check(status)?;
    parse_field(command, value)
}

/// Two-channel gauge controller
///
/// A command is acknowledged with ACK, and the data is only sent after the
/// host writes ENQ.
pub struct PfeifferDualGauge<T: Transport> {
    instrument: Instrument<T>,
}

impl<T: Transport> PfeifferDualGauge<T> {
    pub fn profile() -> DeviceProfile {
        DeviceProfile::new::<PfeifferCommand>("pfeiffer", Terminator::CrLf, ArgumentStyle::Equals)
    }

    pub fn new(transport: T) -> Self {
        Self::with_profile(transport, Self::profile())
    }

    pub fn with_profile(transport: T, profile: DeviceProfile) -> Self {
        Self {
            instrument: Instrument::new(transport, profile),
        }
    }

    pub fn connect(transport: T) -> Result<Self> {
        let gauge = Self::new(transport);
        gauge.instrument.handshake()?;
        Ok(gauge)
    }

    /// Command, ACK, ENQ, data line: all under one lock
    fn transact(&self, command: &str, argument: Option<&str>) -> Result<RawResponse> {
        let mut exchange = self.instrument.lock();
        let acknowledgement = exchange.query(command, argument)?;
        match acknowledgement.last_line() {
            Some(ACK) => {}
            Some(NAK) => {
                return Err(InstrumentError::Device {
                    message: format!("{} not acknowledged", command),
                    code: "NAK".to_string(),
                });
            }
            other => {
                return Err(InstrumentError::invalid_response(
                    command,
                    format!("expected ACK, got {:?}", other),
                ));
            }
        }
        let enquiry = exchange.profile().encode(ENQ, None);
        exchange.write_frame(&enquiry)?;
        exchange.read_lines(command, 1)
    }

    /// Pressure of gauge 1 or 2 (mbar)
    pub fn pressure(&self, gauge: u8) -> Result<f64> {
        let command = match gauge {
            1 => PfeifferCommand::Pressure1,
            2 => PfeifferCommand::Pressure2,
            other => return Err(InstrumentError::UnknownCommand(format!("PR{}", other))),
        };
        let response = self.transact(command.name(), None)?;
        parse_pfeiffer_reading(command.name(), value_line(command.name(), &response)?)
    }
}

impl<T: Transport> Housekeeping for PfeifferDualGauge<T> {
    fn name(&self) -> &str {
        self.instrument.profile().name
    }

    fn identity(&self) -> Identity {
        self.instrument.identity()
    }

    fn query(&self, command: &str, argument: Option<&str>) -> Result<RawResponse> {
        self.transact(command, argument)
    }

    fn log_dict(&self) -> Result<LogDict> {
        Ok(LogDict::from([("pfeiffer_gauge1_mbar".to_string(), self.pressure(1)?)]))
    }
}

// ---------------------------------------------------------------------------
// MKS 392B over RS485
// ---------------------------------------------------------------------------

pub const MKS_DEFAULT_ADDRESS: u16 = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MksCommand {
    Pressure1,
    Pressure2,
    Pressure3,
    Units,
}

impl CommandSet for MksCommand {
    const ALL: &'static [Self] = &[
        MksCommand::Pressure1,
        MksCommand::Pressure2,
        MksCommand::Pressure3,
        MksCommand::Units,
    ];

    fn spec(self) -> CommandSpec {
        let name = match self {
            MksCommand::Pressure1 => "PR1?",
            MksCommand::Pressure2 => "PR2?",
            MksCommand::Pressure3 => "PR3?",
            MksCommand::Units => "U?",
        };
        CommandSpec::new(name, false, ResponseMode::Lines(1))
    }
}

/// Payload of `@<addr>ACK<payload>;FF`; a NAK reply becomes a device error
pub fn parse_mks_reply(command: &str, line: &str) -> Result<String> {
    let body = line.trim_end_matches(";FF");
    let body = body
        .strip_prefix('@')
        .map(|rest| rest.trim_start_matches(|c: char| c.is_ascii_digit()))
        .unwrap_or(body);
    if let Some(payload) = body.strip_prefix("ACK") {
        Ok(payload.to_string())
    } else if let Some(code) = body.strip_prefix("NAK") {
        Err(InstrumentError::Device {
            message: format!("{} rejected by gauge", command),
            code: code.to_string(),
        })
    } else {
        Err(InstrumentError::invalid_response(command, format!("{:?} is neither ACK nor NAK", line)))
    }
}

/// Addressed gauge on an RS485 bus: `@253PR1?;FF`
pub struct Mks392b<T: Transport> {
    instrument: Instrument<T>,
    address: u16,
}

impl<T: Transport> Mks392b<T> {
    pub fn profile() -> DeviceProfile {
        DeviceProfile::new::<MksCommand>("mks392b", Terminator::FormFeed, ArgumentStyle::Equals)
    }

    pub fn new(transport: T, address: u16) -> Self {
        Self::with_profile(transport, address, Self::profile())
    }

    pub fn with_profile(transport: T, address: u16, profile: DeviceProfile) -> Self {
        Self {
            instrument: Instrument::new(transport, profile),
            address,
        }
    }

    pub fn connect(transport: T, address: u16) -> Result<Self> {
        let gauge = Self::new(transport, address);
        gauge.instrument.handshake()?;
        Ok(gauge)
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    fn transact(&self, command: &str, argument: Option<&str>) -> Result<String> {
        let mut exchange = self.instrument.lock();
        let spec = *exchange.profile().commands.lookup(command)?;
        if let Some(argument) = argument {
            warn!("{} command does not accept arguments, dropping argument {:?}", spec.name, argument);
        }
        let frame = exchange
            .profile()
            .encode(&format!("@{:03}{};FF", self.address, spec.name), None);
        exchange.write_frame(&frame)?;
        let response = exchange.read_lines(spec.name, 1)?;
        debug!("MKS {} reply {:?}", spec.name, response.lines);
        parse_mks_reply(spec.name, value_line(spec.name, &response)?)
    }

    pub fn pressure(&self, channel: u8) -> Result<f64> {
        let command = match channel {
            1 => MksCommand::Pressure1,
            2 => MksCommand::Pressure2,
            3 => MksCommand::Pressure3,
            other => return Err(InstrumentError::UnknownCommand(format!("PR{}?", other))),
        };
        parse_field(command.name(), &self.transact(command.name(), None)?)
    }

    pub fn units(&self) -> Result<String> {
        self.transact(MksCommand::Units.name(), None)
    }
}

impl<T: Transport> Housekeeping for Mks392b<T> {
    fn name(&self) -> &str {
        self.instrument.profile().name
    }

    fn identity(&self) -> Identity {
        self.instrument.identity()
    }

    fn query(&self, command: &str, argument: Option<&str>) -> Result<RawResponse> {
        Ok(RawResponse::new(vec![self.transact(command, argument)?]))
    }

    fn log_dict(&self) -> Result<LogDict> {
        Ok(LogDict::from([("mks392b_pressure1".to_string(), self.pressure(1)?)]))
    }
}
