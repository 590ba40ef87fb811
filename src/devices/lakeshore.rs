// Lakeshore temperature monitors and controllers (218, 325, 331)
//
// IEEE-488.2 style: one reply line per query, no reply to settings, and a
// Standard Event Status Register that reports rejected commands. Settings are
// followed by an `*ESR?` check so a bad command surfaces as a device error.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::{debug, info};

use super::{parse_field, parse_list, value_line, Housekeeping, LogDict};
use crate::instrument::register::{READING_STATUS, SERVICE_REQUEST, STANDARD_EVENT, STATUS_BYTE};
use crate::instrument::{
    ArgumentStyle, CommandSet, CommandSpec, DeviceProfile, Exchange, Identity, IdentityQuery, Instrument,
    InstrumentError, RawResponse, RegisterBitfield, RegisterLayout, ResponseMode, Result, Terminator,
};
use crate::transport::{SerialSettings, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LakeshoreCommand {
    Identify,
    ClearInterface,
    Reset,
    EventStatus,
    EventEnable,
    EventEnableQuery,
    ServiceRequest,
    ServiceRequestQuery,
    StatusByte,
    OperationComplete,
    KelvinReading,
    CelsiusReading,
    SensorReading,
    ReadingStatus,
    Setpoint,
    SetpointQuery,
    HeaterOutput,
    HeaterStatus,
    HeaterRange,
    HeaterRangeQuery,
    Pid,
    PidQuery,
    Ramp,
    RampQuery,
    RampStatus,
    AlarmParameters,
    AlarmParametersQuery,
    AlarmStatus,
    AlarmReset,
    Relay,
    RelayStatus,
    AnalogOutput,
    InputControl,
    InputControlQuery,
    DateTime,
    DateTimeQuery,
}

impl CommandSet for LakeshoreCommand {
    const ALL: &'static [Self] = &[
        LakeshoreCommand::Identify,
        LakeshoreCommand::ClearInterface,
        LakeshoreCommand::Reset,
        LakeshoreCommand::EventStatus,
        LakeshoreCommand::EventEnable,
        LakeshoreCommand::EventEnableQuery,
        LakeshoreCommand::ServiceRequest,
        LakeshoreCommand::ServiceRequestQuery,
        LakeshoreCommand::StatusByte,
        LakeshoreCommand::OperationComplete,
        LakeshoreCommand::KelvinReading,
        LakeshoreCommand::CelsiusReading,
        LakeshoreCommand::SensorReading,
        LakeshoreCommand::ReadingStatus,
        LakeshoreCommand::Setpoint,
        LakeshoreCommand::SetpointQuery,
        LakeshoreCommand::HeaterOutput,
        LakeshoreCommand::HeaterStatus,
        LakeshoreCommand::HeaterRange,
        LakeshoreCommand::HeaterRangeQuery,
        LakeshoreCommand::Pid,
        LakeshoreCommand::PidQuery,
        LakeshoreCommand::Ramp,
        LakeshoreCommand::RampQuery,
        LakeshoreCommand::RampStatus,
        LakeshoreCommand::AlarmParameters,
        LakeshoreCommand::AlarmParametersQuery,
        LakeshoreCommand::AlarmStatus,
        LakeshoreCommand::AlarmReset,
        LakeshoreCommand::Relay,
        LakeshoreCommand::RelayStatus,
        LakeshoreCommand::AnalogOutput,
        LakeshoreCommand::InputControl,
        LakeshoreCommand::InputControlQuery,
        LakeshoreCommand::DateTime,
        LakeshoreCommand::DateTimeQuery,
    ];

    fn spec(self) -> CommandSpec {
        use LakeshoreCommand as C;
        use ResponseMode::{Lines, Silent};
        match self {
            C::Identify => CommandSpec::new("*IDN?", false, Lines(1)),
            C::ClearInterface => CommandSpec::new("*CLS", false, Silent),
            C::Reset => CommandSpec::new("*RST", false, Silent),
            C::EventStatus => CommandSpec::new("*ESR?", false, Lines(1)),
            C::EventEnable => CommandSpec::new("*ESE", true, Silent),
            C::EventEnableQuery => CommandSpec::new("*ESE?", false, Lines(1)),
            C::ServiceRequest => CommandSpec::new("*SRE", true, Silent),
            C::ServiceRequestQuery => CommandSpec::new("*SRE?", false, Lines(1)),
            C::StatusByte => CommandSpec::new("*STB?", false, Lines(1)),
            C::OperationComplete => CommandSpec::new("*OPC?", false, Lines(1)),
            C::KelvinReading => CommandSpec::new("KRDG?", true, Lines(1)),
            C::CelsiusReading => CommandSpec::new("CRDG?", true, Lines(1)),
            C::SensorReading => CommandSpec::new("SRDG?", true, Lines(1)),
            C::ReadingStatus => CommandSpec::new("RDGST?", true, Lines(1)),
            C::Setpoint => CommandSpec::new("SETP", true, Silent),
            C::SetpointQuery => CommandSpec::new("SETP?", true, Lines(1)),
            C::HeaterOutput => CommandSpec::new("HTR?", true, Lines(1)),
            C::HeaterStatus => CommandSpec::new("HTRST?", true, Lines(1)),
            C::HeaterRange => CommandSpec::new("RANGE", true, Silent),
            C::HeaterRangeQuery => CommandSpec::new("RANGE?", true, Lines(1)),
            C::Pid => CommandSpec::new("PID", true, Silent),
            C::PidQuery => CommandSpec::new("PID?", true, Lines(1)),
            C::Ramp => CommandSpec::new("RAMP", true, Silent),
            C::RampQuery => CommandSpec::new("RAMP?", true, Lines(1)),
            C::RampStatus => CommandSpec::new("RAMPST?", true, Lines(1)),
            C::AlarmParameters => CommandSpec::new("ALARM", true, Silent),
            C::AlarmParametersQuery => CommandSpec::new("ALARM?", true, Lines(1)),
            C::AlarmStatus => CommandSpec::new("ALARMST?", true, Lines(1)),
            C::AlarmReset => CommandSpec::new("ALMRST", false, Silent),
            C::Relay => CommandSpec::new("RELAY", true, Silent),
            C::RelayStatus => CommandSpec::new("RELAYST?", true, Lines(1)),
            C::AnalogOutput => CommandSpec::new("AOUT?", true, Lines(1)),
            C::InputControl => CommandSpec::new("INPUT", true, Silent),
            C::InputControlQuery => CommandSpec::new("INPUT?", true, Lines(1)),
            C::DateTime => CommandSpec::new("DATETIME", true, Silent),
            C::DateTimeQuery => CommandSpec::new("DATETIME?", false, Lines(1)),
        }
    }
}

pub fn serial_settings() -> SerialSettings {
    SerialSettings::seven_o_one(9600)
}

/// Supported models and what each one can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LakeshoreModel {
    /// 8-input monitor
    Model218,
    /// 2-input controller
    Model325,
    /// 2-input controller with an analog second output
    Model331,
}

impl LakeshoreModel {
    pub fn name(self) -> &'static str {
        match self {
            LakeshoreModel::Model218 => "lakeshore218",
            LakeshoreModel::Model325 => "lakeshore325",
            LakeshoreModel::Model331 => "lakeshore331",
        }
    }

    /// Input channel names, in display order
    pub fn inputs(self) -> &'static [&'static str] {
        match self {
            LakeshoreModel::Model218 => &["1", "2", "3", "4", "5", "6", "7", "8"],
            LakeshoreModel::Model325 | LakeshoreModel::Model331 => &["A", "B"],
        }
    }

    pub fn has_heater(self) -> bool {
        !matches!(self, LakeshoreModel::Model218)
    }

    pub fn has_alarms(self) -> bool {
        !matches!(self, LakeshoreModel::Model325)
    }

    pub fn has_relays(self) -> bool {
        !matches!(self, LakeshoreModel::Model325)
    }

    /// Reads every input at once with channel `0`
    pub fn reads_all_at_once(self) -> bool {
        matches!(self, LakeshoreModel::Model218)
    }

    pub fn profile(self) -> DeviceProfile {
        DeviceProfile::new::<LakeshoreCommand>(self.name(), Terminator::CrLf, ArgumentStyle::Space)
            .with_identity(IdentityQuery::Idn)
    }
}

/// Heater power range of a control output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaterRange {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl HeaterRange {
    fn from_code(command: &str, code: u8) -> Result<Self> {
        match code {
            0 => Ok(HeaterRange::Off),
            1 => Ok(HeaterRange::Low),
            2 => Ok(HeaterRange::Medium),
            3 => Ok(HeaterRange::High),
            other => Err(InstrumentError::invalid_response(command, format!("heater range {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidSettings {
    pub gain: f64,
    pub integral: f64,
    pub derivative: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RampSettings {
    pub enabled: bool,
    /// K/min
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmState {
    pub input: String,
    pub high_state: bool,
    pub low_state: bool,
}

/// Alarm configuration of one input (`ALARM`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlarmParameters {
    pub enabled: bool,
    /// 1 kelvin, 2 celsius, 3 sensor units, 4 linear data
    pub source: u8,
    pub high_value: f64,
    pub low_value: f64,
    pub deadband: f64,
    pub latch_enable: bool,
    pub audible: bool,
    pub visible: bool,
}

impl AlarmParameters {
    /// All-zero settings of a disabled alarm
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            source: 0,
            high_value: 0.0,
            low_value: 0.0,
            deadband: 0.0,
            latch_enable: false,
            audible: false,
            visible: false,
        }
    }

    fn argument(&self, input: &str) -> String {
        let settings = if self.enabled { *self } else { Self::disabled() };
        format!(
            "{},{},{},{},{},{},{},{},{}",
            input.to_uppercase(),
            u8::from(self.enabled),
            settings.source,
            settings.high_value,
            settings.low_value,
            settings.deadband,
            u8::from(settings.latch_enable),
            u8::from(settings.audible),
            u8::from(settings.visible)
        )
    }

    /// `enabled,source,high,low,deadband,latch[,audible,visible]`
    fn parse(text: &str) -> Result<Self> {
        let fields = parse_list::<f64>("ALARM?", text)?;
        let flag = |index: usize| fields.get(index).is_some_and(|&value| value != 0.0);
        if fields.len() < 6 {
            return Err(InstrumentError::invalid_response("ALARM?", format!("{:?}", text)));
        }
        Ok(Self {
            enabled: flag(0),
            source: fields[1] as u8,
            high_value: fields[2],
            low_value: fields[3],
            deadband: fields[4],
            latch_enable: flag(5),
            audible: flag(6),
            visible: flag(7),
        })
    }
}

/// Alarm condition that drives a relay in alarm mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAlarmTrigger {
    Low = 0,
    High = 1,
    Both = 2,
}

/// Parse a `DATETIME?` reply, `MM,DD,YY,HH,mm,SS`
///
/// A two-digit year later than the current one (`current_year % 100`) is in
/// the 1900s, anything else in the 2000s.
pub fn parse_device_clock(command: &str, text: &str, current_year: i32) -> Result<NaiveDateTime> {
    let invalid = || InstrumentError::invalid_response(command, format!("{:?} is not a date/time", text));
    let fields: Vec<u32> = parse_list::<f64>(command, text)?
        .into_iter()
        .map(|value| value as u32)
        .collect();
    let &[month, day, year, hour, minute, second] = fields.as_slice() else {
        return Err(invalid());
    };
    let year = year as i32;
    let century = if year > current_year.rem_euclid(100) { 1900 } else { 2000 };
    NaiveDate::from_ymd_opt(century + year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or_else(invalid)
}

/// `DATETIME` argument for a clock setting
pub fn device_clock_argument(date_time: &NaiveDateTime) -> String {
    format!(
        "{},{},{:02},{},{},{}",
        date_time.month(),
        date_time.day(),
        date_time.year().rem_euclid(100),
        date_time.hour(),
        date_time.minute(),
        date_time.second()
    )
}

/// Fail with a device error when the event register flags a rejected command
pub fn check_event_register(event: &RegisterBitfield) -> Result<()> {
    let failures = [
        ("query_error", "Query error"),
        ("command_error", "Command error: invalid command or query"),
        ("execution_error", "Execution error: instrument not able to execute command or query"),
    ];
    match failures.iter().find(|(bit, _)| event.is_set(bit)) {
        Some((_, message)) => Err(InstrumentError::Device {
            message: message.to_string(),
            code: event.to_integer().to_string(),
        }),
        None => Ok(()),
    }
}

pub struct Lakeshore<T: Transport> {
    instrument: Instrument<T>,
    model: LakeshoreModel,
}

impl<T: Transport> Lakeshore<T> {
    pub fn new(transport: T, model: LakeshoreModel) -> Self {
        Self::with_profile(transport, model, model.profile())
    }

    pub fn with_profile(transport: T, model: LakeshoreModel, profile: DeviceProfile) -> Self {
        Self {
            instrument: Instrument::new(transport, profile),
            model,
        }
    }

    pub fn connect(transport: T, model: LakeshoreModel) -> Result<Self> {
        let lakeshore = Self::new(transport, model);
        lakeshore.instrument.handshake()?;
        let identity = lakeshore.instrument.identity();
        info!("{} identifies as {}", model.name(), identity.serial_string);
        Ok(lakeshore)
    }

    pub fn model(&self) -> LakeshoreModel {
        self.model
    }

    pub fn instrument(&self) -> &Instrument<T> {
        &self.instrument
    }

    fn ask(&self, command: LakeshoreCommand, argument: Option<&str>) -> Result<String> {
        let response = self.instrument.query(command.name(), argument)?;
        Ok(value_line(command.name(), &response)?.to_string())
    }

    fn ask_f64(&self, command: LakeshoreCommand, argument: Option<&str>) -> Result<f64> {
        parse_field(command.name(), &self.ask(command, argument)?)
    }

    fn ask_register(
        &self,
        command: LakeshoreCommand,
        layout: &'static RegisterLayout,
        argument: Option<&str>,
    ) -> Result<RegisterBitfield> {
        layout.parse(&self.ask(command, argument)?)
    }

    /// Send a setting, then read back `*ESR?` under the same lock
    fn send(&self, command: LakeshoreCommand, argument: Option<&str>) -> Result<()> {
        let mut exchange = self.instrument.lock();
        exchange.command(command.name(), argument)?;
        check_after_command(&mut exchange)
    }

    fn require(&self, supported: bool, command: LakeshoreCommand) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(InstrumentError::UnknownCommand(format!(
                "{} on {}",
                command.name(),
                self.model.name()
            )))
        }
    }

    pub fn clear_interface(&self) -> Result<()> {
        self.instrument.command(LakeshoreCommand::ClearInterface.name(), None)
    }

    pub fn reset_instrument(&self) -> Result<()> {
        self.instrument.command(LakeshoreCommand::Reset.name(), None)
    }

    /// Read and clear the Standard Event Status Register
    pub fn standard_event_status(&self) -> Result<RegisterBitfield> {
        self.ask_register(LakeshoreCommand::EventStatus, &STANDARD_EVENT, None)
    }

    pub fn standard_event_enable_mask(&self) -> Result<RegisterBitfield> {
        self.ask_register(LakeshoreCommand::EventEnableQuery, &STANDARD_EVENT, None)
    }

    pub fn set_standard_event_enable_mask(&self, mask: &RegisterBitfield) -> Result<()> {
        self.send(LakeshoreCommand::EventEnable, Some(&mask.to_integer().to_string()))
    }

    pub fn service_request(&self) -> Result<RegisterBitfield> {
        self.ask_register(LakeshoreCommand::ServiceRequestQuery, &SERVICE_REQUEST, None)
    }

    pub fn set_service_request(&self, mask: &RegisterBitfield) -> Result<()> {
        self.send(LakeshoreCommand::ServiceRequest, Some(&mask.to_integer().to_string()))
    }

    /// Status byte, without clearing it
    pub fn status_byte(&self) -> Result<RegisterBitfield> {
        self.ask_register(LakeshoreCommand::StatusByte, &STATUS_BYTE, None)
    }

    pub fn operation_complete(&self) -> Result<bool> {
        Ok(parse_field::<u8>("*OPC?", &self.ask(LakeshoreCommand::OperationComplete, None)?)? == 1)
    }

    pub fn kelvin_reading(&self, input: &str) -> Result<f64> {
        self.ask_f64(LakeshoreCommand::KelvinReading, Some(input))
    }

    /// Every input in one query (218 only; other models are read per input)
    pub fn kelvin_reading_all(&self) -> Result<Vec<f64>> {
        self.reading_all(LakeshoreCommand::KelvinReading)
    }

    pub fn celsius_reading(&self, input: &str) -> Result<f64> {
        self.ask_f64(LakeshoreCommand::CelsiusReading, Some(input))
    }

    pub fn celsius_reading_all(&self) -> Result<Vec<f64>> {
        self.reading_all(LakeshoreCommand::CelsiusReading)
    }

    fn reading_all(&self, command: LakeshoreCommand) -> Result<Vec<f64>> {
        if self.model.reads_all_at_once() {
            let reply = self.ask(command, Some("0"))?;
            let values: Vec<f64> = parse_list(command.name(), &reply)?;
            if values.len() != self.model.inputs().len() {
                return Err(InstrumentError::invalid_response(
                    command.name(),
                    format!("expected {} readings, got {:?}", self.model.inputs().len(), reply),
                ));
            }
            Ok(values)
        } else {
            self.model
                .inputs()
                .iter()
                .map(|input| self.ask_f64(command, Some(input)))
                .collect()
        }
    }

    /// Raw sensor units (ohms or volts)
    pub fn sensor_reading(&self, input: &str) -> Result<f64> {
        self.ask_f64(LakeshoreCommand::SensorReading, Some(input))
    }

    pub fn reading_status(&self, input: &str) -> Result<RegisterBitfield> {
        self.ask_register(LakeshoreCommand::ReadingStatus, &READING_STATUS, Some(input))
    }

    pub fn setpoint(&self, output: u8) -> Result<f64> {
        self.require(self.model.has_heater(), LakeshoreCommand::SetpointQuery)?;
        self.ask_f64(LakeshoreCommand::SetpointQuery, Some(&output.to_string()))
    }

    pub fn set_setpoint(&self, output: u8, value: f64) -> Result<()> {
        self.require(self.model.has_heater(), LakeshoreCommand::Setpoint)?;
        self.send(LakeshoreCommand::Setpoint, Some(&format!("{},{}", output, value)))
    }

    /// Heater output in percent
    ///
    /// On the 331 output 1 is the heater and output 2 the analog output, both
    /// queried without an argument.
    pub fn heater_output(&self, output: u8) -> Result<f64> {
        self.require(self.model.has_heater(), LakeshoreCommand::HeaterOutput)?;
        match (self.model, output) {
            (LakeshoreModel::Model331, 1) => self.ask_f64(LakeshoreCommand::HeaterOutput, None),
            (LakeshoreModel::Model331, 2) => self.ask_f64(LakeshoreCommand::AnalogOutput, None),
            (LakeshoreModel::Model331, other) => Err(InstrumentError::UnknownCommand(format!(
                "HTR? {} on {}",
                other,
                self.model.name()
            ))),
            _ => self.ask_f64(LakeshoreCommand::HeaterOutput, Some(&output.to_string())),
        }
    }

    /// Heater error code, 0 when the heater is fine
    pub fn heater_status(&self, output: u8) -> Result<u8> {
        self.require(self.model.has_heater(), LakeshoreCommand::HeaterStatus)?;
        let reply = self.ask(LakeshoreCommand::HeaterStatus, Some(&output.to_string()))?;
        parse_field("HTRST?", &reply)
    }

    pub fn heater_range(&self, output: u8) -> Result<HeaterRange> {
        self.require(self.model.has_heater(), LakeshoreCommand::HeaterRangeQuery)?;
        let reply = self.ask(LakeshoreCommand::HeaterRangeQuery, Some(&output.to_string()))?;
        HeaterRange::from_code("RANGE?", parse_field("RANGE?", &reply)?)
    }

    pub fn set_heater_range(&self, output: u8, range: HeaterRange) -> Result<()> {
        self.require(self.model.has_heater(), LakeshoreCommand::HeaterRange)?;
        self.send(LakeshoreCommand::HeaterRange, Some(&format!("{},{}", output, range as u8)))
    }

    pub fn heater_pid(&self, output: u8) -> Result<PidSettings> {
        self.require(self.model.has_heater(), LakeshoreCommand::PidQuery)?;
        let reply = self.ask(LakeshoreCommand::PidQuery, Some(&output.to_string()))?;
        match parse_list::<f64>("PID?", &reply)?.as_slice() {
            &[gain, integral, derivative] => Ok(PidSettings {
                gain,
                integral,
                derivative,
            }),
            _ => Err(InstrumentError::invalid_response("PID?", format!("{:?}", reply))),
        }
    }

    pub fn set_heater_pid(&self, output: u8, pid: PidSettings) -> Result<()> {
        self.require(self.model.has_heater(), LakeshoreCommand::Pid)?;
        let argument = format!("{},{},{},{}", output, pid.gain, pid.integral, pid.derivative);
        self.send(LakeshoreCommand::Pid, Some(&argument))
    }

    pub fn setpoint_ramp(&self, output: u8) -> Result<RampSettings> {
        self.require(self.model.has_heater(), LakeshoreCommand::RampQuery)?;
        let reply = self.ask(LakeshoreCommand::RampQuery, Some(&output.to_string()))?;
        match parse_list::<f64>("RAMP?", &reply)?.as_slice() {
            &[enabled, rate] => Ok(RampSettings {
                enabled: enabled != 0.0,
                rate,
            }),
            _ => Err(InstrumentError::invalid_response("RAMP?", format!("{:?}", reply))),
        }
    }

    pub fn set_setpoint_ramp(&self, output: u8, ramp: RampSettings) -> Result<()> {
        self.require(self.model.has_heater(), LakeshoreCommand::Ramp)?;
        let argument = format!("{},{},{}", output, u8::from(ramp.enabled), ramp.rate);
        self.send(LakeshoreCommand::Ramp, Some(&argument))
    }

    /// Whether the setpoint is currently ramping
    pub fn setpoint_ramp_status(&self, output: u8) -> Result<bool> {
        self.require(self.model.has_heater(), LakeshoreCommand::RampStatus)?;
        let reply = self.ask(LakeshoreCommand::RampStatus, Some(&output.to_string()))?;
        Ok(parse_field::<u8>("RAMPST?", &reply)? == 1)
    }

    pub fn alarm_status(&self, input: &str) -> Result<AlarmState> {
        self.require(self.model.has_alarms(), LakeshoreCommand::AlarmStatus)?;
        let reply = self.ask(LakeshoreCommand::AlarmStatus, Some(input))?;
        match parse_list::<u8>("ALARMST?", &reply)?.as_slice() {
            &[high, low] => Ok(AlarmState {
                input: input.to_string(),
                high_state: high != 0,
                low_state: low != 0,
            }),
            _ => Err(InstrumentError::invalid_response("ALARMST?", format!("{:?}", reply))),
        }
    }

    pub fn reset_alarm_status(&self) -> Result<()> {
        self.require(self.model.has_alarms(), LakeshoreCommand::AlarmReset)?;
        self.send(LakeshoreCommand::AlarmReset, None)
    }

    pub fn alarm_parameters(&self, input: &str) -> Result<AlarmParameters> {
        self.require(self.model.has_alarms(), LakeshoreCommand::AlarmParametersQuery)?;
        AlarmParameters::parse(&self.ask(LakeshoreCommand::AlarmParametersQuery, Some(input))?)
    }

    /// Configure an input's alarm; a disabled alarm is written with zeroed settings
    pub fn set_alarm_parameters(&self, input: &str, parameters: &AlarmParameters) -> Result<()> {
        self.require(self.model.has_alarms(), LakeshoreCommand::AlarmParameters)?;
        self.send(LakeshoreCommand::AlarmParameters, Some(&parameters.argument(input)))
    }

    pub fn relay_status(&self, relay: u8) -> Result<bool> {
        self.require(self.model.has_relays(), LakeshoreCommand::RelayStatus)?;
        let reply = self.ask(LakeshoreCommand::RelayStatus, Some(&relay.to_string()))?;
        Ok(parse_field::<u8>("RELAYST?", &reply)? == 1)
    }

    pub fn turn_relay_on(&self, relay: u8) -> Result<()> {
        self.set_relay(&format!("{},1,0,0", relay))
    }

    pub fn turn_relay_off(&self, relay: u8) -> Result<()> {
        self.set_relay(&format!("{},0,0,0", relay))
    }

    /// Let `input`'s alarm switch the relay
    pub fn set_relay_alarms(&self, relay: u8, input: &str, trigger: RelayAlarmTrigger) -> Result<()> {
        self.set_relay(&format!("{},2,{},{}", relay, input.to_uppercase(), trigger as u8))
    }

    fn set_relay(&self, argument: &str) -> Result<()> {
        self.require(self.model.has_relays(), LakeshoreCommand::Relay)?;
        self.send(LakeshoreCommand::Relay, Some(argument))
    }

    pub fn input_control(&self, input: &str) -> Result<bool> {
        self.require(self.model == LakeshoreModel::Model218, LakeshoreCommand::InputControlQuery)?;
        let reply = self.ask(LakeshoreCommand::InputControlQuery, Some(input))?;
        Ok(parse_field::<u8>("INPUT?", &reply)? == 1)
    }

    pub fn set_input_control(&self, input: &str, enabled: bool) -> Result<()> {
        self.require(self.model == LakeshoreModel::Model218, LakeshoreCommand::InputControl)?;
        let argument = format!("{},{}", input, u8::from(enabled));
        self.send(LakeshoreCommand::InputControl, Some(&argument))
    }

    pub fn date_time(&self) -> Result<NaiveDateTime> {
        self.require(self.model == LakeshoreModel::Model218, LakeshoreCommand::DateTimeQuery)?;
        let reply = self.ask(LakeshoreCommand::DateTimeQuery, None)?;
        parse_device_clock("DATETIME?", &reply, Local::now().year())
    }

    /// Set the instrument clock, to the local time when `date_time` is `None`
    pub fn set_date_time(&self, date_time: Option<NaiveDateTime>) -> Result<()> {
        self.require(self.model == LakeshoreModel::Model218, LakeshoreCommand::DateTime)?;
        let date_time = date_time.unwrap_or_else(|| Local::now().naive_local());
        self.send(LakeshoreCommand::DateTime, Some(&device_clock_argument(&date_time)))
    }
}

fn check_after_command<T: Transport>(exchange: &mut Exchange<'_, T, ()>) -> Result<()> {
    let reply = exchange.query(LakeshoreCommand::EventStatus.name(), None)?;
    let event = STANDARD_EVENT.parse(value_line("*ESR?", &reply)?)?;
    debug!("Event register after command: {:?}", event.set_bits().collect::<Vec<_>>());
    check_event_register(&event)
}

impl<T: Transport> Housekeeping for Lakeshore<T> {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn identity(&self) -> Identity {
        self.instrument.identity()
    }

    fn query(&self, command: &str, argument: Option<&str>) -> Result<RawResponse> {
        self.instrument.query(command, argument)
    }

    fn log_dict(&self) -> Result<LogDict> {
        let name = self.model.name();
        let mut readings: LogDict = self
            .model
            .inputs()
            .iter()
            .zip(self.kelvin_reading_all()?)
            .map(|(input, kelvin)| (format!("{}_temp{}_k", name, input.to_lowercase()), kelvin))
            .collect();
        if self.model.has_heater() {
            readings.insert(format!("{}_heater1_percent", name), self.heater_output(1)?);
            readings.insert(format!("{}_setpoint1_k", name), self.setpoint(1)?);
        }
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn lakeshore(mock: &MockTransport, model: LakeshoreModel) -> Lakeshore<MockTransport> {
        let profile = model.profile().with_read_timeout(Duration::ZERO);
        Lakeshore::with_profile(mock.clone(), model, profile)
    }

    #[test]
    fn test_kelvin_reading_space_argument() {
        let mock = MockTransport::new();
        mock.queue_reply(b"+77.350\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model325);

        assert_eq!(ls.kelvin_reading("A").unwrap(), 77.35);
        assert_eq!(mock.written_text(), vec!["KRDG? A\r\n"]);
    }

    #[test]
    fn test_218_reads_all_inputs_at_once() {
        let mock = MockTransport::new();
        mock.queue_reply(b"+1.0,+2.0,+3.0,+4.0,+5.0,+6.0,+7.0,+8.0\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);

        let readings = ls.log_dict().unwrap();
        assert_eq!(readings.len(), 8);
        assert_eq!(readings["lakeshore218_temp8_k"], 8.0);
        assert_eq!(mock.written_text(), vec!["KRDG? 0\r\n"]);
    }

    #[test]
    fn test_setting_checks_event_register() {
        let mock = MockTransport::new();
        // SETP writes nothing back; *ESR? answers the second write
        mock.queue_reply(b"").queue_reply(b"0\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model331);

        ls.set_setpoint(1, 70.5).unwrap();
        assert_eq!(mock.written_text(), vec!["SETP 1,70.5\r\n", "*ESR?\r\n"]);
    }

    #[test]
    fn test_rejected_setting_is_device_error() {
        let mock = MockTransport::new();
        // bit 5: command error
        mock.queue_reply(b"").queue_reply(b"32\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model325);

        match ls.set_heater_range(1, HeaterRange::High) {
            Err(InstrumentError::Device { message, code }) => {
                assert!(message.starts_with("Command error"));
                assert_eq!(code, "32");
            }
            other => panic!("expected device error, got {:?}", other),
        }
        assert_eq!(mock.written_text()[0], "RANGE 1,3\r\n");
    }

    #[test]
    fn test_status_registers() {
        let mock = MockTransport::new();
        mock.queue_reply(b"20\r\n").queue_reply(b"1\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);

        let status = ls.status_byte().unwrap();
        assert!(status.is_set("overload"));
        assert!(status.is_set("error"));
        assert!(!status.is_set("alarm"));

        let reading = ls.reading_status("1").unwrap();
        assert!(reading.is_set("invalid_reading"));
    }

    #[test]
    fn test_service_request_mask_written_as_integer() {
        let mock = MockTransport::new();
        mock.queue_reply(b"").queue_reply(b"0\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);

        let mask = SERVICE_REQUEST.empty().with("alarm", true).with("error", true);
        ls.set_service_request(&mask).unwrap();
        assert_eq!(mock.written_text()[0], "*SRE 24\r\n");
    }

    #[test]
    fn test_331_heater_outputs() {
        let mock = MockTransport::new();
        mock.queue_reply(b"+45.0\r\n").queue_reply(b"+12.5\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model331);

        assert_eq!(ls.heater_output(1).unwrap(), 45.0);
        assert_eq!(ls.heater_output(2).unwrap(), 12.5);
        assert_eq!(mock.written_text(), vec!["HTR?\r\n", "AOUT?\r\n"]);
        assert!(ls.heater_output(3).is_err());
    }

    #[test]
    fn test_model_capabilities() {
        let mock = MockTransport::new();
        let monitor = lakeshore(&mock, LakeshoreModel::Model218);
        assert!(matches!(
            monitor.setpoint(1),
            Err(InstrumentError::UnknownCommand(_))
        ));
        let controller = lakeshore(&mock, LakeshoreModel::Model325);
        assert!(controller.alarm_status("A").is_err());
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_pid_and_ramp() {
        let mock = MockTransport::new();
        mock.queue_reply(b"+50.0,+20.0,+0.0\r\n").queue_reply(b"1,+2.5\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model325);

        let pid = ls.heater_pid(1).unwrap();
        assert_eq!(pid.gain, 50.0);
        assert_eq!(pid.integral, 20.0);
        let ramp = ls.setpoint_ramp(1).unwrap();
        assert!(ramp.enabled);
        assert_eq!(ramp.rate, 2.5);
    }

    #[test]
    fn test_alarm_status() {
        let mock = MockTransport::new();
        mock.queue_reply(b"1,0\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);
        let alarm = ls.alarm_status("3").unwrap();
        assert!(alarm.high_state);
        assert!(!alarm.low_state);
    }

    #[test]
    fn test_date_time() {
        let mock = MockTransport::new();
        mock.queue_reply(b"03,14,24,09,26,53\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);

        let clock = ls.date_time().unwrap();
        assert_eq!(clock.year(), 2024);
        assert_eq!(clock.month(), 3);
        assert_eq!(clock.second(), 53);
        assert_eq!(device_clock_argument(&clock), "3,14,24,9,26,53");
    }

    #[test]
    fn test_device_clock_century() {
        let late_90s = parse_device_clock("DATETIME?", "03,14,99,09,26,53", 2026).unwrap();
        assert_eq!(late_90s.year(), 1999);
        let this_year = parse_device_clock("DATETIME?", "01,02,26,00,00,00", 2026).unwrap();
        assert_eq!(this_year.year(), 2026);
        assert!(parse_device_clock("DATETIME?", "13,40,24,09,26,53", 2026).is_err());
        assert!(parse_device_clock("DATETIME?", "03,14,24", 2026).is_err());
    }

    #[test]
    fn test_set_date_time_writes_clock() {
        let mock = MockTransport::new();
        mock.queue_reply(b"").queue_reply(b"0\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);
        let clock = NaiveDate::from_ymd_opt(1999, 12, 31)
            .and_then(|date| date.and_hms_opt(23, 59, 58))
            .unwrap();

        ls.set_date_time(Some(clock)).unwrap();
        assert_eq!(mock.written_text(), vec!["DATETIME 12,31,99,23,59,58\r\n", "*ESR?\r\n"]);
    }

    #[test]
    fn test_short_218_reading_is_invalid() {
        let mock = MockTransport::new();
        mock.queue_reply(b"+1.0,+2.0,+3.0\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);
        assert!(matches!(
            ls.log_dict(),
            Err(InstrumentError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_alarm_parameters_round_trip_on_wire() {
        let mock = MockTransport::new();
        mock.queue_reply(b"").queue_reply(b"0\r\n");
        mock.queue_reply(b"1,1,300.0,4.0,1.5,1\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model218);
        let settings = AlarmParameters {
            enabled: true,
            source: 1,
            high_value: 300.0,
            low_value: 4.0,
            deadband: 1.5,
            latch_enable: true,
            audible: true,
            visible: false,
        };

        ls.set_alarm_parameters("3", &settings).unwrap();
        let read_back = ls.alarm_parameters("3").unwrap();
        assert_eq!(mock.written_text()[0], "ALARM 3,1,1,300,4,1.5,1,1,0\r\n");
        assert_eq!(mock.written_text()[2], "ALARM? 3\r\n");
        assert!(read_back.enabled && read_back.latch_enable);
        assert_eq!(read_back.high_value, 300.0);
        assert!(!read_back.audible);
    }

    #[test]
    fn test_disabled_alarm_zeroes_settings() {
        let mock = MockTransport::new();
        mock.queue_reply(b"").queue_reply(b"0\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model331);
        let settings = AlarmParameters {
            enabled: false,
            high_value: 10.0,
            ..AlarmParameters::disabled()
        };
        ls.set_alarm_parameters("a", &settings).unwrap();
        assert_eq!(mock.written_text()[0], "ALARM A,0,0,0,0,0,0,0,0\r\n");
    }

    #[test]
    fn test_relays() {
        let mock = MockTransport::new();
        mock.queue_reply(b"").queue_reply(b"0\r\n");
        mock.queue_reply(b"").queue_reply(b"0\r\n");
        mock.queue_reply(b"1\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model331);

        ls.turn_relay_on(1).unwrap();
        ls.set_relay_alarms(2, "b", RelayAlarmTrigger::Both).unwrap();
        assert!(ls.relay_status(1).unwrap());
        let frames = mock.written_text();
        assert_eq!(frames[0], "RELAY 1,1,0,0\r\n");
        assert_eq!(frames[2], "RELAY 2,2,B,2\r\n");
        assert_eq!(frames[4], "RELAYST? 1\r\n");
    }

    #[test]
    fn test_325_has_no_relays() {
        let mock = MockTransport::new();
        let ls = lakeshore(&mock, LakeshoreModel::Model325);
        assert!(matches!(ls.turn_relay_off(1), Err(InstrumentError::UnknownCommand(_))));
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_identity() {
        let mock = MockTransport::new();
        mock.queue_reply(b"LSCI,MODEL331S,331A123,032409\r\n");
        let ls = lakeshore(&mock, LakeshoreModel::Model331);
        assert_eq!(Housekeeping::identity(&ls).model_number, "MODEL331S");
    }
}
