// Sunpower Cryotel AVC cryocooler controller
//
// Every reply echoes the command line before the value, so two-line replies
// carry their value on the last line. STATUS streams a variable block that is
// drained after a settle delay.

use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{parse_field, value_line, Housekeeping, LogDict};
use crate::config::STATUS_HEADER_LINES;
use crate::instrument::{
    ArgumentStyle, CommandSet, CommandSpec, DeviceProfile, ErrorCodeTable, Identity, Instrument, InstrumentError,
    RawResponse, ResponseMode, Result, Terminator,
};
use crate::transport::{SerialSettings, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryotelCommand {
    Cooler,
    E,
    Error,
    Kd,
    Ki,
    Kp,
    Login,
    Logout,
    Mode,
    P,
    Passwd,
    Pwout,
    Sensor,
    Status,
    Tc,
    TempRj,
    Ttarget,
    Version,
}

impl CommandSet for CryotelCommand {
    const ALL: &'static [Self] = &[
        CryotelCommand::Cooler,
        CryotelCommand::E,
        CryotelCommand::Error,
        CryotelCommand::Kd,
        CryotelCommand::Ki,
        CryotelCommand::Kp,
        CryotelCommand::Login,
        CryotelCommand::Logout,
        CryotelCommand::Mode,
        CryotelCommand::P,
        CryotelCommand::Passwd,
        CryotelCommand::Pwout,
        CryotelCommand::Sensor,
        CryotelCommand::Status,
        CryotelCommand::Tc,
        CryotelCommand::TempRj,
        CryotelCommand::Ttarget,
        CryotelCommand::Version,
    ];

    fn spec(self) -> CommandSpec {
        use CryotelCommand as C;
        use ResponseMode::{Lines, UntilIdle};
        match self {
            C::Cooler => CommandSpec::new("COOLER", true, Lines(2)),
            C::E => CommandSpec::new("E", false, Lines(4)),
            C::Error => CommandSpec::new("ERROR", false, Lines(2)),
            C::Kd => CommandSpec::new("KD", true, Lines(2)),
            C::Ki => CommandSpec::new("KI", true, Lines(2)),
            C::Kp => CommandSpec::new("KP", true, Lines(2)),
            C::Login => CommandSpec::new("LOGIN", true, Lines(2)),
            C::Logout => CommandSpec::new("LOGOUT", true, Lines(2)),
            C::Mode => CommandSpec::new("MODE", false, Lines(2)),
            C::P => CommandSpec::new("P", false, Lines(2)),
            C::Passwd => CommandSpec::new("PASSWD", true, Lines(2)),
            C::Pwout => CommandSpec::new("PWOUT", true, Lines(2)),
            C::Sensor => CommandSpec::new("SENSOR", false, Lines(2)),
            C::Status => CommandSpec::new("STATUS", false, UntilIdle),
            C::Tc => CommandSpec::new("TC", false, Lines(2)),
            C::TempRj => CommandSpec::new("TEMP RJ", false, Lines(2)),
            C::Ttarget => CommandSpec::new("TTARGET", true, Lines(2)),
            C::Version => CommandSpec::new("VERSION", false, Lines(2)),
        }
    }
}

/// Fault codes reported by `ERROR`
pub static ERROR_CODES: ErrorCodeTable = ErrorCodeTable {
    entries: &[
        ("00000001", "High Reject Temperature Error"),
        ("00000010", "Low Reject Temperature Error"),
        ("10000000", "Over Current Error"),
        ("11111111", "Invalid Configuration Error"),
        ("10000001", "High Reject Temperature and Over Current Error"),
        ("10000010", "Low Reject Temperature and Over Current Error"),
    ],
};

pub fn serial_settings() -> SerialSettings {
    SerialSettings::eight_n_one(9600)
}

pub fn profile() -> DeviceProfile {
    DeviceProfile::new::<CryotelCommand>("cryotel", Terminator::Cr, ArgumentStyle::Equals)
}

/// Control loop the cooler runs in once started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoolerMode {
    /// Fixed output power (setpoint in W)
    Power,
    /// Closed loop on the cold head temperature (setpoint in K)
    Temperature,
}

impl CoolerMode {
    /// `COOLER` argument that starts the cooler in this mode
    fn cooler_argument(self) -> &'static str {
        match self {
            CoolerMode::Power => "POWER",
            CoolerMode::Temperature => "ON",
        }
    }
}

impl FromStr for CoolerMode {
    type Err = String;

    /// Only the first letter matters: `p...` is power, `t...` temperature
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('P') => Ok(CoolerMode::Power),
            Some('T') => Ok(CoolerMode::Temperature),
            _ => Err(format!("unknown cooler mode {:?} (expected power or temperature)", s)),
        }
    }
}

/// What a fleet start does with one cooler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetMode {
    Start(CoolerMode),
    /// Leave the cooler as it is
    Off,
}

impl FromStr for FleetMode {
    type Err = String;

    /// `power`, `temperature` or `off`; only the first letter matters
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('O') => Ok(FleetMode::Off),
            _ => s
                .parse()
                .map(FleetMode::Start)
                .map_err(|_| format!("unknown cooler mode {:?} (expected power, temperature or off)", s)),
        }
    }
}

/// Start each cooler in its own mode; coolers past the end of `modes` are left alone
///
/// Returns the `COOLER` state of every cooler that was started, `None` for
/// the ones left off.
pub fn start_coolers<T: Transport>(
    coolers: &[CryotelAvc<T>],
    modes: &[FleetMode],
    setpoint: Option<f64>,
) -> Result<Vec<Option<String>>> {
    if modes.len() != coolers.len() {
        warn!("{} cooler modes given for {} coolers", modes.len(), coolers.len());
    }
    coolers
        .iter()
        .zip(modes)
        .map(|(cooler, mode)| match mode {
            FleetMode::Start(mode) => cooler.start_cryocooler(*mode, setpoint).map(Some),
            FleetMode::Off => Ok(None),
        })
        .collect()
}

/// Stop every cooler, even when an earlier one fails; the first failure is returned
pub fn stop_coolers<T: Transport>(coolers: &[CryotelAvc<T>]) -> Result<Vec<String>> {
    let results: Vec<Result<String>> = coolers
        .iter()
        .map(|cooler| {
            cooler.stop_cryocooler().inspect_err(|e| warn!("Failed to stop cryocooler: {}", e))
        })
        .collect();
    results.into_iter().collect()
}

pub struct CryotelAvc<T: Transport> {
    instrument: Instrument<T>,
}

impl<T: Transport> CryotelAvc<T> {
    pub fn new(transport: T) -> Self {
        Self::with_profile(transport, profile())
    }

    pub fn with_profile(transport: T, profile: DeviceProfile) -> Self {
        Self {
            instrument: Instrument::new(transport, profile),
        }
    }

    pub fn connect(transport: T) -> Result<Self> {
        let cryotel = Self::new(transport);
        cryotel.instrument.handshake()?;
        Ok(cryotel)
    }

    pub fn instrument(&self) -> &Instrument<T> {
        &self.instrument
    }

    fn ask(&self, command: CryotelCommand, argument: Option<String>) -> Result<RawResponse> {
        self.instrument.query(command.name(), argument.as_deref())
    }

    fn ask_value(&self, command: CryotelCommand, argument: Option<String>) -> Result<String> {
        let response = self.ask(command, argument)?;
        Ok(value_line(command.name(), &response)?.to_string())
    }

    fn ask_f64(&self, command: CryotelCommand, argument: Option<f64>) -> Result<f64> {
        let value = self.ask_value(command, argument.map(|v| v.to_string()))?;
        parse_field(command.name(), &value)
    }

    /// Cooler state, or set it with `ON`, `OFF` or `POWER`
    pub fn cooler(&self, argument: Option<&str>) -> Result<String> {
        self.ask_value(CryotelCommand::Cooler, argument.map(str::to_string))
    }

    /// Controller error terms (three value lines after the echo)
    pub fn e(&self) -> Result<Vec<f64>> {
        let response = self.ask(CryotelCommand::E, None)?;
        response
            .lines
            .iter()
            .skip(1)
            .map(|line| parse_field("E", line))
            .collect()
    }

    /// Raw 8-bit error code
    pub fn error(&self) -> Result<String> {
        self.ask_value(CryotelCommand::Error, None)
    }

    /// Query `ERROR` and fail with the matching fault, if any
    ///
    /// Codes missing from the table, including `00000000`, are not faults.
    pub fn check_error(&self) -> Result<()> {
        let code = self.error()?;
        ERROR_CODES.check(&code)
    }

    pub fn kd(&self, value: Option<f64>) -> Result<f64> {
        self.ask_f64(CryotelCommand::Kd, value)
    }

    pub fn ki(&self, value: Option<f64>) -> Result<f64> {
        self.ask_f64(CryotelCommand::Ki, value)
    }

    pub fn kp(&self, value: Option<f64>) -> Result<f64> {
        self.ask_f64(CryotelCommand::Kp, value)
    }

    pub fn login(&self, password: &str) -> Result<String> {
        self.ask_value(CryotelCommand::Login, Some(password.to_string()))
    }

    pub fn logout(&self, password: &str) -> Result<String> {
        self.ask_value(CryotelCommand::Logout, Some(password.to_string()))
    }

    pub fn passwd(&self, password: Option<&str>) -> Result<String> {
        self.ask_value(CryotelCommand::Passwd, password.map(str::to_string))
    }

    pub fn mode(&self) -> Result<String> {
        self.ask_value(CryotelCommand::Mode, None)
    }

    /// Measured output power (W)
    pub fn p(&self) -> Result<f64> {
        self.ask_f64(CryotelCommand::P, None)
    }

    /// Power setpoint (W)
    pub fn pwout(&self, value: Option<f64>) -> Result<f64> {
        self.ask_f64(CryotelCommand::Pwout, value)
    }

    pub fn power_setpoint(&self, value: Option<f64>) -> Result<f64> {
        self.pwout(value)
    }

    pub fn sensor(&self) -> Result<String> {
        self.ask_value(CryotelCommand::Sensor, None)
    }

    pub fn status(&self) -> Result<RawResponse> {
        self.ask(CryotelCommand::Status, None)
    }

    /// Cold head temperature (K)
    pub fn tc(&self) -> Result<f64> {
        self.ask_f64(CryotelCommand::Tc, None)
    }

    pub fn temperature_coldhead(&self) -> Result<f64> {
        self.tc()
    }

    /// Reject temperature (C)
    pub fn temp_rj(&self) -> Result<f64> {
        self.ask_f64(CryotelCommand::TempRj, None)
    }

    pub fn temperature_reject(&self) -> Result<f64> {
        self.temp_rj()
    }

    /// Temperature setpoint (K)
    pub fn ttarget(&self, value: Option<f64>) -> Result<f64> {
        self.ask_f64(CryotelCommand::Ttarget, value)
    }

    pub fn temperature_setpoint(&self, value: Option<f64>) -> Result<f64> {
        self.ttarget(value)
    }

    pub fn version(&self) -> Result<String> {
        self.ask_value(CryotelCommand::Version, None)
    }

    /// `key = value` pairs of the STATUS block
    pub fn get_status_dict(&self) -> Result<BTreeMap<String, String>> {
        Ok(parse_status_block(&self.status()?))
    }

    /// Start the cooler, optionally changing the setpoint first
    ///
    /// The current setpoint is kept when `setpoint` is `None`.
    pub fn start_cryocooler(&self, mode: CoolerMode, setpoint: Option<f64>) -> Result<String> {
        if let Some(setpoint) = setpoint {
            let applied = match mode {
                CoolerMode::Power => self.pwout(Some(setpoint))?,
                CoolerMode::Temperature => self.ttarget(Some(setpoint))?,
            };
            debug!("Cryotel {:?} setpoint now {}", mode, applied);
        }
        let state = self.cooler(Some(mode.cooler_argument()))?;
        info!("Cryocooler started in {:?} mode ({})", mode, state);
        Ok(state)
    }

    pub fn stop_cryocooler(&self) -> Result<String> {
        let state = self.cooler(Some("OFF"))?;
        info!("Cryocooler stopped ({})", state);
        Ok(state)
    }
}

/// Skip the header lines, then split `key = value` lines
pub fn parse_status_block(response: &RawResponse) -> BTreeMap<String, String> {
    response
        .lines
        .iter()
        .skip(STATUS_HEADER_LINES)
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

impl<T: Transport> Housekeeping for CryotelAvc<T> {
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
        let mut readings = LogDict::new();
        readings.insert("cryotel_coldhead_k".to_string(), self.tc()?);
        readings.insert("cryotel_reject_c".to_string(), self.temp_rj()?);
        readings.insert("cryotel_power_w".to_string(), self.p()?);
        readings.insert("cryotel_setpoint_k".to_string(), self.ttarget(None)?);
        match self.check_error() {
            Ok(()) => {}
            Err(InstrumentError::Device { message, code }) => {
                readings.insert("cryotel_error".to_string(), i64::from_str_radix(&code, 2).unwrap_or(-1) as f64);
                warn!("Cryotel fault {}: {}", code, message);
            }
            Err(e) => return Err(e),
        }
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn cryotel(mock: &MockTransport) -> CryotelAvc<MockTransport> {
        let profile = profile()
            .with_read_timeout(Duration::ZERO)
            .with_settle_delay(Duration::ZERO);
        CryotelAvc::with_profile(mock.clone(), profile)
    }

    #[test]
    fn test_ttarget_set_echoes_value() {
        let mock = MockTransport::new();
        mock.queue_reply(b"TTARGET=70\r70.00\r");
        let cryo = cryotel(&mock);

        assert_eq!(cryo.ttarget(Some(70.0)).unwrap(), 70.0);
        assert_eq!(mock.written_text(), vec!["TTARGET=70\r"]);
    }

    #[test]
    fn test_temp_rj_keeps_embedded_space() {
        let mock = MockTransport::new();
        mock.queue_reply(b"TEMP RJ\r31.25\r");
        let cryo = cryotel(&mock);

        assert_eq!(cryo.temp_rj().unwrap(), 31.25);
        assert_eq!(mock.written_text(), vec!["TEMP RJ\r"]);
    }

    #[test]
    fn test_check_error_known_code() {
        let mock = MockTransport::new();
        mock.queue_reply(b"ERROR\r10000001\r");
        let cryo = cryotel(&mock);

        match cryo.check_error() {
            Err(InstrumentError::Device { message, code }) => {
                assert_eq!(message, "High Reject Temperature and Over Current Error");
                assert_eq!(code, "10000001");
            }
            other => panic!("expected device error, got {:?}", other),
        }
    }

    #[test]
    fn test_check_error_clear_code() {
        let mock = MockTransport::new();
        mock.queue_reply(b"ERROR\r00000000\r");
        assert!(cryotel(&mock).check_error().is_ok());
    }

    #[test]
    fn test_status_dict_skips_header() {
        let mock = MockTransport::new();
        mock.queue_reply(b"STATUS\rSTATUS REPORT\rMODE = 2.00\rTSTATM = 0.00\rTSTAT = 0.00\rSSTOPM = 0.00\r");
        let cryo = cryotel(&mock);

        let status = cryo.get_status_dict().unwrap();
        assert_eq!(status.len(), 4);
        assert_eq!(status["MODE"], "2.00");
        assert_eq!(status["SSTOPM"], "0.00");
    }

    #[test]
    fn test_start_cryocooler_sets_then_starts() {
        let mock = MockTransport::new();
        mock.queue_reply(b"PWOUT=150\r150.00\r")
            .queue_reply(b"COOLER=POWER\rPOWER\r");
        let cryo = cryotel(&mock);

        let state = cryo.start_cryocooler(CoolerMode::Power, Some(150.0)).unwrap();
        assert_eq!(state, "POWER");
        assert_eq!(mock.written_text(), vec!["PWOUT=150\r", "COOLER=POWER\r"]);
    }

    #[test]
    fn test_start_without_setpoint_and_stop() {
        let mock = MockTransport::new();
        mock.queue_reply(b"COOLER=ON\rON\r").queue_reply(b"COOLER=OFF\rOFF\r");
        let cryo = cryotel(&mock);

        cryo.start_cryocooler(CoolerMode::Temperature, None).unwrap();
        assert_eq!(cryo.stop_cryocooler().unwrap(), "OFF");
        assert_eq!(mock.written_text(), vec!["COOLER=ON\r", "COOLER=OFF\r"]);
    }

    #[test]
    fn test_cooler_mode_from_first_letter() {
        assert_eq!("power".parse::<CoolerMode>().unwrap(), CoolerMode::Power);
        assert_eq!("T".parse::<CoolerMode>().unwrap(), CoolerMode::Temperature);
        assert_eq!("Temp".parse::<CoolerMode>().unwrap(), CoolerMode::Temperature);
        assert!("off".parse::<CoolerMode>().is_err());
    }

    #[test]
    fn test_e_reads_four_lines() {
        let mock = MockTransport::new();
        mock.queue_reply(b"E\r0.10\r0.20\r0.30\r");
        let cryo = cryotel(&mock);
        assert_eq!(cryo.e().unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_log_dict() {
        let mock = MockTransport::new();
        mock.queue_reply(b"TC\r77.00\r")
            .queue_reply(b"TEMP RJ\r30.00\r")
            .queue_reply(b"P\r120.5\r")
            .queue_reply(b"TTARGET\r77.00\r")
            .queue_reply(b"ERROR\r00000000\r");
        let cryo = cryotel(&mock);

        let readings = cryo.log_dict().unwrap();
        assert_eq!(readings["cryotel_coldhead_k"], 77.0);
        assert_eq!(readings["cryotel_power_w"], 120.5);
        assert!(!readings.contains_key("cryotel_error"));
        assert_eq!(cryo.identity(), Identity::placeholder());
    }

    #[test]
    fn test_log_dict_propagates_silent_error_query() {
        let mock = MockTransport::new();
        mock.queue_reply(b"TC\r77.00\r")
            .queue_reply(b"TEMP RJ\r30.00\r")
            .queue_reply(b"P\r120.5\r")
            .queue_reply(b"TTARGET\r77.00\r");
        let cryo = cryotel(&mock);

        assert!(matches!(
            cryo.log_dict(),
            Err(InstrumentError::CommunicationTimeout { .. })
        ));
    }

    #[test]
    fn test_log_dict_reports_fault_code() {
        let mock = MockTransport::new();
        mock.queue_reply(b"TC\r77.00\r")
            .queue_reply(b"TEMP RJ\r30.00\r")
            .queue_reply(b"P\r120.5\r")
            .queue_reply(b"TTARGET\r77.00\r")
            .queue_reply(b"ERROR\r10000001\r");
        let readings = cryotel(&mock).log_dict().unwrap();
        assert_eq!(readings["cryotel_error"], 129.0);
    }

    #[test]
    fn test_fleet_mode_parsing() {
        assert_eq!("p".parse::<FleetMode>().unwrap(), FleetMode::Start(CoolerMode::Power));
        assert_eq!("Temperature".parse::<FleetMode>().unwrap(), FleetMode::Start(CoolerMode::Temperature));
        assert_eq!("off".parse::<FleetMode>().unwrap(), FleetMode::Off);
        assert!("x".parse::<FleetMode>().is_err());
    }

    #[test]
    fn test_start_coolers_each_in_own_mode() {
        let mocks = [MockTransport::new(), MockTransport::new(), MockTransport::new()];
        mocks[0].queue_reply(b"COOLER=ON\rON\r");
        mocks[2].queue_reply(b"COOLER=POWER\rPOWER\r");
        let coolers: Vec<_> = mocks.iter().map(cryotel).collect();
        let modes = [
            FleetMode::Start(CoolerMode::Temperature),
            FleetMode::Off,
            FleetMode::Start(CoolerMode::Power),
        ];

        let states = start_coolers(&coolers, &modes, None).unwrap();
        assert_eq!(states, vec![Some("ON".to_string()), None, Some("POWER".to_string())]);
        assert_eq!(mocks[0].written_text(), vec!["COOLER=ON\r"]);
        assert!(mocks[1].written().is_empty());
        assert_eq!(mocks[2].written_text(), vec!["COOLER=POWER\r"]);
    }

    #[test]
    fn test_stop_coolers_tries_every_cooler() {
        let mocks = [MockTransport::new(), MockTransport::new()];
        mocks[1].queue_reply(b"COOLER=OFF\rOFF\r");
        let coolers: Vec<_> = mocks.iter().map(cryotel).collect();

        assert!(stop_coolers(&coolers).is_err());
        assert_eq!(mocks[0].written_text(), vec!["COOLER=OFF\r"]);
        assert_eq!(mocks[1].written_text(), vec!["COOLER=OFF\r"]);
    }
}
