// Device families built on `Instrument`
//
// Provides:
// - Cryotel AVC cryocooler controller
// - Lakeshore 218 monitor and 325/331 controllers
// - Kurt J. Lesker 392, Pfeiffer dual gauge and MKS 392B pressure gauges
// - `Housekeeping`, the polling surface shared by all of them

pub mod cryotel;
pub mod lakeshore;
pub mod pressure;

use clap::ValueEnum;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::instrument::{Identity, InstrumentError, RawResponse, Result};
use crate::transport::{SerialSettings, Transport};

pub use cryotel::{CoolerMode, CryotelAvc, CryotelCommand, FleetMode};
pub use lakeshore::{AlarmParameters, Lakeshore, LakeshoreCommand, LakeshoreModel, RelayAlarmTrigger};
pub use pressure::{Lesker392, Mks392b, PfeifferDualGauge};

/// Named readings of one poll, e.g. `cryotel_coldhead_k -> 77.1`
pub type LogDict = BTreeMap<String, f64>;

/// What the polling runtime needs from an instrument
pub trait Housekeeping: Send + Sync {
    fn name(&self) -> &str;

    fn identity(&self) -> Identity;

    /// Raw command/query by name, for operator use
    fn query(&self, command: &str, argument: Option<&str>) -> Result<RawResponse>;

    /// Current readings worth logging
    fn log_dict(&self) -> Result<LogDict>;
}

/// Instrument families selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceKind {
    Cryotel,
    Lakeshore218,
    Lakeshore325,
    Lakeshore331,
    Lesker392,
    Pfeiffer,
    Mks392b,
}

impl DeviceKind {
    /// Default line settings of the family
    pub fn serial_settings(self) -> SerialSettings {
        match self {
            DeviceKind::Cryotel => cryotel::serial_settings(),
            DeviceKind::Lakeshore218 | DeviceKind::Lakeshore325 | DeviceKind::Lakeshore331 => {
                lakeshore::serial_settings()
            }
            DeviceKind::Lesker392 => pressure::lesker_serial_settings(),
            DeviceKind::Pfeiffer => pressure::pfeiffer_serial_settings(),
            DeviceKind::Mks392b => pressure::mks_serial_settings(),
        }
    }

    /// Connect over an open transport and hand back the polling surface
    pub fn connect<T: Transport + 'static>(self, transport: T) -> Result<Box<dyn Housekeeping>> {
        Ok(match self {
            DeviceKind::Cryotel => Box::new(CryotelAvc::connect(transport)?),
            DeviceKind::Lakeshore218 => Box::new(Lakeshore::connect(transport, LakeshoreModel::Model218)?),
            DeviceKind::Lakeshore325 => Box::new(Lakeshore::connect(transport, LakeshoreModel::Model325)?),
            DeviceKind::Lakeshore331 => Box::new(Lakeshore::connect(transport, LakeshoreModel::Model331)?),
            DeviceKind::Lesker392 => Box::new(Lesker392::connect(transport)?),
            DeviceKind::Pfeiffer => Box::new(PfeifferDualGauge::connect(transport)?),
            DeviceKind::Mks392b => Box::new(Mks392b::connect(transport, pressure::MKS_DEFAULT_ADDRESS)?),
        })
    }
}

/// Parse a reply field, naming the command in the error
pub(crate) fn parse_field<F>(command: &str, text: &str) -> Result<F>
where
    F: FromStr,
    F::Err: std::fmt::Display,
{
    text.trim()
        .parse::<F>()
        .map_err(|e| InstrumentError::invalid_response(command, format!("{:?}: {}", text, e)))
}

/// Last line of a reply, which carries the value for echo-then-value devices
pub(crate) fn value_line<'r>(command: &str, response: &'r RawResponse) -> Result<&'r str> {
    response
        .last_line()
        .ok_or_else(|| InstrumentError::invalid_response(command, "empty response"))
}

/// Comma-separated numeric fields, e.g. `KRDG? 0`
pub(crate) fn parse_list<F>(command: &str, text: &str) -> Result<Vec<F>>
where
    F: FromStr,
    F::Err: std::fmt::Display,
{
    text.split(',').map(|field| parse_field(command, field)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_field::<f64>("KRDG?", " +77.50\r\n").unwrap(), 77.5);
        assert!(parse_field::<f64>("KRDG?", "abc").is_err());
        assert_eq!(
            parse_list::<f64>("KRDG?", "+1.0,+2.5,+3.0").unwrap(),
            vec![1.0, 2.5, 3.0]
        );
        let empty = RawResponse::empty();
        assert!(value_line("TC", &empty).is_err());
    }

    #[test]
    fn test_family_settings() {
        let lakeshore = DeviceKind::Lakeshore218.serial_settings();
        assert_eq!(lakeshore.data_bits, 7);
        assert_eq!(DeviceKind::Lesker392.serial_settings().baud_rate, 19200);
        assert_eq!(DeviceKind::Cryotel.serial_settings().data_bits, 8);
    }

    #[test]
    fn test_connect_by_kind() {
        let mock = MockTransport::new();
        let device = DeviceKind::Lesker392.connect(mock.clone()).unwrap();
        assert_eq!(device.name(), "lesker392");
        assert_eq!(mock.written_text(), vec!["\r"]);
    }
}
