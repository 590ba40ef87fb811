// Status/event register decoding and error-code tables
//
// A register is an integer whose bits each carry a named condition. Layouts
// are fixed tables indexed by bit position; an empty name marks a reserved
// bit, which is never surfaced.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::error::{InstrumentError, Result};

/// Bit-position table of one register type (index 0 = least significant bit)
#[derive(Debug, PartialEq, Eq)]
pub struct RegisterLayout {
    pub name: &'static str,
    pub bits: &'static [&'static str],
}

/// IEEE-488.2 Standard Event Status Register (`*ESR?`, `*ESE`)
pub static STANDARD_EVENT: RegisterLayout = RegisterLayout {
    name: "standard_event",
    bits: &[
        "operation_complete",
        "",
        "query_error",
        "",
        "execution_error",
        "command_error",
        "",
        "power_on",
    ],
};

/// Status Byte Register (`*STB?`)
pub static STATUS_BYTE: RegisterLayout = RegisterLayout {
    name: "status_byte",
    bits: &[
        "new_reading",
        "unused",
        "overload",
        "alarm",
        "error",
        "event_status_bit",
        "service_request",
        "datalog_done",
    ],
};

/// Service Request Enable Register (`*SRE`, `*SRE?`)
pub static SERVICE_REQUEST: RegisterLayout = RegisterLayout {
    name: "service_request",
    bits: &["new_reading", "", "", "alarm", "error", "", "service_request", ""],
};

/// Input reading status flags (`RDGST?`)
pub static READING_STATUS: RegisterLayout = RegisterLayout {
    name: "reading_status",
    bits: &[
        "invalid_reading",
        "",
        "",
        "",
        "temperature_under_range",
        "temperature_over_range",
        "sensor_units_zero",
        "sensor_units_over_range",
    ],
};

/// Named bits of one register reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterBitfield {
    #[serde(skip)]
    layout: &'static RegisterLayout,
    #[serde(flatten)]
    bits: BTreeMap<&'static str, bool>,
}

impl RegisterLayout {
    fn named_bits(&self) -> impl Iterator<Item = (usize, &'static str)> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(position, &name)| (position, name))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.named_bits()
            .find(|&(_, bit)| bit == name)
            .map(|(position, _)| position)
    }

    /// Split an integer into the named bits of this layout
    pub fn decode(&'static self, value: u32) -> RegisterBitfield {
        let bits = self
            .named_bits()
            .map(|(position, name)| (name, value & (1 << position) != 0))
            .collect();
        RegisterBitfield { layout: self, bits }
    }

    /// Decode a numeric reply such as `"  32\r\n"`
    pub fn parse(&'static self, raw: &str) -> Result<RegisterBitfield> {
        let value = raw.trim().parse::<u32>().map_err(|e| {
            InstrumentError::invalid_response(self.name, format!("{:?} is not a register value: {}", raw, e))
        })?;
        Ok(self.decode(value))
    }

    /// A bitfield of this layout with every named bit cleared
    pub fn empty(&'static self) -> RegisterBitfield {
        self.decode(0)
    }
}

impl RegisterBitfield {
    pub fn layout(&self) -> &'static RegisterLayout {
        self.layout
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.bits.get(name).copied()
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    /// Set a named bit; names outside the layout are ignored
    pub fn with(mut self, name: &str, value: bool) -> Self {
        if let Some(slot) = self.bits.get_mut(name) {
            *slot = value;
        } else {
            debug!("Register {} has no bit named {}", self.layout.name, name);
        }
        self
    }

    /// Names of the bits currently set
    pub fn set_bits(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bits
            .iter()
            .filter(|&(_, &value)| value)
            .map(|(&name, _)| name)
    }

    /// OR set bits back together at their table positions
    pub fn to_integer(&self) -> u32 {
        self.set_bits()
            .filter_map(|name| self.layout.position(name))
            .fold(0, |acc, position| acc | (1 << position))
    }
}

/// Static mapping from a device error code to its message
#[derive(Debug)]
pub struct ErrorCodeTable {
    pub entries: &'static [(&'static str, &'static str)],
}

impl ErrorCodeTable {
    /// Exact-match lookup; unknown codes read as "no error"
    pub fn lookup(&self, code: &str) -> Option<&'static str> {
        let code = code.trim();
        let message = self
            .entries
            .iter()
            .find(|(known, _)| *known == code)
            .map(|&(_, message)| message);
        if message.is_none() {
            debug!("Error code {:?} not in table, treating as no error", code);
        }
        message
    }

    /// Turn a known fault code into `InstrumentError::Device`
    pub fn check(&self, code: &str) -> Result<()> {
        match self.lookup(code) {
            Some(message) => Err(InstrumentError::Device {
                message: message.to_string(),
                code: code.trim().to_string(),
            }),
            None => Ok(()),
        }
    }
}
