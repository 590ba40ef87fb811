// Serial port transport (USB-serial adapters, RS232, RS485 converters)

use serde::{Deserialize, Serialize};
use serialport::{self, ClearBuffer, DataBits, FlowControl, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{deadline_after, Result, Transport, TransportError};

/// Poll granularity of blocking reads; deadlines are checked between polls
const POLL_TIMEOUT_MS: u64 = 50;

/// Parity setting of a serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Line settings for a serial instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub read_timeout_ms: u64,
}

impl SerialSettings {
    /// 8 data bits, no parity, one stop bit
    pub fn eight_n_one(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout_ms: 2000,
        }
    }

    /// 7 data bits, odd parity, one stop bit (Lakeshore default)
    pub fn seven_o_one(baud_rate: u32) -> Self {
        Self {
            data_bits: 7,
            parity: Parity::Odd,
            ..Self::eight_n_one(baud_rate)
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn data_bits(&self) -> Result<DataBits> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(invalid_setting(format!("unsupported data bits: {}", other))),
        }
    }

    fn stop_bits(&self) -> Result<StopBits> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(invalid_setting(format!("unsupported stop bits: {}", other))),
        }
    }
}

fn invalid_setting(reason: String) -> TransportError {
    TransportError::Io(std::io::Error::new(ErrorKind::InvalidInput, reason))
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Instrument connected through a serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port with the given line settings
    pub fn open(port_name: &str, settings: &SerialSettings) -> Result<Self> {
        debug!("Opening serial port {} with {:?}", port_name, settings);
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(settings.data_bits()?)
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits()?)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(POLL_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let deadline = deadline_after(timeout);
        let mut received = Vec::new();
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => {
                    received.push(byte[0]);
                    if !terminator.is_empty() && received.ends_with(terminator) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(received)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let pending = self.port.bytes_to_read()? as usize;
        let mut buffer = vec![0u8; pending];
        if pending > 0 {
            self.port.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
