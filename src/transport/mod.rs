// Byte-stream channels to instruments
//
// Provides:
// - The `Transport` trait every instrument talks through
// - Serial (serialport crate) and TCP implementations
// - A scripted mock used by tests and demos

mod mock;
mod serial;
mod tcp;

use std::time::{Duration, Instant};

pub use mock::MockTransport;
pub use serial::{Parity, SerialSettings, SerialTransport};
pub use tcp::TcpTransport;

/// Failure of the underlying channel (port closed, I/O error)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Deadline `timeout` from now, clamped when the sum overflows `Instant`
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(Duration::from_secs(u32::MAX as u64)))
        .unwrap_or(now)
}

/// Duplex byte channel to one instrument
///
/// Implementations never treat a read timeout as an error: `read_until`
/// returns whatever arrived before the deadline, which is empty when the
/// device stayed silent.
pub trait Transport: Send {
    /// Write all bytes and flush
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read until `terminator` has been received or `timeout` elapses
    ///
    /// The terminator is included in the returned bytes when it was seen.
    /// An empty terminator reads until the timeout.
    fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// Drain everything currently buffered without blocking
    fn read_available(&mut self) -> Result<Vec<u8>>;

    /// Discard any unread input
    fn reset_input_buffer(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        (**self).read_until(terminator, timeout)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        (**self).read_available()
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        (**self).reset_input_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_after_never_overflows() {
        let before = Instant::now();
        assert!(deadline_after(Duration::MAX) > before);
        assert!(deadline_after(Duration::from_millis(5)) >= before + Duration::from_millis(5));
    }
}
