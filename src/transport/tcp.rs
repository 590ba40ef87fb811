// TCP transport (ethernet-to-serial bridges, instruments with a LAN port)

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{deadline_after, Result, Transport, TransportError};

const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Instrument reachable over a TCP socket
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `addr` (for example `"192.168.0.12:7777"`)
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A, timeout: Duration) -> Result<Self> {
        debug!("Connecting to {:?}", addr);
        let mut last_error = None;
        for socket_addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(POLL_TIMEOUT))?;
                    stream.set_nodelay(true)?;
                    return Ok(Self { stream });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.map_or(TransportError::Closed, TransportError::Io))
    }
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let deadline = deadline_after(timeout);
        let mut received = Vec::new();
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(_) => {
                    received.push(byte[0]);
                    if !terminator.is_empty() && received.ends_with(terminator) {
                        break;
                    }
                }
                Err(e) if is_timeout(e.kind()) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(received)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        self.stream.set_nonblocking(true)?;
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        let outcome = loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break Err(TransportError::Closed),
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(e.kind()) => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };
        self.stream.set_nonblocking(false)?;
        outcome.map(|()| received)
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        let discarded = self.read_available()?;
        if !discarded.is_empty() {
            debug!("Discarded {} stale bytes", discarded.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_read_until_terminator_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 6];
            socket.read_exact(&mut request).unwrap();
            assert_eq!(&request, b"KRDG?\n");
            socket.write_all(b"+077.35\r\n").unwrap();
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(1)).unwrap();
        transport.write(b"KRDG?\n").unwrap();
        let reply = transport
            .read_until(b"\r\n", Duration::from_secs(2))
            .unwrap();
        assert_eq!(reply, b"+077.35\r\n");

        server.join().unwrap();
    }
}
