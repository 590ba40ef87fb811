// Scripted transport for tests and demos
//
// Each write releases the next queued reply into the receive buffer, which is
// how a request/response instrument behaves on the wire.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Result, Transport, TransportError};

#[derive(Debug, Default)]
struct MockState {
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    input_resets: usize,
    closed: bool,
}

/// In-memory instrument
///
/// Clones share the same state, so a test can hand one clone to an
/// `Instrument` and keep another to inspect traffic.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply that becomes readable after the next write
    pub fn queue_reply(&self, reply: impl AsRef<[u8]>) -> &Self {
        self.state().replies.push_back(reply.as_ref().to_vec());
        self
    }

    /// Make bytes readable immediately (unsolicited output)
    pub fn push_input(&self, bytes: impl AsRef<[u8]>) {
        self.state().rx.extend(bytes.as_ref());
    }

    /// Every frame written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Written frames decoded as text
    pub fn written_text(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    pub fn input_resets(&self) -> usize {
        self.state().input_resets
    }

    /// Make every following operation fail as if the port had gone away
    pub fn close(&self) {
        self.state().closed = true;
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.written.push(bytes.to_vec());
        if let Some(reply) = state.replies.pop_front() {
            state.rx.extend(reply);
        }
        Ok(())
    }

    fn read_until(&mut self, terminator: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let mut received = Vec::new();
        while let Some(byte) = state.rx.pop_front() {
            received.push(byte);
            if !terminator.is_empty() && received.ends_with(terminator) {
                break;
            }
        }
        Ok(received)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        Ok(state.rx.drain(..).collect())
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        let mut state = self.state();
        state.rx.clear();
        state.input_resets += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_released_by_write() {
        let mock = MockTransport::new();
        mock.queue_reply(b"70.00\r");
        let mut transport = mock.clone();

        assert!(transport.read_available().unwrap().is_empty());
        transport.write(b"TTARGET\r").unwrap();
        assert_eq!(
            transport.read_until(b"\r", Duration::ZERO).unwrap(),
            b"70.00\r"
        );
        assert_eq!(mock.written_text(), vec!["TTARGET\r".to_string()]);
    }

    #[test]
    fn test_partial_read_without_terminator() {
        let mut mock = MockTransport::new();
        mock.push_input(b"EOR:9");
        assert_eq!(mock.read_until(b"\n", Duration::ZERO).unwrap(), b"EOR:9");
        assert!(mock.read_until(b"\n", Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn test_closed_transport_fails() {
        let mut mock = MockTransport::new();
        mock.close();
        assert!(matches!(mock.write(b"X"), Err(TransportError::Closed)));
    }
}
