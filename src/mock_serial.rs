//! We use this mocking module in unit tests to emulate a serial port.
//!
//! [MockSerial] is a cheap handle onto shared state, so a test can keep one clone while the
//! transport under test owns another.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    error::ConnectionError,
    transport::{Connector, SerialSettings},
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSerialError {
    /// Simulated timeout error, also returned when no reply data is queued.
    #[error("simulated timeout")]
    Timeout,
    /// Simulated invalid data error
    #[error("simulated invalid data")]
    InvalidData,
    /// Generic simulated error for testing
    #[error("simulated error")]
    SimulatedError,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::InvalidData => embedded_io::ErrorKind::InvalidData,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

#[derive(Default)]
struct MockState {
    /// Everything written to the port.
    written: Vec<u8>,
    /// Pre-configured reply bytes still to be read.
    replies: VecDeque<u8>,
    write_faults: VecDeque<MockSerialError>,
    read_faults: VecDeque<MockSerialError>,
    connect_faults: VecDeque<ConnectionError>,
    open_count: usize,
}

/// Our mock type used to emulate a serial port.
#[derive(Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply line. The terminator is appended.
    pub fn push_reply(&self, line: &str) {
        let mut state = self.state.lock();
        state.replies.extend(line.bytes());
        state.replies.push_back(b'\n');
    }

    /// Get the data that was written to this mock serial port.
    pub fn written_data(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Written data split into lines, without terminators.
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written_data())
            .lines()
            .map(str::to_owned)
            .collect()
    }

    pub fn clear_written_data(&self) {
        self.state.lock().written.clear();
    }

    /// The next write call fails with `err`.
    pub fn fail_next_write(&self, err: MockSerialError) {
        self.state.lock().write_faults.push_back(err);
    }

    /// The next read call fails with `err`.
    pub fn fail_next_read(&self, err: MockSerialError) {
        self.state.lock().read_faults.push_back(err);
    }

    /// The next connect through a [MockConnector] fails with `err`.
    pub fn fail_next_connect(&self, err: ConnectionError) {
        self.state.lock().connect_faults.push_back(err);
    }

    /// How many times a [MockConnector] handed out this port.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.lock();
        if let Some(err) = state.write_faults.pop_front() {
            return Err(err);
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.lock();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        if state.replies.is_empty() {
            return Err(MockSerialError::Timeout);
        }
        let count = buf.len().min(state.replies.len());
        for (slot, byte) in buf.iter_mut().zip(state.replies.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

/// Hands out clones of one [MockSerial].
pub struct MockConnector {
    serial: MockSerial,
}

impl MockConnector {
    pub fn new(serial: MockSerial) -> Self {
        Self { serial }
    }
}

impl Connector for MockConnector {
    type Port = MockSerial;

    fn connect(
        &mut self,
        _port_name: &str,
        _settings: &SerialSettings,
    ) -> Result<Self::Port, ConnectionError> {
        let mut state = self.serial.state.lock();
        if let Some(err) = state.connect_faults.pop_front() {
            return Err(err);
        }
        state.open_count += 1;
        Ok(self.serial.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_write_multiple_times() {
        let mut mock = MockSerial::new();
        mock.write_all(b"Hello, ").unwrap();
        mock.write_all(b"World!").unwrap();
        assert_eq!(mock.written_data(), b"Hello, World!");
    }

    #[test]
    fn test_read_queued_replies() {
        let mut mock = MockSerial::new();
        mock.push_reply("5.00");
        let mut buf = [0u8; 16];
        let count = mock.read(&mut buf).unwrap();
        assert_eq!(&buf[..count], b"5.00\n");
        assert_eq!(mock.read(&mut buf), Err(MockSerialError::Timeout));
    }

    #[test]
    fn test_faults_fire_once() {
        let mut mock = MockSerial::new();
        mock.fail_next_write(MockSerialError::SimulatedError);
        let err = mock.write(b"x").unwrap_err();
        assert_eq!(err.kind(), embedded_io::ErrorKind::Other);
        assert_eq!(mock.write(b"x"), Ok(1));
    }

    #[test]
    fn test_clones_share_state() {
        let mock = MockSerial::new();
        let mut port = mock.clone();
        port.write_all(b"OUT1\nOUT0\n").unwrap();
        assert_eq!(mock.written_lines(), vec!["OUT1", "OUT0"]);
        mock.clear_written_data();
        assert!(mock.written_data().is_empty());
    }
}
