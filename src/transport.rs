//! Line based serial transport.
//!
//! The transport owns the physical connection. Any byte port implementing [embedded_io::Read] &
//! [embedded_io::Write] can be used; a [Connector] produces one when the transport is opened.
//!
//! The PSU needs time to settle after every line it receives or sends. Skipping the pause gives
//! corrupted or stale replies, so [SerialTransport] sleeps for
//! [SerialSettings::settle_delay] after every write and every read.

use std::time::{Duration, Instant};

use embedded_io::{Error as _, ErrorKind, Write as _};
use fugit::MillisDurationU32;
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, DeviceError};

/// Default baud rate of the KD3005P.
pub const BAUD_RATE: u32 = 9600;

/// Fixed serial parameters. Data bits, parity and stop bits are always 8N1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Upper bound for waiting on a reply line.
    pub read_timeout: MillisDurationU32,
    /// Pause after every line written or read.
    pub settle_delay: MillisDurationU32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            read_timeout: MillisDurationU32::millis(1000),
            settle_delay: MillisDurationU32::millis(300),
        }
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout.to_millis().into())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay.to_millis().into())
    }
}

/// Opens a byte port by name.
pub trait Connector: Send {
    type Port: embedded_io::Read + embedded_io::Write + Send;

    fn connect(
        &mut self,
        port_name: &str,
        settings: &SerialSettings,
    ) -> Result<Self::Port, ConnectionError>;
}

/// The contract the driver needs from a transport: an open/close lifecycle and blocking line I/O.
pub trait LineTransport: Send {
    /// Open `port_name`. Fails with [ConnectionError::AlreadyOpened] if a port is already open.
    fn open(&mut self, port_name: &str) -> Result<(), ConnectionError>;

    /// Close the port. Closing a closed transport is a no-op.
    fn close(&mut self) -> Result<(), ConnectionError>;

    fn is_open(&self) -> bool;

    /// Write `line` followed by the line terminator.
    fn write_line(&mut self, line: &str) -> Result<(), DeviceError>;

    /// Read one line, without its terminator, waiting at most `timeout`.
    fn read_line(&mut self, timeout: Duration) -> Result<String, DeviceError>;

    /// Timeout to use for replies when the caller has no better idea.
    fn read_timeout(&self) -> Duration;
}

/// [LineTransport] over a port produced by a [Connector].
///
/// `L` is the longest reply line accepted, in bytes.
pub struct SerialTransport<C: Connector, const L: usize = 64> {
    connector: C,
    settings: SerialSettings,
    port: Option<C::Port>,
    port_name: Option<String>,
}

impl<C: Connector, const L: usize> SerialTransport<C, L> {
    pub fn new(connector: C, settings: SerialSettings) -> Self {
        Self {
            connector,
            settings,
            port: None,
            port_name: None,
        }
    }

    /// Name of the currently open port.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    fn settle(&self) {
        let delay = self.settings.settle_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

impl<C: Connector, const L: usize> LineTransport for SerialTransport<C, L> {
    fn open(&mut self, port_name: &str) -> Result<(), ConnectionError> {
        if self.port.is_some() {
            warn!(port = port_name, "{}", ConnectionError::AlreadyOpened);
            return Err(ConnectionError::AlreadyOpened);
        }
        let port = self.connector.connect(port_name, &self.settings)?;
        debug!(port = port_name, baud = self.settings.baud_rate, "port opened");
        self.port = Some(port);
        self.port_name = Some(port_name.to_owned());
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };
        let name = self.port_name.take().unwrap_or_default();
        // Dropping the port releases it even when the flush fails.
        let flushed = port.flush();
        drop(port);
        match flushed {
            Ok(()) => {
                debug!(port = %name, "port closed");
                Ok(())
            }
            Err(err) => {
                warn!(port = %name, kind = ?err.kind(), "{}", ConnectionError::ErrorInDisconnecting);
                Err(ConnectionError::ErrorInDisconnecting)
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_line(&mut self, line: &str) -> Result<(), DeviceError> {
        let port = self.port.as_mut().ok_or(DeviceError::ConnectionError)?;
        if line.is_empty() {
            return Err(DeviceError::DataIsNull);
        }
        trace!(line, "write");
        let result = port
            .write_all(line.as_bytes())
            .and_then(|()| port.write_all(b"\n"))
            .and_then(|()| port.flush())
            .map_err(|err| classify(err.kind()));
        self.settle();
        if let Err(err) = result {
            warn!(line, error = %err, "write failed");
        }
        result
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String, DeviceError> {
        let port = self.port.as_mut().ok_or(DeviceError::ConnectionError)?;
        let result = read_until_newline::<_, L>(port, timeout);
        self.settle();
        let bytes = result.inspect_err(|err| warn!(error = %err, "read failed"))?;

        let line = core::str::from_utf8(&bytes).map_err(|_| DeviceError::InvalidResponse)?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return Err(DeviceError::DataIsNull);
        }
        trace!(line, "read");
        Ok(line.to_owned())
    }

    fn read_timeout(&self) -> Duration {
        self.settings.read_timeout()
    }
}

/// Read single bytes until `\n`, so nothing after the terminator is consumed.
///
/// A line longer than `L` is still consumed up to its terminator before it is reported as
/// [DeviceError::InvalidResponse], so its tail is not taken for the next reply.
fn read_until_newline<P: embedded_io::Read, const L: usize>(
    port: &mut P,
    timeout: Duration,
) -> Result<heapless::Vec<u8, L>, DeviceError> {
    let deadline = Instant::now() + timeout;
    let mut line: heapless::Vec<u8, L> = heapless::Vec::new();
    let mut overflowed = false;
    let mut byte = [0u8; 1];
    loop {
        match port.read(&mut byte) {
            Ok(0) => {}
            Ok(_) if byte[0] == b'\n' && overflowed => return Err(DeviceError::InvalidResponse),
            Ok(_) if byte[0] == b'\n' => return Ok(line),
            Ok(_) => overflowed |= line.push(byte[0]).is_err(),
            Err(err) => match err.kind() {
                ErrorKind::TimedOut | ErrorKind::Interrupted => {}
                kind => return Err(classify(kind)),
            },
        }
        if Instant::now() >= deadline {
            return Err(if overflowed {
                DeviceError::InvalidResponse
            } else {
                DeviceError::Timeout
            });
        }
    }
}

fn classify(kind: ErrorKind) -> DeviceError {
    match kind {
        ErrorKind::TimedOut => DeviceError::Timeout,
        _ => DeviceError::ConnectionError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::{MockConnector, MockSerial, MockSerialError};

    fn transport(mock: &MockSerial) -> SerialTransport<MockConnector> {
        let settings = SerialSettings {
            read_timeout: MillisDurationU32::millis(20),
            settle_delay: MillisDurationU32::millis(0),
            ..SerialSettings::default()
        };
        SerialTransport::new(MockConnector::new(mock.clone()), settings)
    }

    #[test]
    fn default_settings_match_reference_hardware() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.read_timeout(), Duration::from_millis(1000));
        assert_eq!(settings.settle_delay(), Duration::from_millis(300));
    }

    #[test]
    fn second_open_is_rejected() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        transport.open("COM5").unwrap();
        assert_eq!(transport.open("COM5"), Err(ConnectionError::AlreadyOpened));
        assert_eq!(transport.port_name(), Some("COM5"));
        assert_eq!(mock.open_count(), 1);
    }

    #[test]
    fn connector_failure_leaves_transport_closed() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        mock.fail_next_connect(ConnectionError::UnauthorizedAccess);
        assert_eq!(
            transport.open("COM5"),
            Err(ConnectionError::UnauthorizedAccess)
        );
        assert!(!transport.is_open());
        transport.open("COM5").unwrap();
    }

    #[test]
    fn write_line_appends_terminator() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        transport.open("COM5").unwrap();
        transport.write_line("VSET1:5").unwrap();
        transport.write_line("OUT1").unwrap();
        assert_eq!(mock.written_lines(), vec!["VSET1:5", "OUT1"]);
    }

    #[test]
    fn io_on_closed_transport_is_a_connection_error() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        assert_eq!(
            transport.write_line("OUT1"),
            Err(DeviceError::ConnectionError)
        );
        assert_eq!(
            transport.read_line(Duration::from_millis(1)),
            Err(DeviceError::ConnectionError)
        );
    }

    #[test]
    fn empty_write_is_data_is_null() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        transport.open("COM5").unwrap();
        assert_eq!(transport.write_line(""), Err(DeviceError::DataIsNull));
    }

    #[test]
    fn read_line_splits_on_terminator() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        transport.open("COM5").unwrap();
        mock.push_reply("12.00\r");
        mock.push_reply("1.500");
        let timeout = transport.read_timeout();
        assert_eq!(transport.read_line(timeout).unwrap(), "12.00");
        assert_eq!(transport.read_line(timeout).unwrap(), "1.500");
    }

    #[test]
    fn read_line_times_out_without_data() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        transport.open("COM5").unwrap();
        let timeout = transport.read_timeout();
        assert_eq!(transport.read_line(timeout), Err(DeviceError::Timeout));
    }

    #[test]
    fn faults_are_classified() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        transport.open("COM5").unwrap();

        mock.fail_next_write(MockSerialError::Timeout);
        assert_eq!(transport.write_line("OUT1"), Err(DeviceError::Timeout));

        mock.fail_next_write(MockSerialError::SimulatedError);
        assert_eq!(
            transport.write_line("OUT1"),
            Err(DeviceError::ConnectionError)
        );

        mock.fail_next_read(MockSerialError::SimulatedError);
        let timeout = transport.read_timeout();
        assert_eq!(
            transport.read_line(timeout),
            Err(DeviceError::ConnectionError)
        );

        mock.fail_next_read(MockSerialError::InvalidData);
        assert_eq!(
            transport.read_line(timeout),
            Err(DeviceError::ConnectionError)
        );
    }

    #[test]
    fn overlong_reply_is_invalid() {
        let mock = MockSerial::new();
        let mut transport: SerialTransport<MockConnector, 4> = SerialTransport::new(
            MockConnector::new(mock.clone()),
            SerialSettings {
                settle_delay: MillisDurationU32::millis(0),
                ..SerialSettings::default()
            },
        );
        transport.open("COM5").unwrap();
        mock.push_reply("123456");
        mock.push_reply("1.5");
        assert_eq!(
            transport.read_line(Duration::from_millis(20)),
            Err(DeviceError::InvalidResponse)
        );
        // The rest of the long line was discarded with it.
        assert_eq!(transport.read_line(Duration::from_millis(20)).unwrap(), "1.5");
    }

    #[test]
    fn settle_delay_follows_every_line() {
        let mock = MockSerial::new();
        let mut transport: SerialTransport<MockConnector> = SerialTransport::new(
            MockConnector::new(mock.clone()),
            SerialSettings {
                read_timeout: MillisDurationU32::millis(20),
                settle_delay: MillisDurationU32::millis(20),
                ..SerialSettings::default()
            },
        );
        transport.open("COM5").unwrap();
        let timeout = transport.read_timeout();

        mock.push_reply("12.00");
        let start = Instant::now();
        transport.write_line("VOUT1?").unwrap();
        assert_eq!(transport.read_line(timeout).unwrap(), "12.00");
        assert!(start.elapsed() >= Duration::from_millis(40));

        mock.fail_next_write(MockSerialError::SimulatedError);
        let start = Instant::now();
        assert_eq!(
            transport.write_line("OUT1"),
            Err(DeviceError::ConnectionError)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn close_is_idempotent_and_allows_reopen() {
        let mock = MockSerial::new();
        let mut transport = transport(&mock);
        transport.open("COM5").unwrap();
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(!transport.is_open());
        transport.open("COM6").unwrap();
        assert_eq!(transport.port_name(), Some("COM6"));
    }
}
