//! [Connector] backed by the `serialport` crate.

use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::{
    error::ConnectionError,
    transport::{Connector, SerialSettings, SerialTransport},
};

/// A serial transport on a real port.
pub type SystemSerialTransport = SerialTransport<SystemPortConnector>;

/// Opens OS serial ports with the fixed 8N1 framing of the PSU.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortConnector;

impl Connector for SystemPortConnector {
    type Port = PortWrapper;

    fn connect(
        &mut self,
        port_name: &str,
        settings: &SerialSettings,
    ) -> Result<Self::Port, ConnectionError> {
        serialport::new(port_name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            // Short per-call timeout; the transport enforces the overall reply deadline.
            .timeout(Duration::from_millis(50))
            .open()
            .map(PortWrapper)
            .map_err(|err| {
                let mapped = map_open_error(&err);
                tracing::error!(port = port_name, error = %err, "{mapped}");
                mapped
            })
    }
}

fn map_open_error(err: &serialport::Error) -> ConnectionError {
    match err.kind() {
        serialport::ErrorKind::NoDevice | serialport::ErrorKind::InvalidInput => {
            ConnectionError::InvalidName
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            ConnectionError::UnauthorizedAccess
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => ConnectionError::InvalidName,
        serialport::ErrorKind::Io(_) => ConnectionError::IoError,
        serialport::ErrorKind::Unknown => ConnectionError::UnknownError,
    }
}

/// Adapts a boxed [SerialPort] to [embedded_io::Read] & [embedded_io::Write].
pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                embedded_io::ErrorKind::TimedOut
            }
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}
