//! Our error types for the KORAD PSU control core.

use strum_macros::{EnumIter, FromRepr, IntoStaticStr};
use thiserror::Error;

use crate::types::Attribute;

pub type Result<T, E = DeviceError> = core::result::Result<T, E>;

/// Failures reported by `open`/`close` of a connection. None of these are retried automatically.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum ConnectionError {
    #[error("Port is already opened")]
    AlreadyOpened,
    #[error("Invalid port name")]
    InvalidName,
    #[error("Unauthorized access to port")]
    UnauthorizedAccess,
    #[error("I/O error on port")]
    IoError,
    #[error("Invalid operation on port")]
    InvalidOperation,
    #[error("Communication with device failed")]
    CommunicationError,
    #[error("Error while disconnecting")]
    ErrorInDisconnecting,
    #[error("Unknown connection error")]
    UnknownError,
}

/// Failures of a single read, write or query against the device.
///
/// A successful operation is `Ok`, so there is no `NoError` variant; numeric code `0` still
/// describes as `"NoError"` through [describe_device_error].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr, IntoStaticStr)]
#[repr(i32)]
pub enum DeviceError {
    #[error("Communication timeout")]
    Timeout = 1,
    #[error("Device connection error")]
    ConnectionError = 2,
    #[error("No data to send or receive")]
    DataIsNull = 3,
    #[error("Invalid response received")]
    InvalidResponse = 4,
}

impl DeviceError {
    /// Numeric code of this error. `0` is reserved for success.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Return the name of a numeric device error code, e.g. `2` -> `"ConnectionError"`.
pub fn describe_device_error(code: i32) -> String {
    if code == 0 {
        return "NoError".into();
    }
    match DeviceError::from_repr(code) {
        Some(err) => <&'static str>::from(err).into(),
        None => format!("Unknown error code: {code}"),
    }
}

/// A commanded value was rejected before reaching the hardware.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ValidationError {
    #[error("{attribute} of {value} is outside 0..={max}")]
    OutOfRange {
        attribute: Attribute,
        value: f64,
        max: f64,
    },
    #[error("Channel {channel} does not exist (device has {count})")]
    NoSuchChannel { channel: usize, count: usize },
}

/// Result of a device controller operation.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A command payload that is not valid JSON or does not match any command shape.
#[derive(Error, Debug)]
#[error("Malformed command: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);

/// Failures of the inbound command channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Command source disconnected")]
    Disconnected,
    #[error("Broker error: {0}")]
    Broker(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn device_error_codes_describe_by_name() {
        for err in DeviceError::iter() {
            let name: &'static str = err.into();
            assert_eq!(describe_device_error(err.code()), name);
        }
        assert_eq!(describe_device_error(0), "NoError");
        assert_eq!(describe_device_error(42), "Unknown error code: 42");
    }

    #[test]
    fn control_error_wraps_both_layers() {
        let err: ControlError = DeviceError::Timeout.into();
        assert_eq!(err, ControlError::Device(DeviceError::Timeout));

        let err: ControlError = ValidationError::NoSuchChannel { channel: 3, count: 1 }.into();
        assert_eq!(err.to_string(), "Channel 3 does not exist (device has 1)");
    }
}
