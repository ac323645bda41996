//! Driver for the KORAD KD3005P single channel bench supply.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! Every command is one ASCII line, see [crate::codec].

use tracing::{debug, error, info, warn};

use crate::{
    codec::{self, Command},
    error::{ConnectionError, DeviceError},
    hal::PowerSupplyHal,
    transport::LineTransport,
    types::State,
    validator::PortValidator,
};

pub const IDENTIFICATION: &str = "KORAD KD3005P";
pub const MAX_VOLTAGE_IN_VOLTS: f64 = 30.0;
pub const MAX_CURRENT_IN_AMPERE: f64 = 5.0;
pub const NUMBER_OF_CHANNELS: usize = 1;

/// You can create a Kd3005p using any [LineTransport].
///
/// For its methods, "set" means to write a setpoint and "get actual" means to read back a
/// measured value.
pub struct Kd3005p<T: LineTransport> {
    transport: T,
    /// Reply to `*IDN?` from the last successful open.
    reported_identity: Option<String>,
}

impl<T: LineTransport> Kd3005p<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            reported_identity: None,
        }
    }

    /// What the device answered to `*IDN?`, if it answered.
    pub fn reported_identity(&self) -> Option<&str> {
        self.reported_identity.as_deref()
    }

    fn send(&mut self, command: Command) -> Result<(), DeviceError> {
        debug!(%command, "send");
        self.transport.write_line(&command.to_string())
    }

    fn query(&mut self, command: Command) -> Result<String, DeviceError> {
        self.send(command)?;
        let timeout = self.transport.read_timeout();
        self.transport.read_line(timeout)
    }

    fn query_reading(&mut self, command: Command) -> Result<f64, DeviceError> {
        let reply = self.query(command)?;
        codec::parse_reading(&reply)
            .inspect_err(|_| error!(reply = %reply, "Invalid response from device"))
    }

    /// Write a setpoint and, only if that worked, the matching `OUT` line to apply it.
    fn set_and_apply(&mut self, setpoint: Command, channel: usize) -> Result<(), DeviceError> {
        self.send(setpoint)?;
        // The setpoint already reached the device; a failed apply is reported but not returned.
        if let Err(err) = self.send(Command::Apply { channel }) {
            warn!(channel, error = %err, "apply after setpoint failed");
        }
        Ok(())
    }
}

impl<T: LineTransport> PowerSupplyHal for Kd3005p<T> {
    /// Open the port and ask for identification.
    ///
    /// If the identification cannot be read this returns
    /// [ConnectionError::CommunicationError] but leaves the port open; the caller decides
    /// whether to close or retry.
    fn open(
        &mut self,
        init_string: &str,
        validator: &dyn PortValidator,
    ) -> Result<(), ConnectionError> {
        let Some(port) = validator.port_name(init_string) else {
            error!(init_string, "{}", ConnectionError::InvalidName);
            return Err(ConnectionError::InvalidName);
        };
        self.transport.open(port)?;

        match self.query(Command::Identify) {
            Ok(identity) => {
                info!(port, identity = %identity, "power supply identified");
                self.reported_identity = Some(identity);
                Ok(())
            }
            Err(err) => {
                error!(port, error = %err, "{}", ConnectionError::CommunicationError);
                Err(ConnectionError::CommunicationError)
            }
        }
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        self.reported_identity = None;
        self.transport.close()
    }

    fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    fn identification(&self) -> &str {
        IDENTIFICATION
    }

    fn number_of_channels(&self) -> usize {
        NUMBER_OF_CHANNELS
    }

    fn max_voltage_in_volts(&self) -> f64 {
        MAX_VOLTAGE_IN_VOLTS
    }

    fn max_current_in_ampere(&self) -> f64 {
        MAX_CURRENT_IN_AMPERE
    }

    fn set_desired_volts(&mut self, channel: usize, volts: f64) -> Result<(), DeviceError> {
        self.set_and_apply(Command::SetVoltage { channel, volts }, channel)
    }

    fn set_desired_amps(&mut self, channel: usize, amps: f64) -> Result<(), DeviceError> {
        self.set_and_apply(Command::SetCurrent { channel, amps }, channel)
    }

    fn get_actual_volts(&mut self, channel: usize) -> Result<f64, DeviceError> {
        self.query_reading(Command::QueryVoltage { channel })
    }

    fn get_actual_amps(&mut self, channel: usize) -> Result<f64, DeviceError> {
        self.query_reading(Command::QueryCurrent { channel })
    }

    fn all_on(&mut self) -> Result<(), DeviceError> {
        self.send(Command::Output(State::On))
    }

    fn all_off(&mut self) -> Result<(), DeviceError> {
        self.send(Command::Output(State::Off))
    }
}
