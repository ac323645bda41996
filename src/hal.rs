//! Hardware abstraction contract for a power supply driver.
//!
//! The device controller only talks to this trait, so supporting a second PSU model means writing
//! a new driver that implements it.

use crate::{
    error::{ConnectionError, DeviceError, describe_device_error},
    types::{ControlMode, Sample},
    validator::PortValidator,
};

pub trait PowerSupplyHal: Send {
    /// Open the connection described by `init_string` and identify the device.
    fn open(
        &mut self,
        init_string: &str,
        validator: &dyn PortValidator,
    ) -> Result<(), ConnectionError>;

    fn close(&mut self) -> Result<(), ConnectionError>;

    fn is_open(&self) -> bool;

    /// Model identification string.
    fn identification(&self) -> &str;

    fn number_of_channels(&self) -> usize;

    fn max_voltage_in_volts(&self) -> f64;

    fn max_current_in_ampere(&self) -> f64;

    fn set_desired_volts(&mut self, channel: usize, volts: f64) -> Result<(), DeviceError>;

    fn set_desired_amps(&mut self, channel: usize, amps: f64) -> Result<(), DeviceError>;

    fn get_actual_volts(&mut self, channel: usize) -> Result<f64, DeviceError>;

    fn get_actual_amps(&mut self, channel: usize) -> Result<f64, DeviceError>;

    fn all_on(&mut self) -> Result<(), DeviceError>;

    fn all_off(&mut self) -> Result<(), DeviceError>;

    /// Select the regulation mode of a channel. Drivers without mode control accept and ignore it.
    fn set_mode(&mut self, _channel: usize, _mode: ControlMode) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Human readable name of a numeric device error code.
    fn error_message(&self, code: i32) -> String {
        describe_device_error(code)
    }

    /// Measure one channel: voltage first, then current.
    fn fetch_sample(&mut self, channel: usize) -> Result<Sample, DeviceError> {
        let voltage = self.get_actual_volts(channel)?;
        let current = self.get_actual_amps(channel)?;
        Ok(Sample::new(channel, voltage, current))
    }
}
