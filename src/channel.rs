//! Per channel state: commanded setpoints, measured values and when they last changed.

use chrono::{DateTime, Utc};

use crate::{
    error::{ControlError, DeviceError, ValidationError},
    types::{Attribute, ControlMode},
};

/// Hook points around a change of a commanded value.
///
/// [Channel::set_desired] calls them in order: `validate`, `apply`, commit, `on_changed`. The
/// value is committed only when both `validate` and `apply` succeed.
pub trait ParameterHooks {
    /// Pre-commit check. Rejecting here means nothing else happens.
    fn validate(&mut self, attribute: Attribute, value: f64) -> Result<(), ValidationError>;

    /// Push the value to wherever it takes effect, e.g. the hardware.
    fn apply(&mut self, _attribute: Attribute, _value: f64) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Post-commit notification.
    fn on_changed(&mut self, _attribute: Attribute, _value: f64) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    index: usize,
    name: String,
    desired_volts: f64,
    desired_amps: f64,
    actual_volts: f64,
    actual_amps: f64,
    /// `None` until the first measurement arrives.
    last_update: Option<DateTime<Utc>>,
    control_mode: ControlMode,
}

impl Channel {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            name: format!("Ch{index}"),
            desired_volts: 0.0,
            desired_amps: 0.0,
            actual_volts: 0.0,
            actual_amps: 0.0,
            last_update: None,
            control_mode: ControlMode::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desired_volts(&self) -> f64 {
        self.desired_volts
    }

    pub fn desired_amps(&self) -> f64 {
        self.desired_amps
    }

    pub fn actual_volts(&self) -> f64 {
        self.actual_volts
    }

    pub fn actual_amps(&self) -> f64 {
        self.actual_amps
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    pub fn desired(&self, attribute: Attribute) -> f64 {
        match attribute {
            Attribute::DesiredVolts => self.desired_volts,
            Attribute::DesiredAmps => self.desired_amps,
        }
    }

    /// Change a commanded value through `hooks`. On any error the previous value is kept.
    pub fn set_desired(
        &mut self,
        attribute: Attribute,
        value: f64,
        hooks: &mut dyn ParameterHooks,
    ) -> Result<(), ControlError> {
        hooks.validate(attribute, value)?;
        hooks.apply(attribute, value)?;
        match attribute {
            Attribute::DesiredVolts => self.desired_volts = value,
            Attribute::DesiredAmps => self.desired_amps = value,
        }
        hooks.on_changed(attribute, value);
        Ok(())
    }

    /// Store a measurement and stamp it with the current time.
    pub(crate) fn record_measurement(&mut self, voltage: f64, current: f64) {
        self.actual_volts = voltage;
        self.actual_amps = current;
        self.last_update = Some(Utc::now());
    }

    pub(crate) fn set_control_mode(&mut self, mode: ControlMode) {
        self.control_mode = mode;
    }
}
