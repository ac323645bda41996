//! This module contains value types shared between the driver, the announcer and the channel model.

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumIter};

use crate::error::ValidationError;

/// Represents the two possible power supply control modes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, Display)]
pub enum ControlMode {
    /// Constant voltage regulation mode.
    #[default]
    Cv,
    /// Constant current regulation mode.
    Cc,
}

/// Used to be less ambiguous about whether something is on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Disabled.
    Off,
    /// Enabled.
    On,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

/// Commanded channel attributes that pass through validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Display)]
pub enum Attribute {
    DesiredVolts,
    DesiredAmps,
}

/// One measurement of a channel, as produced by a poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// 0-based channel index.
    pub channel: usize,
    pub voltage: f64,
    pub current: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(channel: usize, voltage: f64, current: f64) -> Self {
        Self {
            channel,
            voltage,
            current,
            timestamp: Utc::now(),
        }
    }

    /// The `(voltage, current)` pair used for change detection.
    pub fn reading(&self) -> (f64, f64) {
        (self.voltage, self.current)
    }
}

/// Device-wide maxima that every commanded value is checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_volts: f64,
    pub max_amps: f64,
}

impl Limits {
    /// Upper bound for the given attribute.
    pub fn max_for(&self, attribute: Attribute) -> f64 {
        match attribute {
            Attribute::DesiredVolts => self.max_volts,
            Attribute::DesiredAmps => self.max_amps,
        }
    }

    /// Accept `value` only when `0 <= value <= max`. NaN never passes.
    pub fn check(&self, attribute: Attribute, value: f64) -> Result<(), ValidationError> {
        let max = self.max_for(attribute);
        if (0.0..=max).contains(&value) {
            Ok(())
        } else {
            Err(ValidationError::OutOfRange {
                attribute,
                value,
                max,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    const LIMITS: Limits = Limits {
        max_volts: 30.0,
        max_amps: 5.0,
    };

    #[test]
    fn limits_accept_inclusive_range() {
        for attribute in Attribute::iter() {
            let max = LIMITS.max_for(attribute);
            assert!(LIMITS.check(attribute, 0.0).is_ok());
            assert!(LIMITS.check(attribute, max).is_ok());
            assert!(LIMITS.check(attribute, max / 2.0).is_ok());
        }
    }

    #[test]
    fn limits_reject_out_of_range_and_nan() {
        assert!(LIMITS.check(Attribute::DesiredVolts, 30.01).is_err());
        assert!(LIMITS.check(Attribute::DesiredAmps, -0.1).is_err());
        assert!(LIMITS.check(Attribute::DesiredAmps, f64::NAN).is_err());
        assert_eq!(
            LIMITS.check(Attribute::DesiredAmps, 10.0),
            Err(ValidationError::OutOfRange {
                attribute: Attribute::DesiredAmps,
                value: 10.0,
                max: 5.0,
            })
        );
    }

    #[test]
    fn state_bool_conversions() {
        assert_eq!(State::from(true), State::On);
        assert!(!bool::from(State::Off));
    }
}
