//! ASCII command set of the KORAD KD3005P.
//!
//! Channels are 0-based everywhere in this crate and 1-based on the wire. This module is the only
//! place where that conversion happens. Numbers are always written and read with `.` as the
//! decimal separator, independent of any locale.

use core::fmt;

use crate::{error::DeviceError, types::State};

/// Identification query.
pub const IDN: &str = "*IDN?";

/// A single command line understood by the PSU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `VSET<n>:<volts>`
    SetVoltage { channel: usize, volts: f64 },
    /// `ISET<n>:<amps>`
    SetCurrent { channel: usize, amps: f64 },
    /// `VOUT<n>?`
    QueryVoltage { channel: usize },
    /// `IOUT<n>?`
    QueryCurrent { channel: usize },
    /// `OUT<n>`, written after a setpoint to apply it.
    ///
    /// For channel 0 this is the same line as `Output(State::On)`, so [Command::parse] reads it
    /// back as the latter.
    Apply { channel: usize },
    /// `OUT1` / `OUT0`, switches all outputs.
    Output(State),
    /// `*IDN?`
    Identify,
}

impl Command {
    /// Decode a command line as captured from the wire. Returns `None` for anything that is not
    /// part of the command set.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line == IDN {
            return Some(Command::Identify);
        }
        if let Some(rest) = line.strip_prefix("VSET") {
            let (channel, value) = split_setpoint(rest)?;
            return Some(Command::SetVoltage {
                channel,
                volts: value,
            });
        }
        if let Some(rest) = line.strip_prefix("ISET") {
            let (channel, value) = split_setpoint(rest)?;
            return Some(Command::SetCurrent {
                channel,
                amps: value,
            });
        }
        if let Some(rest) = line.strip_prefix("VOUT") {
            let channel = wire_to_channel(rest.strip_suffix('?')?)?;
            return Some(Command::QueryVoltage { channel });
        }
        if let Some(rest) = line.strip_prefix("IOUT") {
            let channel = wire_to_channel(rest.strip_suffix('?')?)?;
            return Some(Command::QueryCurrent { channel });
        }
        match line.strip_prefix("OUT")? {
            "0" => Some(Command::Output(State::Off)),
            "1" => Some(Command::Output(State::On)),
            other => Some(Command::Apply {
                channel: wire_to_channel(other)?,
            }),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::SetVoltage { channel, volts } => write!(f, "VSET{}:{}", channel + 1, volts),
            Command::SetCurrent { channel, amps } => write!(f, "ISET{}:{}", channel + 1, amps),
            Command::QueryVoltage { channel } => write!(f, "VOUT{}?", channel + 1),
            Command::QueryCurrent { channel } => write!(f, "IOUT{}?", channel + 1),
            Command::Apply { channel } => write!(f, "OUT{}", channel + 1),
            Command::Output(State::On) => f.write_str("OUT1"),
            Command::Output(State::Off) => f.write_str("OUT0"),
            Command::Identify => f.write_str(IDN),
        }
    }
}

/// Parse a numeric reply line. Anything that is not a finite decimal number is an
/// [DeviceError::InvalidResponse].
pub fn parse_reading(reply: &str) -> Result<f64, DeviceError> {
    match reply.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DeviceError::InvalidResponse),
    }
}

fn split_setpoint(rest: &str) -> Option<(usize, f64)> {
    let (channel, value) = rest.split_once(':')?;
    let value = value.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((wire_to_channel(channel)?, value))
}

fn wire_to_channel(digits: &str) -> Option<usize> {
    let wire = digits.parse::<usize>().ok()?;
    wire.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_setpoints_one_based() {
        let cmd = Command::SetVoltage {
            channel: 1,
            volts: 12.5,
        };
        assert_eq!(cmd.to_string(), "VSET2:12.5");

        let cmd = Command::SetCurrent {
            channel: 0,
            amps: 0.25,
        };
        assert_eq!(cmd.to_string(), "ISET1:0.25");

        // Whole numbers carry no trailing fraction.
        let cmd = Command::SetVoltage {
            channel: 0,
            volts: 10.0,
        };
        assert_eq!(cmd.to_string(), "VSET1:10");
    }

    #[test]
    fn encodes_queries_and_outputs() {
        assert_eq!(Command::QueryVoltage { channel: 0 }.to_string(), "VOUT1?");
        assert_eq!(Command::QueryCurrent { channel: 0 }.to_string(), "IOUT1?");
        assert_eq!(Command::Apply { channel: 0 }.to_string(), "OUT1");
        assert_eq!(Command::Output(State::On).to_string(), "OUT1");
        assert_eq!(Command::Output(State::Off).to_string(), "OUT0");
        assert_eq!(Command::Identify.to_string(), "*IDN?");
    }

    #[test]
    fn parses_captured_lines() {
        assert_eq!(
            Command::parse("VSET2:12.5\n"),
            Some(Command::SetVoltage {
                channel: 1,
                volts: 12.5
            })
        );
        assert_eq!(
            Command::parse("IOUT1?"),
            Some(Command::QueryCurrent { channel: 0 })
        );
        assert_eq!(Command::parse("OUT0"), Some(Command::Output(State::Off)));
        assert_eq!(Command::parse("OUT2"), Some(Command::Apply { channel: 1 }));
        assert_eq!(Command::parse("*IDN?"), Some(Command::Identify));
    }

    #[test]
    fn rejects_unknown_or_zero_channel_lines() {
        assert_eq!(Command::parse("VSET0:1.0"), None);
        assert_eq!(Command::parse("VSET1:abc"), None);
        assert_eq!(Command::parse("VOUT1"), None);
        assert_eq!(Command::parse("BEEP1"), None);
    }

    #[test]
    fn parse_reading_is_locale_independent() {
        assert_eq!(parse_reading("12.50\r\n"), Ok(12.5));
        assert_eq!(parse_reading(" 0.000"), Ok(0.0));
        assert_eq!(parse_reading("12,50"), Err(DeviceError::InvalidResponse));
        assert_eq!(parse_reading(""), Err(DeviceError::InvalidResponse));
        assert_eq!(parse_reading("NaN"), Err(DeviceError::InvalidResponse));
        assert_eq!(parse_reading("inf"), Err(DeviceError::InvalidResponse));
    }
}
