//! This crate provides a control core for KORAD programmable bench power supplies.
//!
//! It keeps a per channel model of commanded and measured values, drives the supply through a
//! hardware abstraction, polls measurements in the background and accepts JSON commands from a
//! message source.
//!
//! PSU models which it has been used with:
//! * KD3005P
//!
//! It talks the KORAD ASCII line protocol (`VSET1:12.5`, `IOUT1?`, `OUT1`, `*IDN?`) over a USB
//! serial port.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

pub mod announcer;
pub mod channel;
pub mod codec;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod hal;
pub mod kd3005p;
pub mod serial_port;
pub mod transport;
pub mod types;
pub mod validator;

#[cfg(test)]
mod mock_serial;

pub use device::{ConnectionState, Device, DeviceEvent, PowerSupplyControl};
pub use kd3005p::Kd3005p;
