//! The device controller: owns the channel collection and routes commanded values to the HAL and
//! measured values from the announcer into the channels.
//!
//! Locking: transport I/O is serialized by one mutex around the HAL, and every channel has its own
//! mutex. A setpoint change holds the channel lock across validation, the HAL call and the commit,
//! so a rejected or failed write can never be half applied. Locks are always taken channel first,
//! HAL second; the announcer releases the HAL before it touches a channel.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    announcer::{Announcer, DEFAULT_POLL_INTERVAL, SampleSink, SampleSource},
    channel::{Channel, ParameterHooks},
    error::{ConnectionError, ControlError, DeviceError, ValidationError},
    hal::PowerSupplyHal,
    types::{Attribute, ControlMode, Limits, Sample},
    validator::PortValidator,
};

/// The operations exposed to remote callers (RPC layer, cloud commands).
pub trait PowerSupplyControl: Send + Sync {
    fn set_volts(&self, channel: usize, volts: f64) -> Result<(), ControlError>;

    fn set_amps(&self, channel: usize, amps: f64) -> Result<(), ControlError>;

    fn all_channels_on(&self) -> Result<(), DeviceError>;

    fn all_channels_off(&self) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    /// The port may be open but the device did not respond as expected.
    Error,
}

/// Post-commit notifications for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    SetpointChanged {
        channel: usize,
        attribute: Attribute,
        value: f64,
    },
    MeasurementChanged(Sample),
}

/// State shared with the announcer thread.
struct Shared<H> {
    hal: Mutex<H>,
    /// Fixed at construction, indexed by channel number.
    channels: Vec<Mutex<Channel>>,
    limits: Limits,
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
}

impl<H: PowerSupplyHal> Shared<H> {
    fn channel(&self, index: usize) -> Result<&Mutex<Channel>, ValidationError> {
        self.channels
            .get(index)
            .ok_or(ValidationError::NoSuchChannel {
                channel: index,
                count: self.channels.len(),
            })
    }

    fn publish(&self, event: DeviceEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl<H: PowerSupplyHal> SampleSource for Shared<H> {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn fetch_sample(&self, channel: usize) -> Result<Sample, DeviceError> {
        self.hal.lock().fetch_sample(channel)
    }
}

impl<H: PowerSupplyHal> SampleSink for Shared<H> {
    fn on_sample_changed(&self, sample: Sample) {
        let Ok(slot) = self.channel(sample.channel) else {
            warn!(channel = sample.channel, "sample for unknown channel dropped");
            return;
        };
        slot.lock()
            .record_measurement(sample.voltage, sample.current);
        self.publish(DeviceEvent::MeasurementChanged(sample));
    }
}

/// Validates against the device limits and applies through the HAL.
struct SetpointHooks<'a, H> {
    shared: &'a Shared<H>,
    channel: usize,
}

impl<H: PowerSupplyHal> ParameterHooks for SetpointHooks<'_, H> {
    fn validate(&mut self, attribute: Attribute, value: f64) -> Result<(), ValidationError> {
        self.shared.limits.check(attribute, value)
    }

    fn apply(&mut self, attribute: Attribute, value: f64) -> Result<(), DeviceError> {
        let mut hal = self.shared.hal.lock();
        match attribute {
            Attribute::DesiredVolts => hal.set_desired_volts(self.channel, value),
            Attribute::DesiredAmps => hal.set_desired_amps(self.channel, value),
        }
    }

    fn on_changed(&mut self, attribute: Attribute, value: f64) {
        self.shared.publish(DeviceEvent::SetpointChanged {
            channel: self.channel,
            attribute,
            value,
        });
    }
}

pub struct Device<H: PowerSupplyHal + 'static> {
    name: String,
    identification: String,
    shared: Arc<Shared<H>>,
    validator: Box<dyn PortValidator>,
    poll_interval: Duration,
    /// Also serializes connect and disconnect.
    state: Mutex<ConnectionState>,
    announcer: Mutex<Option<Announcer>>,
}

impl<H: PowerSupplyHal + 'static> Device<H> {
    /// Create the device and one channel per channel reported by `hal`.
    pub fn new(name: impl Into<String>, hal: H, validator: impl PortValidator + 'static) -> Self {
        let limits = Limits {
            max_volts: hal.max_voltage_in_volts(),
            max_amps: hal.max_current_in_ampere(),
        };
        let channels = (0..hal.number_of_channels())
            .map(|index| Mutex::new(Channel::new(index)))
            .collect();
        let identification = hal.identification().to_owned();
        Self {
            name: name.into(),
            identification,
            shared: Arc::new(Shared {
                hal: Mutex::new(hal),
                channels,
                limits,
                subscribers: Mutex::new(Vec::new()),
            }),
            validator: Box::new(validator),
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(ConnectionState::Closed),
            announcer: Mutex::new(None),
        }
    }

    /// Pause between two polling sweeps.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identification(&self) -> &str {
        &self.identification
    }

    pub fn max_volts(&self) -> f64 {
        self.shared.limits.max_volts
    }

    pub fn max_amps(&self) -> f64 {
        self.shared.limits.max_amps
    }

    pub fn number_of_channels(&self) -> usize {
        self.shared.channels.len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Snapshot of one channel.
    pub fn channel(&self, index: usize) -> Option<Channel> {
        self.shared
            .channels
            .get(index)
            .map(|slot| slot.lock().clone())
    }

    /// Snapshot of all channels, in index order.
    pub fn channels(&self) -> Vec<Channel> {
        self.shared
            .channels
            .iter()
            .map(|slot| slot.lock().clone())
            .collect()
    }

    /// Receive every setpoint and measurement change from now on.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Run `f` with read access to the driver, e.g. to inspect what the device reported.
    ///
    /// Commands go through the device so limits and the channel model stay in force.
    pub fn with_hal_ref<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.shared.hal.lock())
    }

    #[cfg(test)]
    pub(crate) fn with_hal<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.shared.hal.lock())
    }

    /// Open the driver and start polling.
    ///
    /// On failure the device is left closed, or in [ConnectionState::Error] when the port stayed
    /// open, and hardware commands will fail until a later connect succeeds.
    pub fn connect(&self, init_string: &str) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        let opened = self
            .shared
            .hal
            .lock()
            .open(init_string, self.validator.as_ref());
        if let Err(err) = opened {
            if err != ConnectionError::AlreadyOpened {
                *state = if self.shared.hal.lock().is_open() {
                    ConnectionState::Error
                } else {
                    ConnectionState::Closed
                };
            }
            error!(device = %self.name, init_string, error = %err, "connect failed");
            return Err(err);
        }

        let source: Arc<dyn SampleSource> = self.shared.clone();
        let sink: Arc<dyn SampleSink> = self.shared.clone();
        match Announcer::spawn(source, sink, self.poll_interval) {
            Ok(announcer) => {
                *self.announcer.lock() = Some(announcer);
                *state = ConnectionState::Open;
                info!(device = %self.name, init_string, "connected");
                Ok(())
            }
            Err(err) => {
                *state = ConnectionState::Error;
                error!(device = %self.name, error = %err, "could not start announcer");
                Err(ConnectionError::UnknownError)
            }
        }
    }

    /// Stop polling, then close the driver. Waits for I/O in flight.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        let announcer = self.announcer.lock().take();
        if let Some(announcer) = announcer {
            announcer.stop();
        }
        if *state == ConnectionState::Closed {
            return Ok(());
        }
        let result = self.shared.hal.lock().close();
        match result {
            Ok(()) => {
                *state = ConnectionState::Closed;
                info!(device = %self.name, "disconnected");
            }
            Err(err) => {
                *state = ConnectionState::Error;
                error!(device = %self.name, error = %err, "disconnect failed");
            }
        }
        result
    }

    pub fn set_volts(&self, channel: usize, volts: f64) -> Result<(), ControlError> {
        self.set_desired(channel, Attribute::DesiredVolts, volts)
    }

    pub fn set_amps(&self, channel: usize, amps: f64) -> Result<(), ControlError> {
        self.set_desired(channel, Attribute::DesiredAmps, amps)
    }

    /// Select the regulation mode of a channel. The mode is recorded only if the driver accepts it.
    pub fn set_control_mode(&self, channel: usize, mode: ControlMode) -> Result<(), ControlError> {
        let mut slot = self.shared.channel(channel)?.lock();
        self.shared.hal.lock().set_mode(channel, mode)?;
        slot.set_control_mode(mode);
        Ok(())
    }

    /// Switch all outputs on. On/off state is not tracked in the model.
    pub fn all_channels_on(&self) -> Result<(), DeviceError> {
        self.shared.hal.lock().all_on()
    }

    /// Switch all outputs off. On/off state is not tracked in the model.
    pub fn all_channels_off(&self) -> Result<(), DeviceError> {
        self.shared.hal.lock().all_off()
    }

    /// Deliver a changed measurement. This is the only way actual values change.
    pub fn on_sample_changed(&self, sample: Sample) {
        self.shared.on_sample_changed(sample);
    }

    fn set_desired(
        &self,
        channel: usize,
        attribute: Attribute,
        value: f64,
    ) -> Result<(), ControlError> {
        let mut slot = self.shared.channel(channel)?.lock();
        let mut hooks = SetpointHooks {
            shared: &*self.shared,
            channel,
        };
        match slot.set_desired(attribute, value, &mut hooks) {
            Ok(()) => {
                debug!(channel, %attribute, value, "setpoint applied");
                Ok(())
            }
            Err(err) => {
                error!(channel, %attribute, value, error = %err, "setpoint rejected");
                Err(err)
            }
        }
    }
}

impl<H: PowerSupplyHal + 'static> PowerSupplyControl for Device<H> {
    fn set_volts(&self, channel: usize, volts: f64) -> Result<(), ControlError> {
        Device::set_volts(self, channel, volts)
    }

    fn set_amps(&self, channel: usize, amps: f64) -> Result<(), ControlError> {
        Device::set_amps(self, channel, amps)
    }

    fn all_channels_on(&self) -> Result<(), DeviceError> {
        Device::all_channels_on(self)
    }

    fn all_channels_off(&self) -> Result<(), DeviceError> {
        Device::all_channels_off(self)
    }
}

impl<H: PowerSupplyHal + 'static> Drop for Device<H> {
    fn drop(&mut self) {
        if self.connection_state() != ConnectionState::Closed || self.announcer.lock().is_some() {
            let _ = self.disconnect();
        }
    }
}
