//! Remote command handling: decodes JSON command messages and forwards them to the device.
//!
//! Every received message is acknowledged exactly once, whatever happened to it. Failures are
//! logged and dropped so the loop never stops on a bad message.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{
    device::PowerSupplyControl,
    error::{ControlError, DecodeError, SourceError},
};

/// Default pause between two receive attempts.
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(1000);

/// How long one receive call waits for a message.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// A decoded command message, tagged by its `action` field.
///
/// ```json
/// {"action": "setVoltage", "channel": 0, "voltage": 9.0}
/// {"action": "allChannelsOff"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum CloudCommand {
    SetVoltage { channel: usize, voltage: f64 },
    SetCurrent { channel: usize, current: f64 },
    AllChannelsOn,
    AllChannelsOff,
    /// Any other action name.
    #[serde(other)]
    Unknown,
}

impl CloudCommand {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// What became of one message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Dispatched,
    DecodeFailed,
    ExecuteFailed(ControlError),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: u64,
    pub body: Vec<u8>,
}

/// The inbound side of a message broker.
pub trait CommandSource {
    /// Wait up to `timeout` for the next message.
    fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, SourceError>;

    /// Mark a message as completed so the broker does not deliver it again.
    fn acknowledge(&mut self, message: &InboundMessage) -> Result<(), SourceError>;
}

/// An in-process [CommandSource] fed through a channel.
pub struct QueueSource {
    rx: Receiver<InboundMessage>,
    acknowledged: Arc<Mutex<Vec<u64>>>,
}

/// Sending half of a [QueueSource].
#[derive(Clone)]
pub struct QueueSender {
    tx: Sender<InboundMessage>,
    next_id: Arc<Mutex<u64>>,
}

impl QueueSender {
    /// Queue a payload, returning its message id. Fails once the source is gone.
    pub fn send(&self, body: impl Into<Vec<u8>>) -> Result<u64, SourceError> {
        let id = {
            let mut next_id = self.next_id.lock();
            *next_id += 1;
            *next_id
        };
        self.tx
            .send(InboundMessage {
                id,
                body: body.into(),
            })
            .map_err(|_| SourceError::Disconnected)?;
        Ok(id)
    }
}

pub fn queue_source() -> (QueueSender, QueueSource) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        QueueSender {
            tx,
            next_id: Arc::new(Mutex::new(0)),
        },
        QueueSource {
            rx,
            acknowledged: Arc::new(Mutex::new(Vec::new())),
        },
    )
}

impl QueueSource {
    /// Ids of every acknowledged message, in order.
    pub fn acknowledged(&self) -> Vec<u64> {
        self.acknowledged.lock().clone()
    }
}

impl CommandSource for QueueSource {
    fn receive(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, SourceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Disconnected),
        }
    }

    fn acknowledge(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        self.acknowledged.lock().push(message.id);
        Ok(())
    }
}

pub struct CommandDispatcher<C> {
    control: Arc<C>,
    idle_delay: Duration,
}

impl<C: PowerSupplyControl> CommandDispatcher<C> {
    pub fn new(control: Arc<C>) -> Self {
        Self {
            control,
            idle_delay: DEFAULT_IDLE_DELAY,
        }
    }

    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Decode and execute one payload.
    pub fn handle(&self, payload: &[u8]) -> DispatchOutcome {
        let command = match CloudCommand::decode(payload) {
            Ok(command) => command,
            Err(err) => {
                error!(error = %err, "Error handling message");
                return DispatchOutcome::DecodeFailed;
            }
        };
        debug!(?command, "decoded");

        let result = match command {
            CloudCommand::SetVoltage { channel, voltage } => {
                info!(channel, voltage, "Setting voltage");
                self.control.set_volts(channel, voltage)
            }
            CloudCommand::SetCurrent { channel, current } => {
                info!(channel, current, "Setting current");
                self.control.set_amps(channel, current)
            }
            CloudCommand::AllChannelsOn => {
                info!("Turning all channels ON");
                self.control.all_channels_on().map_err(ControlError::from)
            }
            CloudCommand::AllChannelsOff => {
                info!("Turning all channels OFF");
                self.control.all_channels_off().map_err(ControlError::from)
            }
            CloudCommand::Unknown => {
                warn!("Unknown command action");
                return DispatchOutcome::Unrecognized;
            }
        };

        match result {
            Ok(()) => DispatchOutcome::Dispatched,
            Err(err) => {
                error!(error = %err, "command failed");
                DispatchOutcome::ExecuteFailed(err)
            }
        }
    }

    /// Receive, handle and acknowledge a single message, if one arrives within `timeout`.
    pub fn process_next(
        &self,
        source: &mut dyn CommandSource,
        timeout: Duration,
    ) -> Result<Option<DispatchOutcome>, SourceError> {
        let Some(message) = source.receive(timeout)? else {
            return Ok(None);
        };
        debug!(id = message.id, payload = %String::from_utf8_lossy(&message.body), "received");
        let outcome = self.handle(&message.body);
        if let Err(err) = source.acknowledge(&message) {
            error!(id = message.id, error = %err, "acknowledge failed");
        }
        Ok(Some(outcome))
    }

    /// Process messages until `stop` fires or is dropped, or the source disconnects.
    pub fn run(&self, source: &mut dyn CommandSource, stop: &Receiver<()>) {
        info!("listening for commands");
        loop {
            match self.process_next(source, RECEIVE_TIMEOUT) {
                Ok(_) => {}
                Err(SourceError::Disconnected) => {
                    info!("command source disconnected");
                    break;
                }
                Err(err) => warn!(error = %err, "receive failed"),
            }
            match stop.recv_timeout(self.idle_delay) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("command loop stopped");
    }
}
