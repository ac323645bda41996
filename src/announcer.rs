//! Turns periodic hardware reads into discrete "changed" events.
//!
//! The feed is edge triggered: a sample is delivered only when its `(voltage, current)` differs
//! from the last delivered sample of the same channel. A channel starts with no previous sample,
//! so the first successful reading is always delivered, including a reading of zero.

use std::{sync::Arc, thread::JoinHandle, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::{error::DeviceError, types::Sample};

/// Default pause between two sweeps over all channels. The I/O settling delays dominate the
/// actual cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(0);

/// Where samples come from.
pub trait SampleSource: Send + Sync {
    fn channel_count(&self) -> usize;

    fn fetch_sample(&self, channel: usize) -> Result<Sample, DeviceError>;
}

/// Where changed samples go.
pub trait SampleSink: Send + Sync {
    fn on_sample_changed(&self, sample: Sample);
}

/// Per channel memory of the last delivered reading.
#[derive(Debug, Default, Clone)]
pub struct ChangeDetector {
    previous: Vec<Option<(f64, f64)>>,
}

impl ChangeDetector {
    pub fn new(channels: usize) -> Self {
        Self {
            previous: vec![None; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.previous.len()
    }

    /// Returns the sample if it must be delivered, remembering it as the new previous reading.
    pub fn observe(&mut self, sample: Sample) -> Option<Sample> {
        if sample.channel >= self.previous.len() {
            self.previous.resize(sample.channel + 1, None);
        }
        let slot = &mut self.previous[sample.channel];
        let reading = sample.reading();
        if *slot == Some(reading) {
            return None;
        }
        *slot = Some(reading);
        Some(sample)
    }
}

/// Sample every channel once and deliver the ones that changed.
///
/// A failed fetch is logged and skipped; it does not touch the channel's previous reading.
/// Returns how many samples were delivered.
pub fn poll_once(
    source: &dyn SampleSource,
    detector: &mut ChangeDetector,
    sink: &dyn SampleSink,
) -> usize {
    (0..detector.channels())
        .filter(|&channel| sample_channel(source, detector, sink, channel))
        .count()
}

fn sample_channel(
    source: &dyn SampleSource,
    detector: &mut ChangeDetector,
    sink: &dyn SampleSink,
    channel: usize,
) -> bool {
    match source.fetch_sample(channel) {
        Ok(sample) => match detector.observe(sample) {
            Some(changed) => {
                debug!(
                    channel,
                    voltage = changed.voltage,
                    current = changed.current,
                    "sample changed"
                );
                sink.on_sample_changed(changed);
                true
            }
            None => false,
        },
        Err(err) => {
            warn!(channel, error = %err, "sample skipped");
            false
        }
    }
}

/// Background polling loop. Stopped and joined on [Announcer::stop] or drop.
pub struct Announcer {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Announcer {
    pub fn spawn(
        source: Arc<dyn SampleSource>,
        sink: Arc<dyn SampleSink>,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let thread = std::thread::Builder::new()
            .name("psu-announcer".into())
            .spawn(move || poll_loop(source, sink, poll_interval, stop_rx))?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the loop and wait for the sweep in flight to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop_tx.take();
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            error!("announcer thread panicked");
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(
    source: Arc<dyn SampleSource>,
    sink: Arc<dyn SampleSink>,
    poll_interval: Duration,
    stop_rx: Receiver<()>,
) {
    // Every start begins without previous readings.
    let mut detector = ChangeDetector::new(source.channel_count());
    info!(channels = detector.channels(), "announcer started");
    'sweeps: loop {
        for channel in 0..detector.channels() {
            if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                break 'sweeps;
            }
            sample_channel(source.as_ref(), &mut detector, sink.as_ref(), channel);
        }
        match stop_rx.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("announcer stopped");
}
