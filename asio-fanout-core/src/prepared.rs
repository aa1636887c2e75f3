//! Buffers created for the host, and the start/stop lifecycle around them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};

use crate::clock::{AsioTimeStamp, MonotonicTime, SamplePosition, SynchronizedClock, TimeSource};
use crate::models::audio_models::{BufferInfo, DeviceRecord};
use crate::models::config::DriverPreferences;
use crate::models::error::DriverError;
use crate::models::state::PreparedPhase;
use crate::running::{RunningState, Signal};
use crate::source::ToneTrigger;
use crate::traits::audio_backend::AudioBackend;
use crate::traits::host_callbacks::HostCallbacks;

/// The two halves of the host buffer.
///
/// The render thread drains half [`index`](Self::index) once the host
/// reports it ready, then hands the host the other half through
/// `buffer_switch`. Host and render thread therefore never work on the same
/// half; each half still has its own lock, which is never contended.
pub struct DoubleBuffer {
    halves: [Mutex<Vec<Vec<i32>>>; 2],
    index: AtomicUsize,
    channels: usize,
    frames: usize,
}

impl DoubleBuffer {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            halves: [
                Mutex::new(vec![vec![0; frames]; channels]),
                Mutex::new(vec![vec![0; frames]; channels]),
            ],
            index: AtomicUsize::new(0),
            channels,
            frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Half the render thread drains next, i.e. the half last handed to the
    /// host.
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    /// Switch halves and return the new index.
    pub(crate) fn toggle(&self) -> usize {
        self.index.fetch_xor(1, Ordering::AcqRel) ^ 1
    }

    pub(crate) fn lock_half(&self, half: usize) -> MutexGuard<'_, Vec<Vec<i32>>> {
        self.halves[half & 1].lock()
    }

    pub fn write_channel(
        &self,
        half: usize,
        channel: usize,
        samples: &[i32],
    ) -> Result<(), DriverError> {
        self.check(half, channel)?;
        let mut buffers = self.halves[half].lock();
        let dest = &mut buffers[channel];
        let n = samples.len().min(dest.len());
        dest[..n].copy_from_slice(&samples[..n]);
        dest[n..].fill(0);
        Ok(())
    }

    pub fn read_channel(&self, half: usize, channel: usize) -> Result<Vec<i32>, DriverError> {
        self.check(half, channel)?;
        Ok(self.halves[half].lock()[channel].clone())
    }

    /// Run `f` with mutable access to every channel of `half`.
    pub fn with_half_mut<R>(
        &self,
        half: usize,
        f: impl FnOnce(&mut [Vec<i32>]) -> R,
    ) -> Result<R, DriverError> {
        if half > 1 {
            return Err(DriverError::InvalidParameter(format!("buffer half {}", half)));
        }
        Ok(f(&mut self.halves[half].lock()))
    }

    fn check(&self, half: usize, channel: usize) -> Result<(), DriverError> {
        if half > 1 {
            return Err(DriverError::InvalidParameter(format!("buffer half {}", half)));
        }
        if channel >= self.channels {
            return Err(DriverError::InvalidParameter(format!("channel {}", channel)));
        }
        Ok(())
    }
}

/// State shared by the prepared state and each running pipeline it starts.
pub(crate) struct Pipeline {
    pub buffers: DoubleBuffer,
    pub clock: SynchronizedClock,
    pub signal: Signal,
    /// Render thread that stopped itself from a host callback and could not
    /// be joined there. Joined by the next start.
    pub retired: Mutex<Option<JoinHandle<()>>>,
    pub callbacks: Arc<dyn HostCallbacks>,
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub channel_count: u16,
}

impl Pipeline {
    pub fn new(
        sample_rate: u32,
        buffer_size: usize,
        channel_count: u16,
        callbacks: Arc<dyn HostCallbacks>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            buffers: DoubleBuffer::new(channel_count as usize, buffer_size),
            clock: SynchronizedClock::new(time),
            signal: Signal::new(),
            retired: Mutex::new(None),
            callbacks,
            sample_rate,
            buffer_size,
            channel_count,
        }
    }

    /// Join a retired render thread. Returns `false`, leaving it in place,
    /// when called from that thread.
    pub fn join_retired(&self) -> bool {
        let retired = self.retired.lock().take();
        if let Some(handle) = retired {
            if handle.thread().id() == std::thread::current().id() {
                *self.retired.lock() = Some(handle);
                return false;
            }
            if handle.join().is_err() {
                log::error!("render thread panicked");
            }
        }
        true
    }
}

/// Cloneable way to report `output_ready` without holding the driver, for
/// hosts that answer from inside `buffer_switch`.
#[derive(Clone)]
pub struct OutputReadyHandle {
    pipeline: Weak<Pipeline>,
}

impl OutputReadyHandle {
    pub fn output_ready(&self) {
        if let Some(pipeline) = self.pipeline.upgrade() {
            pipeline.signal.notify_ready();
        }
    }
}

struct Lifecycle {
    phase: PreparedPhase,
    active_channels: Vec<bool>,
    running: Option<RunningState>,
}

/// Host buffers plus everything needed to start the output pipeline.
pub struct PreparedState {
    backend: Arc<dyn AudioBackend>,
    devices: Vec<Arc<DeviceRecord>>,
    prefs: Arc<DriverPreferences>,
    pipeline: Arc<Pipeline>,
    lifecycle: Mutex<Lifecycle>,
    tone_trigger: ToneTrigger,
}

impl PreparedState {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        devices: Vec<Arc<DeviceRecord>>,
        sample_rate: u32,
        buffer_size: usize,
        prefs: Arc<DriverPreferences>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Self {
        Self::with_time_source(
            backend,
            devices,
            sample_rate,
            buffer_size,
            prefs,
            callbacks,
            Arc::new(MonotonicTime::new()),
        )
    }

    pub fn with_time_source(
        backend: Arc<dyn AudioBackend>,
        devices: Vec<Arc<DeviceRecord>>,
        sample_rate: u32,
        buffer_size: usize,
        prefs: Arc<DriverPreferences>,
        callbacks: Arc<dyn HostCallbacks>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let channel_count = prefs.channel_count;
        log::debug!(
            "prepared: {} devices, {} Hz, {} frames x{}",
            devices.len(),
            sample_rate,
            buffer_size,
            channel_count
        );
        Self {
            backend,
            devices,
            prefs,
            pipeline: Arc::new(Pipeline::new(
                sample_rate,
                buffer_size,
                channel_count,
                callbacks,
                time,
            )),
            lifecycle: Mutex::new(Lifecycle {
                phase: PreparedPhase::Constructed,
                active_channels: vec![false; channel_count as usize],
                running: None,
            }),
            tone_trigger: ToneTrigger::new(),
        }
    }

    pub fn phase(&self) -> PreparedPhase {
        self.lifecycle.lock().phase
    }

    pub fn buffer_size(&self) -> usize {
        self.pipeline.buffer_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.pipeline.sample_rate
    }

    pub fn devices(&self) -> &[Arc<DeviceRecord>] {
        &self.devices
    }

    pub fn buffers(&self) -> &DoubleBuffer {
        &self.pipeline.buffers
    }

    /// Validate and record the channels the host created buffers for.
    pub fn init_buffer_info(&self, infos: &[BufferInfo]) -> Result<(), DriverError> {
        let channel_count = self.pipeline.channel_count as i32;
        let mut active = vec![false; channel_count as usize];
        for info in infos {
            if info.is_input {
                return Err(DriverError::InvalidParameter(format!(
                    "input buffer requested for channel {}",
                    info.channel
                )));
            }
            if info.channel < 0 || info.channel >= channel_count {
                return Err(DriverError::InvalidParameter(format!(
                    "channel {} out of range 0..{}",
                    info.channel, channel_count
                )));
            }
            active[info.channel as usize] = true;
        }

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.active_channels = active;
        if lifecycle.phase == PreparedPhase::Constructed {
            lifecycle.phase = PreparedPhase::Ready;
        }
        Ok(())
    }

    pub fn is_channel_active(&self, channel: usize) -> bool {
        self.lifecycle.lock().active_channels.get(channel).copied().unwrap_or(false)
    }

    /// Start the output pipeline. Starting twice is a no-op.
    pub fn start(&self) -> Result<(), DriverError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.phase {
            PreparedPhase::Started => return Ok(()),
            PreparedPhase::Constructed => {
                return Err(DriverError::InvalidMode("buffer info not initialized".into()));
            }
            PreparedPhase::Ready => {}
        }

        let running = RunningState::start(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.backend),
            &self.devices,
            &self.prefs,
            lifecycle.active_channels.clone(),
            &self.tone_trigger,
        )?;
        lifecycle.running = Some(running);
        lifecycle.phase = PreparedPhase::Started;
        Ok(())
    }

    /// Stop the output pipeline and wait for the render thread to exit.
    /// Stopping twice is a no-op. From inside `buffer_switch` the thread
    /// exits right after the callback returns and is joined later.
    pub fn stop(&self) {
        let running = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.phase == PreparedPhase::Started {
                lifecycle.phase = PreparedPhase::Ready;
            }
            lifecycle.running.take()
        };
        // Joined outside the lock; the render thread may be inside a host
        // callback that calls back into us.
        if let Some(running) = running {
            running.stop();
        }
        self.pipeline.join_retired();
    }

    /// The host finished filling the half it was handed.
    ///
    /// Only sets the ready flag. A flag set while stopped has no effect,
    /// since every start re-arms it for an immediate first period.
    pub fn output_ready(&self) {
        self.pipeline.signal.notify_ready();
    }

    pub fn output_ready_handle(&self) -> OutputReadyHandle {
        OutputReadyHandle {
            pipeline: Arc::downgrade(&self.pipeline),
        }
    }

    pub fn request_reset(&self) {
        self.pipeline.callbacks.reset_request();
    }

    pub fn sample_position(&self) -> (SamplePosition, AsioTimeStamp) {
        self.pipeline.clock.query()
    }

    pub fn clock(&self) -> &SynchronizedClock {
        &self.pipeline.clock
    }

    pub fn write_channel(
        &self,
        half: usize,
        channel: usize,
        samples: &[i32],
    ) -> Result<(), DriverError> {
        self.pipeline.buffers.write_channel(half, channel, samples)
    }

    pub fn read_channel(&self, half: usize, channel: usize) -> Result<Vec<i32>, DriverError> {
        self.pipeline.buffers.read_channel(half, channel)
    }

    pub fn with_half_mut<R>(
        &self,
        half: usize,
        f: impl FnOnce(&mut [Vec<i32>]) -> R,
    ) -> Result<R, DriverError> {
        self.pipeline.buffers.with_half_mut(half, f)
    }

    /// Trigger handle of the tone cue. Stays valid across stop/start.
    pub fn tone_trigger(&self) -> ToneTrigger {
        self.tone_trigger.clone()
    }
}

impl Drop for PreparedState {
    fn drop(&mut self) {
        self.stop();
    }
}
