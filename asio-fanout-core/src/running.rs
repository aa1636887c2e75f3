//! The real-time render loop of a started pipeline.
//!
//! Each period: wait for the host, mix its half with the auxiliary sources,
//! hand the mix to every device, advance the clock and give the host the
//! other half.
//!
//! ```text
//! host half ─┐
//! sources  ──┼→ [scratch mix] → DeviceRenderer × N
//!            └→ clock.advance → buffer_switch(next half)
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::driver::resolve_device;
use crate::models::audio_models::{DeviceRecord, StreamMode};
use crate::models::config::DriverPreferences;
use crate::models::error::DriverError;
use crate::models::state::RunningPhase;
use crate::prepared::Pipeline;
use crate::processing::sample_format::accumulate;
use crate::renderer::DeviceRenderer;
use crate::source::{AudioSource, LoopbackSource, ToneSource, ToneTrigger};
use crate::traits::audio_backend::AudioBackend;

/// Upper bound on any single wait of the render thread, so that a stop
/// request is always noticed.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct SignalState {
    output_ready: bool,
    stop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Ready,
    Stop,
    Timeout,
}

/// Output-ready and stop flags, guarded by the condvar's own lock.
pub(crate) struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                output_ready: true,
                stop: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Arm for a new run: the first period doesn't wait for the host.
    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.output_ready = true;
        s.stop = false;
    }

    pub fn notify_ready(&self) {
        let mut s = self.state.lock();
        s.output_ready = true;
        self.cond.notify_one();
    }

    pub fn request_stop(&self) {
        let mut s = self.state.lock();
        s.stop = true;
        self.cond.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().stop
    }

    /// Wait until the host is ready or a stop is requested. Consumes the
    /// ready flag.
    pub fn wait(&self, timeout: Duration) -> Wake {
        let mut s = self.state.lock();
        if !s.output_ready && !s.stop {
            self.cond
                .wait_while_for(&mut s, |s| !s.output_ready && !s.stop, timeout);
        }
        if s.stop {
            Wake::Stop
        } else if s.output_ready {
            s.output_ready = false;
            Wake::Ready
        } else {
            Wake::Timeout
        }
    }
}

/// Result of one [`RenderEngine::run_period`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOutcome {
    Rendered,
    /// The host was not ready within the timeout.
    Idle,
    Stopped,
}

/// Everything the render thread owns: renderers, sources and the scratch
/// mix. Driven one period at a time.
pub struct RenderEngine {
    pipeline: Arc<Pipeline>,
    renderers: Vec<DeviceRenderer>,
    sources: Vec<AudioSource>,
    active_channels: Vec<bool>,
    scratch: Vec<Vec<i32>>,
}

impl RenderEngine {
    /// Open every output (the first one exclusive) and every configured
    /// source. Anything opened before a failure is released again.
    pub(crate) fn build(
        pipeline: Arc<Pipeline>,
        backend: &Arc<dyn AudioBackend>,
        devices: &[Arc<DeviceRecord>],
        prefs: &DriverPreferences,
        active_channels: Vec<bool>,
        tone_trigger: &ToneTrigger,
    ) -> Result<Self, DriverError> {
        let sample_rate = pipeline.sample_rate;
        let channels = pipeline.channel_count;
        let buffer_size = pipeline.buffer_size;

        let mut renderers = Vec::with_capacity(devices.len());
        for (i, device) in devices.iter().enumerate() {
            let mode = if i == 0 { StreamMode::Exclusive } else { StreamMode::Shared };
            renderers.push(DeviceRenderer::open(
                backend.as_ref(),
                Arc::clone(device),
                mode,
                sample_rate,
                channels,
                buffer_size,
                prefs.buffer_size_request,
            )?);
        }

        let mut sources = Vec::new();
        if let Some(loopback) = &prefs.loopback {
            let device = resolve_device(backend.as_ref(), &loopback.device_id)?
                .ok_or_else(|| DriverError::DeviceNotAvailable(loopback.device_id.clone()))?;
            if devices.iter().any(|d| d.id == device.id) {
                log::warn!(
                    "{}: loopback device is also an output target, expect feedback",
                    device.id
                );
            }
            let source = LoopbackSource::open(
                Arc::clone(backend),
                device,
                channels,
                sample_rate,
                buffer_size,
                loopback.intercept_default_output,
            )?;
            sources.push(AudioSource::from(source));
        }
        if let Some(cue) = &prefs.tone_cue {
            let source = ToneSource::cue(sample_rate, cue.gain, tone_trigger.clone())?;
            sources.push(AudioSource::from(source));
        }
        for source in &sources {
            log::info!("mixing auxiliary source {}", source.label());
        }

        Ok(Self {
            renderers,
            sources,
            active_channels,
            scratch: vec![vec![0; buffer_size]; channels as usize],
            pipeline,
        })
    }

    pub fn renderers(&self) -> &[DeviceRenderer] {
        &self.renderers
    }

    pub fn sources(&self) -> &[AudioSource] {
        &self.sources
    }

    /// Render one period, waiting at most `timeout` for the host and again
    /// at most `timeout` for the primary device.
    pub fn run_period(&mut self, timeout: Duration) -> PeriodOutcome {
        match self.pipeline.signal.wait(timeout) {
            Wake::Stop => return PeriodOutcome::Stopped,
            Wake::Timeout => {
                for renderer in &mut self.renderers {
                    renderer.pump();
                }
                return PeriodOutcome::Idle;
            }
            Wake::Ready => {}
        }

        if let Some(primary) = self.renderers.first_mut() {
            if !primary.wait_for_room(timeout) {
                log::debug!(
                    "{}: no room after {:?}, rendering anyway",
                    primary.device().id,
                    timeout
                );
            }
        }
        if self.pipeline.signal.is_stopping() {
            return PeriodOutcome::Stopped;
        }

        let buffers = &self.pipeline.buffers;
        let index = buffers.index();
        for channel in &mut self.scratch {
            channel.fill(0);
        }
        {
            let half = buffers.lock_half(index);
            let channels = self.scratch.iter_mut().zip(half.iter()).zip(&self.active_channels);
            for ((mix, host), active) in channels {
                if *active {
                    accumulate(mix, host);
                }
            }
        }

        let current_frame = self.pipeline.clock.position().0;
        for source in &mut self.sources {
            source.render(current_frame, &mut self.scratch);
        }

        for renderer in &mut self.renderers {
            renderer.push(&self.scratch);
        }

        let primary = self.renderers.first().map(DeviceRenderer::position);
        self.pipeline.clock.advance(self.pipeline.buffer_size as u64, primary);

        let next = buffers.toggle();
        self.pipeline.callbacks.buffer_switch(next, true);
        PeriodOutcome::Rendered
    }
}

/// A started pipeline: the render thread and its stop control.
pub struct RunningState {
    pipeline: Arc<Pipeline>,
    phase: Arc<Mutex<RunningPhase>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RunningState {
    pub(crate) fn start(
        pipeline: Arc<Pipeline>,
        backend: Arc<dyn AudioBackend>,
        devices: &[Arc<DeviceRecord>],
        prefs: &DriverPreferences,
        active_channels: Vec<bool>,
        tone_trigger: &ToneTrigger,
    ) -> Result<Self, DriverError> {
        if !pipeline.join_retired() {
            return Err(DriverError::InvalidMode(
                "start requested from the render thread".into(),
            ));
        }

        let phase = Arc::new(Mutex::new(RunningPhase::Created));
        let mut engine = RenderEngine::build(
            Arc::clone(&pipeline),
            &backend,
            devices,
            prefs,
            active_channels,
            tone_trigger,
        )?;

        pipeline.signal.reset();
        pipeline.clock.stamp();

        let thread_phase = Arc::clone(&phase);
        let handle = thread::Builder::new()
            .name("asio-fanout-render".into())
            .spawn(move || {
                backend.promote_render_thread();
                log::info!("render thread started");
                let mut periods = 0u64;
                loop {
                    match engine.run_period(WAIT_TIMEOUT) {
                        PeriodOutcome::Rendered => periods += 1,
                        PeriodOutcome::Idle => {
                            log::trace!("host not ready within {:?}", WAIT_TIMEOUT)
                        }
                        PeriodOutcome::Stopped => break,
                    }
                }
                // Streams are released here, before the join returns.
                drop(engine);
                *thread_phase.lock() = RunningPhase::Stopped;
                log::info!("render thread stopped after {} periods", periods);
            })
            .map_err(|e| DriverError::ThreadSpawn(format!("render thread: {}", e)))?;

        {
            let mut p = phase.lock();
            if *p == RunningPhase::Created {
                *p = RunningPhase::Running;
            }
        }

        Ok(Self {
            pipeline,
            phase,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn phase(&self) -> RunningPhase {
        *self.phase.lock()
    }

    pub fn signal_output_ready(&self) {
        self.pipeline.signal.notify_ready();
    }

    /// Stop the render thread and wait for it. Repeated calls return
    /// immediately.
    ///
    /// Called from the render thread itself (a host stopping from inside
    /// `buffer_switch`), this only requests the stop: the loop exits once the
    /// callback returns and releases the devices on its own.
    pub fn stop(&self) {
        {
            let mut p = self.phase.lock();
            if !p.is_stopping() {
                *p = RunningPhase::Stopping;
            }
        }
        self.pipeline.signal.request_stop();

        let handle = self.thread.lock().take();
        match handle {
            Some(handle) if handle.thread().id() == thread::current().id() => {
                // The thread marks itself stopped on exit.
                log::debug!("stop requested from the render thread, detaching");
                *self.pipeline.retired.lock() = Some(handle);
                return;
            }
            Some(handle) => {
                if handle.join().is_err() {
                    log::error!("render thread panicked");
                }
            }
            None => {}
        }
        *self.phase.lock() = RunningPhase::Stopped;
    }
}

impl Drop for RunningState {
    fn drop(&mut self) {
        self.stop();
    }
}
