//! In-memory backend, streams and host used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::TimeSource;
use crate::models::audio_models::{DeviceRecord, StreamFormat, StreamMode, StreamRequest};
use crate::models::error::DriverError;
use crate::processing::sample_format::WireFormat;
use crate::traits::audio_backend::{AudioBackend, CapturePacket, CaptureStream, OutputStream};
use crate::traits::host_callbacks::HostCallbacks;

/// Time source that only moves when told to.
pub struct ManualTime(AtomicU64);

impl ManualTime {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn advance(&self, nanos: u64) {
        self.0.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn set(&self, nanos: u64) {
        self.0.store(nanos, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_nanos(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MockOutputConfig {
    pub native_period: usize,
    pub wire: WireFormat,
    /// Hardware buffer size in frames.
    pub hw_frames: usize,
    /// Play everything queued whenever free space is queried.
    pub auto_play: bool,
    pub fail_write: bool,
}

impl MockOutputConfig {
    pub fn with_period(native_period: usize) -> Self {
        Self {
            native_period,
            wire: WireFormat::Int32,
            hw_frames: native_period * 2,
            auto_play: true,
            fail_write: false,
        }
    }
}

impl Default for MockOutputConfig {
    fn default() -> Self {
        Self::with_period(256)
    }
}

/// Observable state of one mock output stream.
#[derive(Debug, Default)]
pub struct MockOutputState {
    pub mode: Option<StreamMode>,
    pub started: bool,
    pub stopped: bool,
    pub queued: usize,
    pub played: u64,
    pub written_frames: u64,
    pub writes: usize,
    pub bytes: Vec<u8>,
}

struct MockOutput {
    format: StreamFormat,
    config: Arc<Mutex<MockOutputConfig>>,
    state: Arc<Mutex<MockOutputState>>,
}

impl OutputStream for MockOutput {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn native_period(&self) -> usize {
        self.config.lock().native_period
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.state.lock().started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.state.lock().stopped = true;
        Ok(())
    }

    fn free_frames(&mut self) -> Result<usize, DriverError> {
        let config = self.config.lock();
        let mut state = self.state.lock();
        if config.auto_play {
            state.played += state.queued as u64;
            state.queued = 0;
        }
        Ok(config.hw_frames - state.queued)
    }

    fn write(&mut self, data: &[u8], frames: usize) -> Result<(), DriverError> {
        let config = self.config.lock();
        if config.fail_write {
            return Err(DriverError::HardwareMalfunction("device unplugged".into()));
        }
        let mut state = self.state.lock();
        if state.queued + frames > config.hw_frames {
            return Err(DriverError::HardwareMalfunction("buffer too large".into()));
        }
        state.queued += frames;
        state.written_frames += frames as u64;
        state.writes += 1;
        state.bytes.extend_from_slice(data);
        Ok(())
    }

    fn played_frames(&mut self) -> Result<u64, DriverError> {
        Ok(self.state.lock().played)
    }
}

#[derive(Debug, Clone)]
pub struct MockCaptureConfig {
    pub native_rate: u32,
    pub buffer_frames: usize,
    pub channels: u16,
    pub fail_start: bool,
}

impl MockCaptureConfig {
    pub fn new(native_rate: u32, buffer_frames: usize) -> Self {
        Self {
            native_rate,
            buffer_frames,
            channels: 2,
            fail_start: false,
        }
    }
}

#[derive(Default)]
struct MockCaptureState {
    packets: VecDeque<(usize, bool, Vec<i32>)>,
    started: bool,
    stopped: bool,
}

struct MockCapture {
    config: MockCaptureConfig,
    state: Arc<Mutex<MockCaptureState>>,
}

impl CaptureStream for MockCapture {
    fn native_rate(&self) -> u32 {
        self.config.native_rate
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn buffer_frames(&self) -> usize {
        self.config.buffer_frames
    }

    fn start(&mut self) -> Result<(), DriverError> {
        if self.config.fail_start {
            return Err(DriverError::StreamActivation("loopback start refused".into()));
        }
        self.state.lock().started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.state.lock().stopped = true;
        Ok(())
    }

    fn read_packets(
        &mut self,
        sink: &mut dyn FnMut(CapturePacket<'_>),
    ) -> Result<usize, DriverError> {
        let packets: Vec<_> = self.state.lock().packets.drain(..).collect();
        for (frames, silent, samples) in &packets {
            sink(CapturePacket {
                frames: *frames,
                silent: *silent,
                samples,
            });
        }
        Ok(packets.len())
    }
}

/// Backend with a fixed device list and scriptable streams.
pub struct MockBackend {
    devices: Vec<Arc<DeviceRecord>>,
    default_id: Mutex<String>,
    output_configs: Mutex<HashMap<String, Arc<Mutex<MockOutputConfig>>>>,
    output_states: Mutex<HashMap<String, Arc<Mutex<MockOutputState>>>>,
    capture_config: Mutex<MockCaptureConfig>,
    capture_state: Arc<Mutex<MockCaptureState>>,
    failing: Mutex<HashSet<String>>,
    unsupported_rates: Mutex<HashSet<u32>>,
    promoted: AtomicUsize,
}

impl MockBackend {
    /// Devices are named after their ids with a " Speakers" suffix; the first
    /// one is the default output.
    pub fn with_devices(ids: &[&str]) -> Arc<Self> {
        let devices = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Arc::new(DeviceRecord {
                    id: id.to_string(),
                    name: format!("{} Speakers", id),
                    is_default: i == 0,
                })
            })
            .collect();
        Arc::new(Self {
            devices,
            default_id: Mutex::new(ids.first().map(|s| s.to_string()).unwrap_or_default()),
            output_configs: Mutex::new(HashMap::new()),
            output_states: Mutex::new(HashMap::new()),
            capture_config: Mutex::new(MockCaptureConfig::new(48000, 480)),
            capture_state: Arc::new(Mutex::new(MockCaptureState::default())),
            failing: Mutex::new(HashSet::new()),
            unsupported_rates: Mutex::new(HashSet::new()),
            promoted: AtomicUsize::new(0),
        })
    }

    pub fn device(&self, id: &str) -> Arc<DeviceRecord> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("unknown mock device {}", id))
    }

    pub fn current_default(&self) -> String {
        self.default_id.lock().clone()
    }

    pub fn fail_open(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn reject_rate(&self, rate: u32) {
        self.unsupported_rates.lock().insert(rate);
    }

    pub fn promoted_threads(&self) -> usize {
        self.promoted.load(Ordering::SeqCst)
    }

    pub fn output_config(&self, id: &str) -> Arc<Mutex<MockOutputConfig>> {
        Arc::clone(self.output_configs.lock().entry(id.to_string()).or_default())
    }

    pub fn set_output_config(&self, id: &str, config: MockOutputConfig) {
        *self.output_config(id).lock() = config;
    }

    /// State of the most recently opened output on `id`.
    pub fn output_state(&self, id: &str) -> Arc<Mutex<MockOutputState>> {
        Arc::clone(self.output_states.lock().entry(id.to_string()).or_default())
    }

    /// Let the hardware of `id` consume up to `frames` queued frames.
    pub fn play(&self, id: &str, frames: usize) {
        let state = self.output_state(id);
        let mut state = state.lock();
        let played = frames.min(state.queued);
        state.queued -= played;
        state.played += played as u64;
    }

    pub fn set_capture_config(&self, config: MockCaptureConfig) {
        *self.capture_config.lock() = config;
    }

    pub fn queue_capture_packet(&self, frames: usize, silent: bool, samples: Vec<i32>) {
        self.capture_state.lock().packets.push_back((frames, silent, samples));
    }

    pub fn capture_stopped(&self) -> bool {
        self.capture_state.lock().stopped
    }
}

impl AudioBackend for MockBackend {
    fn list_output_devices(&self) -> Result<Vec<Arc<DeviceRecord>>, DriverError> {
        Ok(self.devices.clone())
    }

    fn default_output_device(&self) -> Result<Arc<DeviceRecord>, DriverError> {
        let id = self.default_id.lock().clone();
        self.devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or(DriverError::NoTargetDevice)
    }

    fn set_default_output_device(&self, id: &str) -> Result<(), DriverError> {
        if !self.devices.iter().any(|d| d.id == id) {
            return Err(DriverError::DeviceNotAvailable(id.to_string()));
        }
        *self.default_id.lock() = id.to_string();
        Ok(())
    }

    fn supports_format(&self, _device: &DeviceRecord, request: &StreamRequest) -> bool {
        !self.unsupported_rates.lock().contains(&request.sample_rate)
    }

    fn open_output(
        &self,
        device: &Arc<DeviceRecord>,
        request: &StreamRequest,
    ) -> Result<Box<dyn OutputStream>, DriverError> {
        if self.failing.lock().contains(&device.id) {
            return Err(DriverError::StreamActivation(format!("{} refused activation", device.id)));
        }
        let config = self.output_config(&device.id);
        let state = Arc::new(Mutex::new(MockOutputState {
            mode: Some(request.mode),
            ..MockOutputState::default()
        }));
        self.output_states.lock().insert(device.id.clone(), Arc::clone(&state));
        let wire = config.lock().wire;
        Ok(Box::new(MockOutput {
            format: StreamFormat {
                sample_rate: request.sample_rate,
                channels: request.channels,
                wire,
            },
            config,
            state,
        }))
    }

    fn open_loopback(
        &self,
        device: &Arc<DeviceRecord>,
        channels: u16,
    ) -> Result<Box<dyn CaptureStream>, DriverError> {
        if self.failing.lock().contains(&device.id) {
            return Err(DriverError::StreamActivation(format!("{} refused loopback", device.id)));
        }
        let mut config = self.capture_config.lock().clone();
        config.channels = channels;
        Ok(Box::new(MockCapture {
            config,
            state: Arc::clone(&self.capture_state),
        }))
    }

    fn promote_render_thread(&self) {
        self.promoted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Host that records every notification.
#[derive(Default)]
pub struct RecordingHost {
    switches: Mutex<Vec<usize>>,
    switched: Condvar,
    resets: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn switches(&self) -> Vec<usize> {
        self.switches.lock().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` buffer switches happened.
    pub fn wait_for_switches(&self, count: usize, timeout: Duration) -> bool {
        let mut switches = self.switches.lock();
        !self
            .switched
            .wait_while_for(&mut switches, |s| s.len() < count, timeout)
            .timed_out()
    }
}

impl HostCallbacks for RecordingHost {
    fn buffer_switch(&self, index: usize, _direct_process: bool) {
        self.switches.lock().push(index);
        self.switched.notify_all();
    }

    fn reset_request(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
