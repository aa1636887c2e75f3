//! Loopback capture source.
//!
//! Captures the mix going to an output device, converts it to the logical
//! rate and injects it into the driver output. Optionally redirects the OS
//! default output to the captured device for as long as the source lives, so
//! that other applications' audio gets captured too.
//!
//! ```text
//! [CaptureStream] → packets → f64 per channel → [Resampler] → [RingBuffer] → mix
//! ```

use std::sync::Arc;

use crate::models::audio_models::DeviceRecord;
use crate::models::error::DriverError;
use crate::processing::resampler::Resampler;
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::sample_format::{f64_to_sample, sample_to_f64};
use crate::traits::audio_backend::{AudioBackend, CaptureStream};

/// Extra ring headroom beyond the capture buffer, in frames.
const RING_HEADROOM: usize = 1024;

/// Scoped change of the OS default output device.
///
/// Restores the previous default when dropped, whichever way the owner goes
/// away.
pub struct DefaultDeviceOverride {
    backend: Arc<dyn AudioBackend>,
    previous_id: String,
    target_id: String,
}

impl DefaultDeviceOverride {
    pub fn acquire(backend: Arc<dyn AudioBackend>, target_id: &str) -> Result<Self, DriverError> {
        let previous_id = backend.default_output_device()?.id.clone();
        if previous_id != target_id {
            backend.set_default_output_device(target_id)?;
            log::info!("default output redirected: {} -> {}", previous_id, target_id);
        }
        Ok(Self {
            backend,
            previous_id,
            target_id: target_id.to_string(),
        })
    }
}

impl Drop for DefaultDeviceOverride {
    fn drop(&mut self) {
        if self.previous_id == self.target_id {
            return;
        }
        match self.backend.set_default_output_device(&self.previous_id) {
            Ok(()) => log::info!("default output restored to {}", self.previous_id),
            Err(e) => log::error!("failed to restore default output {}: {}", self.previous_id, e),
        }
    }
}

pub struct LoopbackSource {
    device: Arc<DeviceRecord>,
    stream: Box<dyn CaptureStream>,
    channels: usize,
    stream_channels: usize,
    feed_chunk: usize,
    resamplers: Vec<Resampler>,
    rings: Vec<RingBuffer<f64>>,
    capture_scratch: Vec<f64>,
    read_scratch: Vec<f64>,
    nudge: f64,
    primed: bool,
    // Dropped after `stream` is stopped in `Drop::drop`.
    _override: Option<DefaultDeviceOverride>,
}

impl LoopbackSource {
    /// Open a loopback capture on `device` producing `channels` channels at
    /// `sample_rate`.
    ///
    /// `period` is the host buffer size; scratch storage is sized from it and
    /// from the device buffer so that rendering doesn't allocate.
    pub fn open(
        backend: Arc<dyn AudioBackend>,
        device: Arc<DeviceRecord>,
        channels: u16,
        sample_rate: u32,
        period: usize,
        intercept_default_output: bool,
    ) -> Result<Self, DriverError> {
        let mut stream = backend.open_loopback(&device, channels)?;

        let native_rate = stream.native_rate();
        let buffer_frames = stream.buffer_frames().max(1);
        log::info!(
            "{} loopback resample: {} -> {} ({} frames device buffer)",
            device.id,
            native_rate,
            sample_rate,
            buffer_frames
        );

        let channels = channels as usize;
        let mut resamplers = Vec::with_capacity(channels);
        let mut rings = Vec::with_capacity(channels);
        for _ in 0..channels {
            resamplers.push(Resampler::new(native_rate, sample_rate, buffer_frames)?);
            rings.push(RingBuffer::new((buffer_frames.max(period) + RING_HEADROOM) * 2));
        }

        let override_guard = if intercept_default_output {
            Some(DefaultDeviceOverride::acquire(Arc::clone(&backend), &device.id)?)
        } else {
            None
        };

        stream.start()?;

        Ok(Self {
            device,
            stream_channels: stream.channels() as usize,
            stream,
            channels,
            feed_chunk: buffer_frames,
            resamplers,
            rings,
            capture_scratch: vec![0.0; buffer_frames],
            read_scratch: vec![0.0; period],
            nudge: 1.0,
            primed: false,
            _override: override_guard,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Frames buffered per channel, ready to be mixed.
    pub fn buffered_frames(&self) -> usize {
        self.rings.first().map(RingBuffer::size).unwrap_or(0)
    }

    pub fn render(&mut self, _current_frame: u64, output: &mut [Vec<i32>]) {
        self.capture_available();

        let frames = output.first().map(Vec::len).unwrap_or(0);
        if frames == 0 {
            return;
        }

        let buffered = self.buffered_frames();
        if buffered < frames {
            log::warn!(
                "{} loopback: capture not yet filled ({} buffered, {} needed)",
                self.device.id,
                buffered,
                frames
            );
        } else {
            self.primed = true;
        }

        if self.read_scratch.len() < frames {
            self.read_scratch.resize(frames, 0.0);
        }
        let scratch = &mut self.read_scratch[..frames];
        for (ring, out) in self.rings.iter_mut().zip(output.iter_mut()) {
            ring.get(scratch);
            for (o, &s) in out.iter_mut().zip(scratch.iter()) {
                *o = o.saturating_add(f64_to_sample(s));
            }
        }

        self.track_drift(frames);
    }

    /// Drain every capture packet into the per-channel rings.
    fn capture_available(&mut self) {
        let Self {
            device,
            stream,
            channels,
            stream_channels,
            feed_chunk,
            resamplers,
            rings,
            capture_scratch,
            ..
        } = self;
        let channels = *channels;
        let stride = (*stream_channels).max(1);
        let feed_chunk = *feed_chunk;

        let result = stream.read_packets(&mut |packet| {
            let frames = packet.frames;
            if capture_scratch.len() < frames {
                log::warn!(
                    "{} loopback: scratch too small ({} < {} frames), growing",
                    device.id,
                    capture_scratch.len(),
                    frames
                );
                capture_scratch.resize(frames, 0.0);
            }

            for ch in 0..channels {
                let input = &mut capture_scratch[..frames];
                if packet.silent || ch >= stride {
                    input.fill(0.0);
                } else {
                    for (i, s) in input.iter_mut().enumerate() {
                        *s = packet
                            .samples
                            .get(i * stride + ch)
                            .copied()
                            .map(sample_to_f64)
                            .unwrap_or(0.0);
                    }
                }

                for part in input.chunks(feed_chunk) {
                    let converted = resamplers[ch].process(part);
                    if !rings[ch].push(converted) {
                        log::debug!(
                            "{} loopback: ring[{}] overflow (capacity {}, size {}, new {})",
                            device.id,
                            ch,
                            rings[ch].capacity(),
                            rings[ch].size(),
                            converted.len()
                        );
                    }
                }
            }
            log::trace!(
                "{} loopback: packet {} frames{}",
                device.id,
                frames,
                if packet.silent { " [silent]" } else { "" }
            );
        });

        if let Err(e) = result {
            log::warn!("{} loopback: capture read failed: {}", device.id, e);
        }
    }

    /// Current relative resampling ratio adjustment.
    pub fn ratio_nudge(&self) -> f64 {
        self.nudge
    }

    /// Nudge the resampling ratio to keep the ring fill near one period.
    ///
    /// The captured device runs on its own clock; without this the ring would
    /// slowly fill up (overflow) or run dry (underrun). A same-rate capture
    /// has no ratio to nudge, so excess fill is dropped instead.
    fn track_drift(&mut self, period: usize) {
        if !self.primed {
            return;
        }
        let fill = self.buffered_frames();
        let passthrough = self.resamplers.first().map_or(false, Resampler::is_passthrough);
        if passthrough {
            if fill > period * 3 {
                let excess = fill - period;
                log::debug!(
                    "{} loopback: ring fill {}, dropping {} frames",
                    self.device.id,
                    fill,
                    excess
                );
                for ring in &mut self.rings {
                    ring.discard(excess);
                }
            }
            return;
        }

        let nudge = if fill > period * 3 {
            0.999
        } else if fill < period / 2 {
            1.001
        } else {
            1.0
        };
        if nudge != self.nudge {
            log::debug!("{} loopback: ring fill {} -> ratio nudge {}", self.device.id, fill, nudge);
            for resampler in &mut self.resamplers {
                resampler.set_ratio_nudge(nudge);
            }
            self.nudge = nudge;
        }
    }
}

impl Drop for LoopbackSource {
    fn drop(&mut self) {
        if let Err(e) = self.stream.stop() {
            log::warn!("{} loopback: stop failed: {}", self.device.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockBackend, MockCaptureConfig};

    fn open(backend: &Arc<MockBackend>, intercept: bool) -> LoopbackSource {
        let device = backend.device("cable");
        LoopbackSource::open(backend.clone(), device, 2, 48000, 256, intercept).unwrap()
    }

    #[test]
    fn silent_packet_renders_zeros() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(48000, 256));
        let mut source = open(&backend, false);

        // Garbage payload flagged silent must not leak into the mix.
        backend.queue_capture_packet(256, true, vec![0x7fff_0000; 512]);

        let mut output = vec![vec![0i32; 256]; 2];
        source.render(0, &mut output);

        assert!(output.iter().flatten().all(|&s| s == 0));
    }

    #[test]
    fn starved_ring_zero_pads_without_blocking() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(48000, 256));
        let mut source = open(&backend, false);

        let mut output = vec![vec![5i32; 256]; 2];
        source.render(0, &mut output);

        // Nothing captured: the existing mix is untouched.
        assert!(output.iter().flatten().all(|&s| s == 5));
        assert_eq!(source.buffered_frames(), 0);
    }

    #[test]
    fn captured_samples_are_added_per_channel() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(48000, 256));
        let mut source = open(&backend, false);

        let mut packet = Vec::with_capacity(512);
        for _ in 0..256 {
            packet.push(1 << 28);
            packet.push(-(1 << 29));
        }
        backend.queue_capture_packet(256, false, packet);

        let mut output = vec![vec![100i32; 256]; 2];
        source.render(0, &mut output);

        assert!(output[0].iter().all(|&s| s == (1 << 28) + 100));
        assert!(output[1].iter().all(|&s| s == -(1 << 29) + 100));
    }

    #[test]
    fn packets_are_accumulated_across_periods() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(48000, 480));
        let mut source = open(&backend, false);

        backend.queue_capture_packet(480, false, vec![1 << 20; 960]);
        let mut output = vec![vec![0i32; 256]; 2];
        source.render(0, &mut output);
        assert_eq!(source.buffered_frames(), 480 - 256);

        let mut output = vec![vec![0i32; 256]; 2];
        source.render(256, &mut output);
        // 224 captured frames, then zero padding.
        assert!(output[0][..224].iter().all(|&s| s == 1 << 20));
        assert!(output[0][224..].iter().all(|&s| s == 0));
    }

    #[test]
    fn intercept_redirects_and_restores_default() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(48000, 256));
        assert_eq!(backend.current_default(), "speakers");

        let source = open(&backend, true);
        assert_eq!(backend.current_default(), "cable");

        drop(source);
        assert_eq!(backend.current_default(), "speakers");
        assert!(backend.capture_stopped());
    }

    #[test]
    fn failed_start_still_restores_default() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        let mut config = MockCaptureConfig::new(48000, 256);
        config.fail_start = true;
        backend.set_capture_config(config);

        let device = backend.device("cable");
        let result = LoopbackSource::open(backend.clone(), device, 2, 48000, 256, true);

        assert!(result.is_err());
        assert_eq!(backend.current_default(), "speakers");
    }

    #[test]
    fn open_failure_is_fatal() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.fail_open("cable");

        let device = backend.device("cable");
        let result = LoopbackSource::open(backend.clone(), device, 2, 48000, 256, true);

        assert!(matches!(result, Err(DriverError::StreamActivation(_))));
        assert_eq!(backend.current_default(), "speakers");
    }

    #[test]
    fn same_rate_backlog_is_dropped_to_one_period() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(48000, 256));
        let mut source = open(&backend, false);

        for i in 0..5 {
            backend.queue_capture_packet(256, false, vec![i << 20; 512]);
        }
        let mut output = vec![vec![0i32; 256]; 2];
        source.render(0, &mut output);
        assert!(output[0].iter().all(|&s| s == 0));
        assert_eq!(source.buffered_frames(), 256);
        assert_eq!(source.ratio_nudge(), 1.0);

        // The newest packet is what's left.
        let mut output = vec![vec![0i32; 256]; 2];
        source.render(256, &mut output);
        assert!(output[0].iter().all(|&s| s == 4 << 20));
    }

    #[test]
    fn resampled_ring_fill_nudges_the_ratio() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(44100, 441));
        let mut source = open(&backend, false);

        for _ in 0..20 {
            backend.queue_capture_packet(441, false, vec![1 << 24; 882]);
        }
        let mut output = vec![vec![0i32; 256]; 2];
        source.render(0, &mut output);
        assert!(source.buffered_frames() > 256 * 3);
        assert_eq!(source.ratio_nudge(), 0.999);

        // Capture stalls: the ring drains below half a period.
        let mut frame = 256;
        while source.buffered_frames() >= 128 {
            let mut output = vec![vec![0i32; 256]; 2];
            source.render(frame, &mut output);
            frame += 256;
            assert!(frame < 256 * 32, "ring never drained");
        }
        let mut output = vec![vec![0i32; 256]; 2];
        source.render(frame, &mut output);
        assert_eq!(source.ratio_nudge(), 1.001);
    }

    #[test]
    fn resampled_capture_reaches_the_mix() {
        let backend = MockBackend::with_devices(&["speakers", "cable"]);
        backend.set_capture_config(MockCaptureConfig::new(44100, 441));
        let mut source = open(&backend, false);

        for _ in 0..10 {
            backend.queue_capture_packet(441, false, vec![1 << 29; 882]);
        }
        let mut output = vec![vec![0i32; 256]; 2];
        source.render(0, &mut output);
        let mut output = vec![vec![0i32; 256]; 2];
        source.render(256, &mut output);

        // Past the filter warm-up the DC level comes through at ~0.25 FS.
        let expected = (1 << 29) as f64;
        let last = output[0][255] as f64;
        assert!((last - expected).abs() / expected < 0.05, "{}", last);
    }
}
