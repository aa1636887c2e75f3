//! Hand-off of mixed periods to one physical output device.
//!
//! Host periods and hardware periods rarely match, so each renderer keeps a
//! per-channel FIFO between the mix and the device:
//!
//! ```text
//! mix (host period) → [FIFO per channel] → encode (native period) → OutputStream
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::audio_models::{
    DevicePosition, DeviceRecord, StreamFormat, StreamMode, StreamRequest,
};
use crate::models::error::DriverError;
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::sample_format::encode_interleaved;
use crate::traits::audio_backend::{AudioBackend, OutputStream};

/// Counters kept per renderer, reported when it is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub periods_pushed: u64,
    pub frames_written: u64,
    /// Times the hardware had played everything written.
    pub underruns: u64,
    /// Frames dropped because the FIFO was full.
    pub overflow_frames: u64,
    /// Frames dropped to pull latency back to the target.
    pub resync_frames: u64,
    pub failed_periods: u64,
}

pub struct DeviceRenderer {
    device: Arc<DeviceRecord>,
    mode: StreamMode,
    stream: Box<dyn OutputStream>,
    format: StreamFormat,
    native_period: usize,
    host_period: usize,
    fifo: Vec<RingBuffer<i32>>,
    period_scratch: Vec<Vec<i32>>,
    encoded: Vec<u8>,
    played: u64,
    failure_streak: u64,
    stats: RendererStats,
}

impl DeviceRenderer {
    /// Open and start an output stream on `device`.
    ///
    /// `host_period` is the host buffer size; `buffer_request` is forwarded
    /// to the backend as the preferred hardware period.
    pub fn open(
        backend: &dyn AudioBackend,
        device: Arc<DeviceRecord>,
        mode: StreamMode,
        sample_rate: u32,
        channels: u16,
        host_period: usize,
        buffer_request: Option<u32>,
    ) -> Result<Self, DriverError> {
        let request = StreamRequest {
            mode,
            sample_rate,
            channels,
            period_frames: buffer_request,
        };
        let mut stream = backend.open_output(&device, &request)?;

        let format = stream.format();
        if format.sample_rate != sample_rate || format.channels != channels {
            return Err(DriverError::UnsupportedFormat(format!(
                "{}: opened {} Hz x{}, wanted {} Hz x{}",
                device.id, format.sample_rate, format.channels, sample_rate, channels
            )));
        }

        let native_period = stream.native_period().max(1);
        let host_period = host_period.max(1);
        let fifo_capacity = 6 * native_period.max(host_period);
        let channel_count = channels as usize;

        stream.start()?;

        log::info!(
            "{}: {:?} output started, {:?} @ {} Hz x{}, native/host period {}/{} frames",
            device.id,
            mode,
            format.wire,
            format.sample_rate,
            format.channels,
            native_period,
            host_period
        );

        Ok(Self {
            device,
            mode,
            stream,
            format,
            native_period,
            host_period,
            fifo: (0..channel_count).map(|_| RingBuffer::new(fifo_capacity)).collect(),
            period_scratch: vec![vec![0; native_period]; channel_count],
            encoded: vec![0; native_period * channel_count * format.wire.bytes_per_sample()],
            played: 0,
            failure_streak: 0,
            stats: RendererStats::default(),
        })
    }

    pub fn device(&self) -> &Arc<DeviceRecord> {
        &self.device
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn native_period(&self) -> usize {
        self.native_period
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    /// Frames waiting in the FIFO.
    pub fn fifo_frames(&self) -> usize {
        self.fifo.first().map(RingBuffer::size).unwrap_or(0)
    }

    /// Accept one host period. `mix` holds one buffer per channel.
    pub fn push(&mut self, mix: &[Vec<i32>]) {
        self.stats.periods_pushed += 1;
        self.refresh_played();

        let mut dropped = 0;
        for (fifo, channel) in self.fifo.iter_mut().zip(mix) {
            let free = fifo.free();
            if !fifo.push(channel) {
                dropped = channel.len() - free;
            }
        }
        if dropped > 0 {
            self.stats.overflow_frames += dropped as u64;
            log::debug!("{}: FIFO overflow, {} frames dropped", self.device.id, dropped);
        }

        self.resync();
        self.pump();
    }

    /// Write as many native periods as the device and the FIFO allow.
    pub fn pump(&mut self) {
        while self.fifo_frames() >= self.native_period {
            let free = match self.stream.free_frames() {
                Ok(free) => free,
                Err(e) => {
                    self.fail(&e);
                    return;
                }
            };
            if free < self.native_period {
                break;
            }

            let frames = self.native_period;
            for (fifo, scratch) in self.fifo.iter_mut().zip(self.period_scratch.iter_mut()) {
                fifo.get(&mut scratch[..frames]);
            }
            let bytes = encode_interleaved(
                &self.period_scratch,
                frames,
                self.format.wire,
                &mut self.encoded,
            );

            if let Err(e) = self.stream.write(&self.encoded[..bytes], frames) {
                self.fail(&e);
                return;
            }
            self.stats.frames_written += frames as u64;
            self.recovered();
        }
    }

    /// Pump until the FIFO can take another host period without adding
    /// latency, waiting on the device in between. Returns `false` if the
    /// device did not make room within `timeout`.
    pub fn wait_for_room(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let target = self.host_period.max(self.native_period);
        loop {
            self.pump();
            if self.fifo_frames() < target {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.stream.wait_for_period(remaining) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    self.fail(&e);
                    return false;
                }
            }
        }
    }

    /// Physical position reported to the clock.
    pub fn position(&self) -> DevicePosition {
        let written = self.stats.frames_written;
        DevicePosition {
            played_frames: self.played,
            queued_frames: written.saturating_sub(self.played) + self.fifo_frames() as u64,
        }
    }

    fn refresh_played(&mut self) {
        match self.stream.played_frames() {
            Ok(played) => {
                let written = self.stats.frames_written;
                if written > 0 && played >= written && self.played < written {
                    self.stats.underruns += 1;
                    log::trace!("{}: underrun at {} frames", self.device.id, written);
                }
                self.played = played;
            }
            Err(e) => log::trace!("{}: position unavailable: {}", self.device.id, e),
        }
    }

    /// Discard the oldest frames once the FIFO drifts past the latency bound.
    fn resync(&mut self) {
        let target = self.host_period;
        let bound = target + 2 * self.native_period + self.host_period;
        let fill = self.fifo_frames();
        if fill <= bound {
            return;
        }
        let excess = fill - target;
        for fifo in &mut self.fifo {
            fifo.discard(excess);
        }
        self.stats.resync_frames += excess as u64;
        log::debug!(
            "{}: FIFO at {} frames (bound {}), dropped {} to resync",
            self.device.id,
            fill,
            bound,
            excess
        );
    }

    /// Drop whatever is queued for this device; other devices carry on.
    fn fail(&mut self, error: &DriverError) {
        if self.failure_streak == 0 {
            log::warn!("{}: output failed: {}", self.device.id, error);
        }
        self.failure_streak += 1;
        self.stats.failed_periods += 1;
        for fifo in &mut self.fifo {
            fifo.clear();
        }
    }

    fn recovered(&mut self) {
        if self.failure_streak > 0 {
            log::info!(
                "{}: output recovered after {} failed periods",
                self.device.id,
                self.failure_streak
            );
            self.failure_streak = 0;
        }
    }
}

impl Drop for DeviceRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.stream.stop() {
            log::warn!("{}: stop failed: {}", self.device.id, e);
        }
        log::info!("{}: output stopped, {:?}", self.device.id, self.stats);
    }
}
