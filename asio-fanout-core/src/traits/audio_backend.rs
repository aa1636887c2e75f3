use std::sync::Arc;
use std::time::Duration;

use crate::models::audio_models::{DeviceRecord, StreamFormat, StreamRequest};
use crate::models::error::DriverError;

/// A hardware output stream opened on one device.
///
/// Owned and driven by a single [`DeviceRenderer`](crate::renderer::DeviceRenderer);
/// calls come from the render thread only.
pub trait OutputStream: Send {
    /// Format negotiated at activation.
    fn format(&self) -> StreamFormat;

    /// Frames the hardware consumes per period.
    fn native_period(&self) -> usize;

    fn start(&mut self) -> Result<(), DriverError>;

    fn stop(&mut self) -> Result<(), DriverError>;

    /// Frames that can be written right now without blocking.
    fn free_frames(&mut self) -> Result<usize, DriverError>;

    /// Write `frames` interleaved frames already encoded in [`format`](Self::format).
    fn write(&mut self, data: &[u8], frames: usize) -> Result<(), DriverError>;

    /// Frames played by the hardware since [`start`](Self::start).
    fn played_frames(&mut self) -> Result<u64, DriverError>;

    /// Block until the hardware signals that a period was consumed, or
    /// `timeout` elapses. Returns `false` on timeout.
    fn wait_for_period(&mut self, _timeout: Duration) -> Result<bool, DriverError> {
        Ok(true)
    }
}

/// One packet delivered by a capture stream.
#[derive(Debug, Clone, Copy)]
pub struct CapturePacket<'a> {
    pub frames: usize,
    /// The device flagged the packet as silence; `samples` must be ignored.
    pub silent: bool,
    /// Interleaved 32-bit samples, `frames * channels` long.
    pub samples: &'a [i32],
}

/// Loopback capture of a render endpoint's own mix.
pub trait CaptureStream: Send {
    /// Sample rate the capture runs at (the device mix rate).
    fn native_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Size of the device-side capture buffer in frames.
    fn buffer_frames(&self) -> usize;

    fn start(&mut self) -> Result<(), DriverError>;

    fn stop(&mut self) -> Result<(), DriverError>;

    /// Hand every currently available packet to `sink`, without waiting for
    /// more. Returns the number of packets delivered.
    fn read_packets(
        &mut self,
        sink: &mut dyn FnMut(CapturePacket<'_>),
    ) -> Result<usize, DriverError>;
}

/// Platform audio backend: device enumeration, default-device policy and
/// stream activation.
pub trait AudioBackend: Send + Sync {
    /// Active render endpoints.
    fn list_output_devices(&self) -> Result<Vec<Arc<DeviceRecord>>, DriverError>;

    fn default_output_device(&self) -> Result<Arc<DeviceRecord>, DriverError>;

    /// Make `id` the OS default output endpoint.
    fn set_default_output_device(&self, id: &str) -> Result<(), DriverError>;

    /// Whether `device` can open a stream matching `request`.
    fn supports_format(&self, device: &DeviceRecord, request: &StreamRequest) -> bool;

    fn open_output(
        &self,
        device: &Arc<DeviceRecord>,
        request: &StreamRequest,
    ) -> Result<Box<dyn OutputStream>, DriverError>;

    fn open_loopback(
        &self,
        device: &Arc<DeviceRecord>,
        channels: u16,
    ) -> Result<Box<dyn CaptureStream>, DriverError>;

    /// Raise the calling thread to real-time scheduling. Called once from the
    /// render thread before its first period.
    fn promote_render_thread(&self) {}
}
