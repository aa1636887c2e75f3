//! # asio-fanout-core
//!
//! Platform-agnostic core of a virtual low-latency output driver that renders
//! one host stream to several physical output devices at once.
//!
//! The host fills one half of a double buffer per period; the render thread
//! mixes it with auxiliary sources (loopback capture, tone cue) and hands
//! the result to one renderer per device. The first device runs exclusive
//! and drives the clock; the others run shared and are kept within a bounded
//! latency. Platform backends implement [`AudioBackend`].
//!
//! ## Architecture
//!
//! ```text
//! asio-fanout-core (this crate)
//! ├── driver        ← Driver facade, device resolution
//! ├── prepared      ← PreparedState, DoubleBuffer
//! ├── running       ← RunningState, RenderEngine
//! ├── renderer      ← DeviceRenderer (per-device FIFO + encode)
//! ├── clock         ← SynchronizedClock
//! ├── source/       ← AudioSource: LoopbackSource, ToneSource
//! ├── traits/       ← AudioBackend, OutputStream, CaptureStream, HostCallbacks
//! ├── models/       ← DriverError, DriverPreferences, device and buffer types
//! └── processing/   ← RingBuffer, Resampler, sample formats, WAV loading
//! ```

pub mod clock;
pub mod driver;
pub mod models;
pub mod prepared;
pub mod processing;
pub mod renderer;
pub mod running;
pub mod source;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use clock::{AsioTimeStamp, MonotonicTime, SamplePosition, SynchronizedClock, TimeSource};
pub use driver::Driver;
pub use models::audio_models::{
    BufferInfo, BufferSizeInfo, ChannelInfo, DevicePosition, DeviceRecord, SampleType, StreamFormat,
    StreamMode, StreamRequest,
};
pub use models::config::{DriverPreferences, LogLevel, LoopbackPreference, ToneCuePreference};
pub use models::error::{AsioError, DriverError};
pub use prepared::{OutputReadyHandle, PreparedState};
pub use processing::ring_buffer::RingBuffer;
pub use processing::sample_format::WireFormat;
pub use running::{RenderEngine, RunningState};
pub use source::{AudioSource, ToneTrigger};
pub use traits::audio_backend::{AudioBackend, CapturePacket, CaptureStream, OutputStream};
pub use traits::host_callbacks::HostCallbacks;
