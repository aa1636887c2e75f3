use crate::processing::sample_format::WireFormat;

/// An output endpoint known to the backend.
///
/// Shared as `Arc<DeviceRecord>` between the driver, its renderers and
/// loopback sources; the id is stable across enumerations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Hardware sharing mode of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    Exclusive,
    Shared,
}

/// Parameters for opening an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub mode: StreamMode,
    pub sample_rate: u32,
    pub channels: u16,
    /// Preferred hardware period in frames, `None` for the device default.
    pub period_frames: Option<u32>,
}

/// Format negotiated by an opened output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub wire: WireFormat,
}

/// Physical position of one device, reported after each hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DevicePosition {
    /// Frames the hardware has played since the stream started.
    pub played_frames: u64,
    /// Frames written but not yet played (hardware buffer plus local FIFO).
    pub queued_frames: u64,
}

/// Sample container type exposed to the host. The core only renders 32-bit
/// little-endian integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Int32Lsb,
}

/// Host-facing description of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: u16,
    pub is_input: bool,
    pub is_active: bool,
    pub channel_group: u16,
    pub sample_type: SampleType,
    pub name: String,
}

/// One entry of a buffer creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub is_input: bool,
    pub channel: i32,
}

impl BufferInfo {
    pub fn output(channel: i32) -> Self {
        Self {
            is_input: false,
            channel,
        }
    }
}

/// Buffer sizes the driver accepts, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizeInfo {
    pub min: u32,
    pub max: u32,
    pub preferred: u32,
    /// `-1` means powers of two between `min` and `max`.
    pub granularity: i32,
}

const SPEAKER_NAMES: [&str; 11] = [
    "Front left",
    "Front right",
    "Front center",
    "Low frequency",
    "Back left",
    "Back right",
    "Front left of center",
    "Front right of center",
    "Back center",
    "Side left",
    "Side right",
];

/// Stable display name for an output channel.
pub fn channel_name(channel: u16) -> &'static str {
    SPEAKER_NAMES
        .get(channel as usize)
        .copied()
        .unwrap_or("Unknown")
}
