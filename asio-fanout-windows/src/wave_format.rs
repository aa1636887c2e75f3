//! `WAVEFORMATEXTENSIBLE` construction for the wire formats the core encodes.

use windows::core::GUID;
use windows::Win32::Media::Audio::{WAVEFORMATEX, WAVEFORMATEXTENSIBLE, WAVEFORMATEXTENSIBLE_0};
use windows::Win32::Media::KernelStreaming::{
    KSDATAFORMAT_SUBTYPE_IEEE_FLOAT, KSDATAFORMAT_SUBTYPE_PCM, WAVE_FORMAT_EXTENSIBLE,
};

use asio_fanout_core::processing::sample_format::WireFormat;

/// Speaker mask covering the first `channels` positions.
pub fn channel_mask(channels: u16) -> u32 {
    if channels >= 32 {
        u32::MAX
    } else {
        (1u32 << channels) - 1
    }
}

pub fn extensible(format: WireFormat, sample_rate: u32, channels: u16) -> WAVEFORMATEXTENSIBLE {
    let bytes = format.bytes_per_sample() as u16;
    let block_align = bytes * channels;
    let subformat: GUID = if format.is_float() {
        KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
    } else {
        KSDATAFORMAT_SUBTYPE_PCM
    };

    WAVEFORMATEXTENSIBLE {
        Format: WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_EXTENSIBLE as u16,
            nChannels: channels,
            nSamplesPerSec: sample_rate,
            nAvgBytesPerSec: sample_rate * block_align as u32,
            nBlockAlign: block_align,
            wBitsPerSample: bytes * 8,
            cbSize: (size_of::<WAVEFORMATEXTENSIBLE>() - size_of::<WAVEFORMATEX>()) as u16,
        },
        Samples: WAVEFORMATEXTENSIBLE_0 {
            wValidBitsPerSample: format.valid_bits(),
        },
        dwChannelMask: channel_mask(channels),
        SubFormat: subformat,
    }
}

/// Period in 100 ns units for `frames` at `sample_rate`, rounded to nearest.
pub fn frames_to_reftime(frames: u32, sample_rate: u32) -> i64 {
    ((10_000_000.0 * frames as f64) / sample_rate as f64 + 0.5) as i64
}

pub fn reftime_to_frames(reftime: i64, sample_rate: u32) -> u32 {
    ((reftime as f64 * sample_rate as f64) / 10_000_000.0 + 0.5) as u32
}
