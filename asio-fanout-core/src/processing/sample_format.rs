//! Conversions between the internal 32-bit fixed-point mix and the formats
//! spoken by hardware and by auxiliary sources.

/// Full-scale amplitude of the internal fixed-point representation.
pub const FULL_SCALE: f64 = 2147483648.0;

/// Sample encoding negotiated with an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    Int16,
    /// Packed 3-byte little-endian.
    Int24,
    /// 24 valid bits, MSB-aligned in a 4-byte container.
    Int24In32,
    Int32,
    Float32,
}

impl WireFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Int24In32 | Self::Int32 | Self::Float32 => 4,
        }
    }

    pub fn valid_bits(self) -> u16 {
        match self {
            Self::Int16 => 16,
            Self::Int24 | Self::Int24In32 => 24,
            Self::Int32 | Self::Float32 => 32,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32)
    }

    /// Preference order tried when negotiating with a device.
    pub const NEGOTIATION_ORDER: [WireFormat; 5] = [
        WireFormat::Int32,
        WireFormat::Float32,
        WireFormat::Int24In32,
        WireFormat::Int24,
        WireFormat::Int16,
    ];
}

/// Convert a fixed-point sample to `[-1.0, 1.0)`.
pub fn sample_to_f64(sample: i32) -> f64 {
    sample as f64 / FULL_SCALE
}

/// Convert a normalized value to fixed point, rounding and clamping.
pub fn f64_to_sample(value: f64) -> i32 {
    (value * FULL_SCALE)
        .round()
        .clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Additively mix `src` into `dest`, saturating at full scale.
pub fn accumulate(dest: &mut [i32], src: &[i32]) {
    for (d, &s) in dest.iter_mut().zip(src) {
        *d = d.saturating_add(s);
    }
}

/// Interleave `frames` frames of per-channel samples into `out` using `format`.
///
/// Returns the number of bytes written. `out` must hold at least
/// `frames * channels.len() * format.bytes_per_sample()` bytes.
pub fn encode_interleaved(
    channels: &[Vec<i32>],
    frames: usize,
    format: WireFormat,
    out: &mut [u8],
) -> usize {
    let width = format.bytes_per_sample();
    let mut offset = 0;
    for frame in 0..frames {
        for channel in channels {
            let sample = channel[frame];
            let slot = &mut out[offset..offset + width];
            match format {
                WireFormat::Int16 => slot.copy_from_slice(&((sample >> 16) as i16).to_le_bytes()),
                WireFormat::Int24 => slot.copy_from_slice(&(sample >> 8).to_le_bytes()[..3]),
                WireFormat::Int24In32 => slot.copy_from_slice(&(sample & !0xff).to_le_bytes()),
                WireFormat::Int32 => slot.copy_from_slice(&sample.to_le_bytes()),
                WireFormat::Float32 => {
                    slot.copy_from_slice(&(sample_to_f64(sample) as f32).to_le_bytes())
                }
            }
            offset += width;
        }
    }
    offset
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f64], channels: usize) -> Vec<f64> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f64;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f64>() * scale)
        .collect()
}
