//! Decoding of short WAV assets into mono waveforms at the logical rate.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use crate::models::error::DriverError;
use crate::processing::resampler::Resampler;
use crate::processing::sample_format::downmix_to_mono;

/// A decoded, mono, normalized waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveSound {
    pub sample_rate: u32,
    pub samples: Vec<f64>,
}

/// Decode WAV `bytes` and resample the result to `target_rate`.
///
/// Multi-channel files are averaged to mono. Integer samples are normalized
/// by their bit depth; float samples are taken as is.
pub fn load_wave_sound(bytes: &[u8], target_rate: u32) -> Result<WaveSound, DriverError> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| DriverError::AssetDecode(format!("invalid wav data: {}", e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample.max(1) - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<Result<_, _>>()
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>(),
    }
    .map_err(|e| DriverError::AssetDecode(format!("failed to read samples: {}", e)))?;

    let mono = downmix_to_mono(&interleaved, spec.channels as usize);
    let samples = resample_whole(&mono, spec.sample_rate, target_rate)?;

    log::debug!(
        "loaded wave: {} Hz x{} ({} frames) -> {} Hz ({} frames)",
        spec.sample_rate,
        spec.channels,
        mono.len(),
        target_rate,
        samples.len()
    );

    Ok(WaveSound {
        sample_rate: target_rate,
        samples,
    })
}

/// One-shot conversion of a complete signal, compensating the filter delay
/// and flushing the tail so the result is time-aligned with the input.
fn resample_whole(input: &[f64], from: u32, to: u32) -> Result<Vec<f64>, DriverError> {
    let mut resampler = Resampler::new(from, to, input.len())?;
    if resampler.is_passthrough() {
        return Ok(input.to_vec());
    }

    let expected = (input.len() as f64 * resampler.ratio()).round() as usize;
    let delay = resampler.output_delay();
    let wanted = expected + delay;

    let mut output = Vec::with_capacity(wanted);
    output.extend_from_slice(resampler.process(input));

    let silence = [0.0; 1024];
    while output.len() < wanted {
        let produced = resampler.process(&silence);
        output.extend_from_slice(produced);
    }

    output.truncate(wanted);
    output.drain(..delay.min(output.len()));
    Ok(output)
}
