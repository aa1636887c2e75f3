//! Streaming per-channel sample-rate conversion.
//!
//! Wraps rubato's bandlimited sinc resampler behind a push-style API that
//! accepts input chunks of any length. Partial chunks are held until enough
//! input arrives, and the filter state is carried across calls.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use crate::models::error::DriverError;

/// Input frames handed to the sinc kernel per internal step.
const INTERNAL_CHUNK: usize = 256;

/// Largest ratio deviation accepted by [`Resampler::set_ratio_nudge`].
pub const MAX_NUDGE: f64 = 0.01;

enum Kind {
    Passthrough,
    Sinc {
        inner: Box<SincFixedIn<f64>>,
        pending: Vec<Vec<f64>>,
        filled: usize,
        chunk_out: Vec<Vec<f64>>,
    },
}

/// Single-channel streaming resampler with a fixed rate pair.
pub struct Resampler {
    input_rate: u32,
    output_rate: u32,
    kind: Kind,
    output: Vec<f64>,
}

impl Resampler {
    /// Create a resampler converting `input_rate` to `output_rate`.
    ///
    /// `max_chunk` is the largest input slice expected per [`process`] call;
    /// output storage is reserved for it so steady-state calls don't allocate.
    ///
    /// [`process`]: Resampler::process
    pub fn new(input_rate: u32, output_rate: u32, max_chunk: usize) -> Result<Self, DriverError> {
        if input_rate == 0 || output_rate == 0 {
            return Err(DriverError::UnsupportedFormat(format!(
                "invalid resample rates {} -> {}",
                input_rate, output_rate
            )));
        }

        if input_rate == output_rate {
            return Ok(Self {
                input_rate,
                output_rate,
                kind: Kind::Passthrough,
                output: Vec::with_capacity(max_chunk),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            oversampling_factor: 128,
            interpolation: SincInterpolationType::Cubic,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f64>::new(ratio, 1.0 + MAX_NUDGE * 2.0, params, INTERNAL_CHUNK, 1)
            .map_err(|e| {
                DriverError::UnsupportedFormat(format!("failed to create resampler: {}", e))
            })?;

        let chunk_in = inner.input_frames_next();
        let chunk_out_len = inner.output_frames_max();
        let steps = max_chunk / chunk_in + 2;

        log::debug!(
            "resampler {} -> {} (ratio {:.5}, chunk {} -> {})",
            input_rate,
            output_rate,
            ratio,
            chunk_in,
            chunk_out_len
        );

        Ok(Self {
            input_rate,
            output_rate,
            kind: Kind::Sinc {
                inner: Box::new(inner),
                pending: vec![vec![0.0; chunk_in]],
                filled: 0,
                chunk_out: vec![vec![0.0; chunk_out_len]],
            },
            output: Vec::with_capacity(steps * chunk_out_len),
        })
    }

    /// Feed input samples, returning every output sample produced by this call.
    pub fn process(&mut self, input: &[f64]) -> &[f64] {
        self.output.clear();

        match &mut self.kind {
            Kind::Passthrough => self.output.extend_from_slice(input),
            Kind::Sinc {
                inner,
                pending,
                filled,
                chunk_out,
            } => {
                let mut rest = input;
                while !rest.is_empty() {
                    let chunk_len = pending[0].len();
                    let take = rest.len().min(chunk_len - *filled);
                    pending[0][*filled..*filled + take].copy_from_slice(&rest[..take]);
                    *filled += take;
                    rest = &rest[take..];

                    if *filled < chunk_len {
                        break;
                    }
                    *filled = 0;

                    match inner.process_into_buffer(&pending[..], &mut chunk_out[..], None) {
                        Ok((_, produced)) => {
                            self.output.extend_from_slice(&chunk_out[0][..produced])
                        }
                        Err(e) => log::warn!("resampler step failed: {}", e),
                    }
                }
            }
        }

        &self.output
    }

    /// Adjust the conversion ratio by a relative factor within `±MAX_NUDGE`.
    ///
    /// Used to absorb clock drift between a captured device and the logical
    /// clock. Passthrough resamplers ignore it.
    pub fn set_ratio_nudge(&mut self, relative: f64) {
        if let Kind::Sinc { inner, .. } = &mut self.kind {
            let relative = relative.clamp(1.0 - MAX_NUDGE, 1.0 + MAX_NUDGE);
            if let Err(e) = inner.set_resample_ratio_relative(relative, true) {
                log::warn!("failed to nudge resample ratio: {}", e);
            }
        }
    }

    /// Output frames by which the filter delays the signal.
    pub fn output_delay(&self) -> usize {
        match &self.kind {
            Kind::Passthrough => 0,
            Kind::Sinc { inner, .. } => inner.output_delay(),
        }
    }

    /// Input samples buffered but not yet converted.
    pub fn pending_input(&self) -> usize {
        match &self.kind {
            Kind::Passthrough => 0,
            Kind::Sinc { filled, .. } => *filled,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.kind, Kind::Passthrough)
    }

    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }
}
