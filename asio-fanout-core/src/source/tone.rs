//! Triggered one-shot cue mixed into the output.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::DriverError;
use crate::processing::sample_format::f64_to_sample;
use crate::processing::wave_load::{load_wave_sound, WaveSound};

/// Bundled cue sound (48 kHz mono 16-bit).
pub const CUE_WAV: &[u8] = include_bytes!("../../assets/cue.wav");

/// Voices that can overlap at once. Further triggers are dropped.
pub const MAX_VOICES: usize = 8;

/// Pending triggers accepted before the render thread drains them.
const MAX_PENDING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    At(u64),
    Now,
}

/// Cloneable handle to start the cue from any thread.
#[derive(Clone, Default)]
pub struct ToneTrigger {
    queue: Arc<Mutex<Vec<Trigger>>>,
}

impl ToneTrigger {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::with_capacity(MAX_PENDING))),
        }
    }

    /// Start the cue at logical frame `frame`.
    pub fn trigger_at(&self, frame: u64) -> bool {
        self.enqueue(Trigger::At(frame))
    }

    /// Start the cue with the next rendered period.
    pub fn trigger_now(&self) -> bool {
        self.enqueue(Trigger::Now)
    }

    fn enqueue(&self, trigger: Trigger) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= MAX_PENDING {
            log::warn!("tone cue: trigger queue full, dropping {:?}", trigger);
            return false;
        }
        queue.push(trigger);
        true
    }
}

pub struct ToneSource {
    waveform: Vec<f64>,
    gain: f64,
    trigger: ToneTrigger,
    /// Start frames of the voices currently playing.
    voices: Vec<u64>,
}

impl ToneSource {
    /// `waveform` is mono, normalized to ±1.0, at the logical rate.
    pub fn new(waveform: Vec<f64>, gain: f64, trigger: ToneTrigger) -> Self {
        Self {
            waveform,
            gain,
            trigger,
            voices: Vec::with_capacity(MAX_VOICES),
        }
    }

    pub fn from_wav(
        bytes: &[u8],
        sample_rate: u32,
        gain: f64,
        trigger: ToneTrigger,
    ) -> Result<Self, DriverError> {
        let WaveSound { samples, .. } = load_wave_sound(bytes, sample_rate)?;
        Ok(Self::new(samples, gain, trigger))
    }

    /// The bundled cue at `sample_rate`.
    pub fn cue(sample_rate: u32, gain: f64, trigger: ToneTrigger) -> Result<Self, DriverError> {
        Self::from_wav(CUE_WAV, sample_rate, gain, trigger)
    }

    pub fn trigger_handle(&self) -> ToneTrigger {
        self.trigger.clone()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn render(&mut self, current_frame: u64, output: &mut [Vec<i32>]) {
        let frames = output.first().map(Vec::len).unwrap_or(0) as u64;
        self.drain_triggers(current_frame);
        if self.voices.is_empty() || self.waveform.is_empty() {
            return;
        }

        let length = self.waveform.len() as u64;
        let period_end = current_frame.saturating_add(frames);

        for &start in &self.voices {
            let begin = start.max(current_frame);
            let end = start.saturating_add(length).min(period_end);
            for frame in begin..end {
                let sample = f64_to_sample(self.waveform[(frame - start) as usize] * self.gain);
                let offset = (frame - current_frame) as usize;
                for channel in output.iter_mut() {
                    channel[offset] = channel[offset].saturating_add(sample);
                }
            }
        }

        self.voices.retain(|&start| start.saturating_add(length) > period_end);
    }

    fn drain_triggers(&mut self, current_frame: u64) {
        // Never wait on a control thread from the render path.
        let Some(mut queue) = self.trigger.queue.try_lock() else {
            return;
        };
        for trigger in queue.drain(..) {
            let start = match trigger {
                Trigger::At(frame) => frame,
                Trigger::Now => current_frame,
            };
            if self.voices.len() >= MAX_VOICES {
                log::warn!("tone cue: {} voices active, trigger at {} dropped", MAX_VOICES, start);
                continue;
            }
            log::debug!("tone cue: voice starts at frame {}", start);
            self.voices.push(start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &mut ToneSource, frame: u64, frames: usize) -> Vec<Vec<i32>> {
        let mut output = vec![vec![0i32; frames]; 2];
        source.render(frame, &mut output);
        output
    }

    #[test]
    fn cue_at_frame_zero_reproduces_waveform() {
        let waveform: Vec<f64> = (0..2048).map(|i| (i as f64 * 0.01).sin() * 0.8).collect();
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::new(waveform.clone(), 1.0, trigger.clone());

        trigger.trigger_at(0);
        let output = render(&mut source, 0, 512);

        for channel in &output {
            for (i, &s) in channel.iter().enumerate() {
                assert_eq!(s, f64_to_sample(waveform[i]));
            }
        }
    }

    #[test]
    fn bundled_cue_reproduces_decoded_waveform() {
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::cue(48000, 1.0, trigger.clone()).unwrap();
        let expected = load_wave_sound(CUE_WAV, 48000).unwrap().samples;

        trigger.trigger_at(0);
        let output = render(&mut source, 0, 512);

        for i in 0..512.min(expected.len()) {
            assert_eq!(output[0][i], f64_to_sample(expected[i]));
            assert_eq!(output[1][i], output[0][i]);
        }
    }

    #[test]
    fn voice_spans_periods_and_retires() {
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::new(vec![0.5; 300], 1.0, trigger.clone());

        trigger.trigger_at(100);
        let first = render(&mut source, 0, 256);
        assert!(first[0][..100].iter().all(|&s| s == 0));
        assert!(first[0][100..].iter().all(|&s| s == 1 << 30));
        assert_eq!(source.active_voices(), 1);

        let second = render(&mut source, 256, 256);
        assert!(second[0][..144].iter().all(|&s| s == 1 << 30));
        assert!(second[0][144..].iter().all(|&s| s == 0));
        assert_eq!(source.active_voices(), 0);
    }

    #[test]
    fn trigger_near_end_of_timeline_is_kept_and_played() {
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::new(vec![0.5; 64], 1.0, trigger.clone());
        let start = u64::MAX - 10;

        trigger.trigger_at(start);
        let early = render(&mut source, 0, 256);
        assert!(early[0].iter().all(|&s| s == 0));
        assert_eq!(source.active_voices(), 1);

        let late = render(&mut source, start - 10, 16);
        assert!(late[0][..10].iter().all(|&s| s == 0));
        assert!(late[0][10..].iter().all(|&s| s == 1 << 30));
    }

    #[test]
    fn trigger_now_starts_with_next_period() {
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::new(vec![0.25; 64], 0.5, trigger.clone());

        trigger.trigger_now();
        let output = render(&mut source, 1024, 128);

        let expected = f64_to_sample(0.125);
        assert!(output[0][..64].iter().all(|&s| s == expected));
        assert!(output[0][64..].iter().all(|&s| s == 0));
    }

    #[test]
    fn overlapping_voices_accumulate() {
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::new(vec![0.25; 100], 1.0, trigger.clone());

        trigger.trigger_at(0);
        trigger.trigger_at(50);
        let output = render(&mut source, 0, 200);

        assert_eq!(output[0][10], 1 << 29);
        assert_eq!(output[0][60], 1 << 30);
        assert_eq!(output[0][120], 1 << 29);
        assert_eq!(output[0][160], 0);
    }

    #[test]
    fn voice_count_is_bounded() {
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::new(vec![0.0; 10_000], 1.0, trigger.clone());

        for _ in 0..MAX_VOICES + 4 {
            trigger.trigger_now();
        }
        render(&mut source, 0, 64);

        assert_eq!(source.active_voices(), MAX_VOICES);
    }

    #[test]
    fn trigger_queue_is_bounded() {
        let trigger = ToneTrigger::new();
        for _ in 0..MAX_PENDING {
            assert!(trigger.trigger_now());
        }
        assert!(!trigger.trigger_now());
    }

    #[test]
    fn held_queue_lock_skips_drain() {
        let trigger = ToneTrigger::new();
        let mut source = ToneSource::new(vec![0.5; 64], 1.0, trigger.clone());
        trigger.trigger_now();

        let guard = trigger.queue.lock();
        let output = render(&mut source, 0, 64);
        drop(guard);
        assert!(output[0].iter().all(|&s| s == 0));

        let output = render(&mut source, 64, 64);
        assert!(output[0].iter().all(|&s| s == 1 << 30));
    }
}
