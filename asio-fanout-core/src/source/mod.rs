//! Auxiliary audio mixed into the driver output.
//!
//! The set of sources is closed, so they are modelled as an enum and
//! dispatched through [`AudioSource::render`].

pub mod loopback;
pub mod tone;

pub use loopback::{DefaultDeviceOverride, LoopbackSource};
pub use tone::{ToneSource, ToneTrigger};

pub enum AudioSource {
    Loopback(LoopbackSource),
    Tone(ToneSource),
}

impl AudioSource {
    /// Mix one period into `output`.
    ///
    /// `output` holds one buffer per channel, all the same length. Sources
    /// add to what is already there; `current_frame` is the logical position
    /// of the first frame.
    pub fn render(&mut self, current_frame: u64, output: &mut [Vec<i32>]) {
        match self {
            Self::Loopback(source) => source.render(current_frame, output),
            Self::Tone(source) => source.render(current_frame, output),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Loopback(source) => source.device_id(),
            Self::Tone(_) => "tone-cue",
        }
    }
}

impl From<LoopbackSource> for AudioSource {
    fn from(source: LoopbackSource) -> Self {
        Self::Loopback(source)
    }
}

impl From<ToneSource> for AudioSource {
    fn from(source: ToneSource) -> Self {
        Self::Tone(source)
    }
}
