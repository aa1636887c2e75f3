//! Logical sample clock shared between the render thread and host queries.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::models::audio_models::DevicePosition;

/// Source of host timestamps in nanoseconds. Must be monotonic.
pub trait TimeSource: Send + Sync {
    fn now_nanos(&self) -> u64;
}

/// [`TimeSource`] backed by `std::time::Instant`.
///
/// Counts from construction, so its readings only compare with each other.
/// Platform backends supply a source on the system time base instead.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Frame counter observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SamplePosition(pub u64);

/// Host timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AsioTimeStamp(pub u64);

macro_rules! split_u64 {
    ($ty:ty) => {
        impl $ty {
            /// High 32 bits, as the host contract splits 64-bit values.
            pub fn hi(&self) -> u32 {
                (self.0 >> 32) as u32
            }

            pub fn lo(&self) -> u32 {
                self.0 as u32
            }
        }
    };
}

split_u64!(SamplePosition);
split_u64!(AsioTimeStamp);

/// Everything the clock knows at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockSnapshot {
    pub position: SamplePosition,
    pub timestamp: AsioTimeStamp,
    pub primary: Option<DevicePosition>,
    pub periods: u64,
}

impl ClockSnapshot {
    /// Logical frames minus frames the primary device has played or queued.
    /// Positive means the host is ahead of the hardware.
    pub fn primary_lead(&self) -> Option<i64> {
        self.primary
            .map(|p| self.position.0 as i64 - (p.played_frames + p.queued_frames) as i64)
    }
}

/// Reconciles the monotonic logical position with the primary device.
///
/// Updated once per mixing period by the render thread and queried by the
/// host. The lock is only held for the copy in or out, never across I/O.
pub struct SynchronizedClock {
    state: Mutex<ClockSnapshot>,
    time: Arc<dyn TimeSource>,
}

impl SynchronizedClock {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            state: Mutex::new(ClockSnapshot::default()),
            time,
        }
    }

    /// Refresh the timestamp without moving the position (pipeline start).
    pub fn stamp(&self) {
        let now = self.time.now_nanos();
        let mut s = self.state.lock();
        s.timestamp = AsioTimeStamp(s.timestamp.0.max(now));
    }

    /// Record one completed period of `frames` frames.
    pub fn advance(&self, frames: u64, primary: Option<DevicePosition>) {
        let now = self.time.now_nanos();
        let mut s = self.state.lock();
        s.position = SamplePosition(s.position.0 + frames);
        s.timestamp = AsioTimeStamp(s.timestamp.0.max(now));
        if primary.is_some() {
            s.primary = primary;
        }
        s.periods += 1;
    }

    /// Position and timestamp of the last completed period.
    pub fn query(&self) -> (SamplePosition, AsioTimeStamp) {
        let s = self.state.lock();
        (s.position, s.timestamp)
    }

    pub fn position(&self) -> SamplePosition {
        self.state.lock().position
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        *self.state.lock()
    }
}
