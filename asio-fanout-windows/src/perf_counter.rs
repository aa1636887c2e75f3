//! Host timestamps from the Windows performance counter.

use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};

use asio_fanout_core::clock::TimeSource;

use crate::error::WasapiError;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// [`TimeSource`] reading `QueryPerformanceCounter`.
///
/// Timestamps share the system time base, so hosts can relate them to
/// their own counter readings.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceCounterTime {
    frequency: u64,
}

impl PerformanceCounterTime {
    pub fn new() -> Result<Self, WasapiError> {
        let mut frequency = 0i64;
        unsafe { QueryPerformanceFrequency(&mut frequency) }.map_err(WasapiError::Timer)?;
        if frequency <= 0 {
            return Err(WasapiError::Timer(windows::core::Error::empty()));
        }
        Ok(Self {
            frequency: frequency as u64,
        })
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        (ticks as u128 * NANOS_PER_SECOND / self.frequency as u128) as u64
    }
}

impl TimeSource for PerformanceCounterTime {
    fn now_nanos(&self) -> u64 {
        let mut ticks = 0i64;
        // Cannot fail on any supported Windows version.
        if let Err(e) = unsafe { QueryPerformanceCounter(&mut ticks) } {
            log::error!("QueryPerformanceCounter failed: {}", e);
            return 0;
        }
        self.ticks_to_nanos(ticks.max(0) as u64)
    }
}
