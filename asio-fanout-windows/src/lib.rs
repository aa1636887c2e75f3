//! # asio-fanout-windows
//!
//! WASAPI backend for asio-fanout.
//!
//! Provides:
//! - `WasapiBackend`: [`AudioBackend`](asio_fanout_core::AudioBackend) over the MMDevice API
//! - `WasapiOutput`: event-driven exclusive or shared render stream
//! - `WasapiLoopback`: polled loopback capture of a render endpoint
//! - `DeviceEnumerator`: render endpoint enumeration
//! - `PerformanceCounterTime`: host timestamps on the `QueryPerformanceCounter` time base
//! - `policy_config`: default endpoint switching
//!
//! ## Platform Requirements
//! - Windows 10 or later
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use asio_fanout_core::DriverPreferences;
//!
//! let prefs = DriverPreferences::load(path)?;
//! let mut driver = asio_fanout_windows::open_driver(prefs)?;
//! driver.create_buffers(&infos, 256, host)?;
//! driver.start()?;
//! ```

#[cfg(target_os = "windows")]
pub mod backend;
#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
pub mod perf_counter;
#[cfg(target_os = "windows")]
pub mod policy_config;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;
#[cfg(target_os = "windows")]
pub mod wasapi_output;
#[cfg(target_os = "windows")]
mod wave_format;

#[cfg(target_os = "windows")]
pub use backend::WasapiBackend;
#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use error::WasapiError;
#[cfg(target_os = "windows")]
pub use perf_counter::PerformanceCounterTime;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiLoopback;
#[cfg(target_os = "windows")]
pub use wasapi_output::WasapiOutput;

/// Build a [`Driver`](asio_fanout_core::Driver) on the WASAPI backend.
///
/// Timestamps handed to the host come from the performance counter.
#[cfg(target_os = "windows")]
pub fn open_driver(
    prefs: asio_fanout_core::DriverPreferences,
) -> Result<asio_fanout_core::Driver, asio_fanout_core::DriverError> {
    let time = PerformanceCounterTime::new()?;
    asio_fanout_core::Driver::with_time_source(
        std::sync::Arc::new(WasapiBackend::new()),
        prefs,
        std::sync::Arc::new(time),
    )
}
