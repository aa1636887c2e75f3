//! WASAPI failures and their mapping onto [`DriverError`].

use asio_fanout_core::models::error::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("COM initialization failed: {0}")]
    ComInit(windows::core::Error),

    #[error("{context}: {source}")]
    Enumeration {
        context: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("{device}: {context} failed: {source}")]
    Activation {
        device: String,
        context: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("{device}: no supported format for {sample_rate} Hz x{channels}")]
    NoFormat {
        device: String,
        sample_rate: u32,
        channels: u16,
    },

    #[error("{device}: {context} failed: {source}")]
    Stream {
        device: String,
        context: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("performance counter unavailable: {0}")]
    Timer(windows::core::Error),

    #[error("failed to make {device} the default endpoint: {source}")]
    PolicyConfig {
        device: String,
        #[source]
        source: windows::core::Error,
    },
}

impl From<WasapiError> for DriverError {
    fn from(e: WasapiError) -> Self {
        let message = e.to_string();
        match e {
            WasapiError::ComInit(_) | WasapiError::Enumeration { .. } | WasapiError::Timer(_) => {
                DriverError::NotPresent
            }
            WasapiError::DeviceNotFound(_) => DriverError::DeviceNotAvailable(message),
            WasapiError::Activation { .. } => DriverError::StreamActivation(message),
            WasapiError::NoFormat { .. } => DriverError::UnsupportedFormat(message),
            WasapiError::Stream { .. } => DriverError::HardwareMalfunction(message),
            WasapiError::PolicyConfig { .. } => DriverError::ConfigurationFailed(message),
        }
    }
}

/// Attach context to a `windows` result.
pub(crate) trait ResultExt<T> {
    fn activation(self, device: &str, context: &'static str) -> Result<T, WasapiError>;
    fn stream(self, device: &str, context: &'static str) -> Result<T, WasapiError>;
}

impl<T> ResultExt<T> for windows::core::Result<T> {
    fn activation(self, device: &str, context: &'static str) -> Result<T, WasapiError> {
        self.map_err(|source| WasapiError::Activation {
            device: device.to_string(),
            context,
            source,
        })
    }

    fn stream(self, device: &str, context: &'static str) -> Result<T, WasapiError> {
        self.map_err(|source| WasapiError::Stream {
            device: device.to_string(),
            context,
            source,
        })
    }
}
