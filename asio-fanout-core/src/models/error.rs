use thiserror::Error;

/// Errors raised by the driver core.
///
/// Construction-time and validation paths return these; the steady-state
/// render path never does. Use [`DriverError::to_asio`] to obtain the result
/// code handed back to the host.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("no target output device found")]
    NoTargetDevice,

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("stream activation failed: {0}")]
    StreamActivation(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("not present")]
    NotPresent,

    #[error("hardware malfunction: {0}")]
    HardwareMalfunction(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("asset decode failed: {0}")]
    AssetDecode(String),

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),
}

/// Result codes of the low-latency driver callback contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsioError {
    Ok,
    NotPresent,
    HwMalfunction,
    InvalidParameter,
    InvalidMode,
    SpNotAdvancing,
    NoClock,
}

impl AsioError {
    /// Numeric code as defined by the driver SDK.
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::NotPresent => -1000,
            Self::HwMalfunction => -999,
            Self::InvalidParameter => -998,
            Self::InvalidMode => -997,
            Self::SpNotAdvancing => -996,
            Self::NoClock => -995,
        }
    }
}

impl DriverError {
    pub fn to_asio(&self) -> AsioError {
        match self {
            Self::NoTargetDevice | Self::DeviceNotAvailable(_) | Self::NotPresent => {
                AsioError::NotPresent
            }
            Self::UnsupportedFormat(_) => AsioError::NoClock,
            Self::InvalidParameter(_) => AsioError::InvalidParameter,
            Self::InvalidMode(_) => AsioError::InvalidMode,
            Self::StreamActivation(_)
            | Self::HardwareMalfunction(_)
            | Self::ConfigurationFailed(_)
            | Self::AssetDecode(_)
            | Self::ThreadSpawn(_) => AsioError::HwMalfunction,
        }
    }
}

impl From<Result<(), DriverError>> for AsioError {
    fn from(result: Result<(), DriverError>) -> Self {
        match result {
            Ok(()) => AsioError::Ok,
            Err(e) => e.to_asio(),
        }
    }
}
