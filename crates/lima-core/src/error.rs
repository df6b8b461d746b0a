//! Error type for synchronous control-thread operations.
//!
//! `HwError` is what the host sees when a call such as `set_trig_mode`,
//! `set_roi` or `set_image_type` fails. Errors raised on the acquisition
//! thread are never returned through this type; they are turned into an
//! acquisition state plus an [`Event`](crate::event::Event).
//!
//! ## Error Categories
//!
//! 1. **Configuration** - `InvalidTrigMode`, `InvalidRoi`, `InvalidBin`,
//!    `UnsupportedImageType`, `Config`
//!    - Raised before any device traffic or by a device refusing a value
//!    - Recovery: pick a different value
//!
//! 2. **Device** - `Device`
//!    - A vendor SDK call returned a non-success status
//!    - Recovery: depends on the status; a reset is the usual last resort
//!
//! 3. **Lifecycle** - `NotPrepared`, `AcquisitionRunning`, `ThreadSpawn`
//!    - Call made in the wrong acquisition phase, or the OS refused a thread
//!    - Recovery: `stop_acq` (or `prepare_acq`) and retry

use crate::types::TrigMode;
use thiserror::Error;

/// Convenience alias for results using [`HwError`].
pub type HwResult<T> = std::result::Result<T, HwError>;

/// Primary error type for hardware plugin control calls.
#[derive(Error, Debug)]
pub enum HwError {
    /// A vendor SDK call failed.
    ///
    /// `code` is the raw status returned by the SDK so callers can match on
    /// vendor-specific values.
    #[error("Device error (status {code}): {message}")]
    Device {
        /// Raw vendor status code.
        code: i32,
        /// Human readable context (operation and parameter key).
        message: String,
    },

    /// The requested trigger mode is not supported by this detector.
    #[error("Trigger mode {0:?} is not supported")]
    InvalidTrigMode(TrigMode),

    /// The requested region of interest cannot be applied.
    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    /// The requested binning cannot be applied.
    #[error("Invalid binning: {0}")]
    InvalidBin(String),

    /// The requested or reported pixel depth has no host equivalent.
    #[error("Unsupported image type: {0}")]
    UnsupportedImageType(String),

    /// Plugin configuration failed validation.
    #[error("Configuration validation error: {0}")]
    Config(String),

    /// `start_acq` was called without a preceding `prepare_acq`.
    #[error("Acquisition not prepared")]
    NotPrepared,

    /// A setting was changed while the acquisition thread is running.
    ///
    /// Carries the name of the rejected operation.
    #[error("Cannot {0} while acquisition is running")]
    AcquisitionRunning(&'static str),

    /// The acquisition thread could not be spawned.
    #[error("Failed to spawn acquisition thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

impl HwError {
    /// Raw vendor status if this error came from the device.
    #[must_use]
    pub fn device_code(&self) -> Option<i32> {
        match self {
            HwError::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}
