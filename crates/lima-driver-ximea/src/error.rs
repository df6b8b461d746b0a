//! Device error type.
//!
//! Every xiAPI call made by the plugin returns `Result<T, DeviceError>`. The
//! raw status travels with the error; there is no shared "last status" field.

use crate::sdk::XiStatus;
use lima_core::HwError;
use thiserror::Error;

/// A failed xiAPI call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{context}; xi_status: {status}")]
pub struct DeviceError {
    /// Raw status returned by the SDK.
    pub status: XiStatus,
    /// Operation and parameter involved.
    pub context: String,
}

impl DeviceError {
    /// Wrap a raw status with context.
    pub fn new(status: XiStatus, context: impl Into<String>) -> Self {
        Self {
            status,
            context: context.into(),
        }
    }

    /// Failed parameter read.
    pub fn get_param(key: &str, status: XiStatus) -> Self {
        Self::new(status, format!("Could not get parameter {key}"))
    }

    /// Failed parameter write.
    pub fn set_param(key: &str, value: impl std::fmt::Display, status: XiStatus) -> Self {
        Self::new(status, format!("Could not set parameter {key} to {value}"))
    }

    /// True when the device merely ran out of time waiting for a frame.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.status.is_timeout()
    }
}

impl From<DeviceError> for HwError {
    fn from(err: DeviceError) -> Self {
        HwError::Device {
            code: err.status.0,
            message: err.context,
        }
    }
}
