//! Typed parameter access.
//!
//! [`ParamGateway`] turns raw `xiGetParam*`/`xiSetParam*` calls into
//! `Result<T, DeviceError>` with the key and value recorded in the error.
//! Range queries (`:min`, `:max`, `:inc`) are plain integer reads on the
//! suffixed key.

use crate::error::DeviceError;
use crate::sdk::{prm, XiDevice};

/// Typed get/set over an opened device.
///
/// Implementors only provide [`raw`](ParamGateway::raw); every accessor is
/// built on top of it.
pub trait ParamGateway {
    /// The device handle, or an error if the device is closed.
    fn raw(&mut self) -> Result<&mut (dyn XiDevice + 'static), DeviceError>;

    /// Read an integer parameter.
    fn get_int(&mut self, key: &str) -> Result<i32, DeviceError> {
        let value = self
            .raw()?
            .get_param_int(key)
            .map_err(|status| DeviceError::get_param(key, status))?;
        tracing::trace!(key, value, "xiGetParamInt");
        Ok(value)
    }

    /// Write an integer parameter.
    fn set_int(&mut self, key: &str, value: i32) -> Result<(), DeviceError> {
        tracing::trace!(key, value, "xiSetParamInt");
        self.raw()?
            .set_param_int(key, value)
            .map_err(|status| DeviceError::set_param(key, value, status))
    }

    /// Read a float parameter.
    fn get_float(&mut self, key: &str) -> Result<f32, DeviceError> {
        self.raw()?
            .get_param_float(key)
            .map_err(|status| DeviceError::get_param(key, status))
    }

    /// Write a float parameter.
    fn set_float(&mut self, key: &str, value: f32) -> Result<(), DeviceError> {
        tracing::trace!(key, value, "xiSetParamFloat");
        self.raw()?
            .set_param_float(key, value)
            .map_err(|status| DeviceError::set_param(key, value, status))
    }

    /// Read a string parameter.
    fn get_string(&mut self, key: &str) -> Result<String, DeviceError> {
        self.raw()?
            .get_param_string(key)
            .map_err(|status| DeviceError::get_param(key, status))
    }

    /// Write a string parameter.
    fn set_string(&mut self, key: &str, value: &str) -> Result<(), DeviceError> {
        self.raw()?
            .set_param_string(key, value)
            .map_err(|status| DeviceError::set_param(key, value, status))
    }

    /// Minimum accepted value of `key`.
    fn get_min(&mut self, key: &str) -> Result<i32, DeviceError> {
        self.get_int(&info_key(key, prm::INFO_MIN))
    }

    /// Maximum accepted value of `key`.
    fn get_max(&mut self, key: &str) -> Result<i32, DeviceError> {
        self.get_int(&info_key(key, prm::INFO_MAX))
    }

    /// Step between accepted values of `key`.
    fn get_inc(&mut self, key: &str) -> Result<i32, DeviceError> {
        self.get_int(&info_key(key, prm::INFO_INCREMENT))
    }
}

fn info_key(key: &str, suffix: &str) -> String {
    let mut full = String::with_capacity(key.len() + suffix.len());
    full.push_str(key);
    full.push_str(suffix);
    full
}
