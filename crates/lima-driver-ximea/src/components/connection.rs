//! xiAPI Connection Management
//!
//! Owns the device handle for one camera: opening, the startup parameter
//! sequence, the acquisition start/stop pair and closing.
//!
//! ## Start/stop pairing
//!
//! The SDK expects exactly one `xiStopAcquisition` per `xiStartAcquisition`.
//! Both the acquisition loop (on exit) and the control thread (`stop_acq`,
//! reset, drop) want to stop the device, so the connection tracks whether
//! acquisition is running and turns redundant stops into no-ops.

use super::params::ParamGateway;
use crate::error::DeviceError;
use crate::sdk::{prm, XiApi, XiDevice, XiImage, XiStatus, XI_BP_SAFE, XI_DL_DISABLED};
use lima_core::Size;

/// Manages the handle of one opened camera.
pub struct XiConnection {
    device_id: u32,
    /// `None` once closed
    device: Option<Box<dyn XiDevice>>,
    acquiring: bool,
}

impl XiConnection {
    /// Open camera `device_id`.
    pub fn open(api: &dyn XiApi, device_id: u32) -> Result<Self, DeviceError> {
        let device = api
            .open_device(device_id)
            .map_err(|status| DeviceError::new(status, format!("Could not open camera {device_id}")))?;

        tracing::info!(device_id, "Opened xiAPI device");

        Ok(Self {
            device_id,
            device: Some(device),
            acquiring: false,
        })
    }

    /// Index the device was opened with.
    #[must_use]
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// True until [`close`](Self::close).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Silence SDK logging, select the safe buffer policy and load the
    /// requested user set.
    pub fn apply_startup(&mut self, startup_mode: i32) -> Result<(), DeviceError> {
        self.set_int(prm::DEBUG_LEVEL, XI_DL_DISABLED)?;
        self.set_int(prm::BUFFER_POLICY, XI_BP_SAFE)?;

        self.set_int(prm::USER_SET_SELECTOR, startup_mode)?;
        self.set_int(prm::USER_SET_LOAD, 0)?;
        self.set_int(prm::USER_SET_DEFAULT, startup_mode)?;

        tracing::debug!(device_id = self.device_id, startup_mode, "Applied startup user set");
        Ok(())
    }

    /// Model name reported by the device.
    pub fn model(&mut self) -> Result<String, DeviceError> {
        self.get_string(prm::DEVICE_NAME)
    }

    /// Full sensor size.
    pub fn max_image_size(&mut self) -> Result<Size, DeviceError> {
        let width = self.get_max(prm::WIDTH)?;
        let height = self.get_max(prm::HEIGHT)?;
        Ok(Size::new(to_u32(width), to_u32(height)))
    }

    /// `xiStartAcquisition`.
    pub fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        self.raw()?
            .start_acquisition()
            .map_err(|status| DeviceError::new(status, "Could not start acquisition"))?;
        self.acquiring = true;
        tracing::debug!(device_id = self.device_id, "Acquisition started");
        Ok(())
    }

    /// `xiStopAcquisition`, unless acquisition is already stopped.
    pub fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        if !self.acquiring {
            return Ok(());
        }
        self.acquiring = false;
        self.raw()?
            .stop_acquisition()
            .map_err(|status| DeviceError::new(status, "Could not stop acquisition"))?;
        tracing::debug!(device_id = self.device_id, "Acquisition stopped");
        Ok(())
    }

    /// True between a successful start and the matching stop.
    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    /// `xiGetImage` into `buffer`.
    pub fn get_image(&mut self, timeout_ms: u32, buffer: &mut [u8]) -> Result<XiImage, DeviceError> {
        self.raw()?
            .get_image(timeout_ms, buffer)
            .map_err(|status| DeviceError::new(status, "Could not get image"))
    }

    /// Stop acquisition if needed and close the handle.
    pub fn close(&mut self) {
        if let Err(err) = self.stop_acquisition() {
            tracing::warn!(device_id = self.device_id, error = %err, "Stop before close failed");
        }
        if let Some(mut device) = self.device.take() {
            match device.close() {
                Ok(()) => tracing::info!(device_id = self.device_id, "Closed xiAPI device"),
                Err(status) => {
                    tracing::warn!(device_id = self.device_id, %status, "xiCloseDevice failed")
                }
            }
        }
    }
}

impl ParamGateway for XiConnection {
    fn raw(&mut self) -> Result<&mut (dyn XiDevice + 'static), DeviceError> {
        match self.device.as_deref_mut() {
            Some(device) => Ok(device),
            None => Err(DeviceError::new(
                XiStatus::INVALID_HANDLE,
                format!("Camera {} is closed", self.device_id),
            )),
        }
    }
}

impl Drop for XiConnection {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockXiApi, ParamWrite};

    #[test]
    fn stop_is_issued_once_per_start() {
        let api = MockXiApi::new();
        let handle = api.handle();
        let mut conn = XiConnection::open(&api, 0).unwrap();

        conn.stop_acquisition().unwrap();
        assert_eq!(handle.stop_count(), 0);

        conn.start_acquisition().unwrap();
        assert!(conn.is_acquiring());
        conn.stop_acquisition().unwrap();
        conn.stop_acquisition().unwrap();

        assert_eq!(handle.start_count(), 1);
        assert_eq!(handle.stop_count(), 1);
    }

    #[test]
    fn drop_stops_and_closes() {
        let api = MockXiApi::new();
        let handle = api.handle();
        {
            let mut conn = XiConnection::open(&api, 0).unwrap();
            conn.start_acquisition().unwrap();
        }
        assert_eq!(handle.stop_count(), 1);
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn closed_connection_reports_invalid_handle() {
        let api = MockXiApi::new();
        let mut conn = XiConnection::open(&api, 0).unwrap();
        conn.close();
        assert!(!conn.is_open());

        let err = conn.get_int(prm::WIDTH).unwrap_err();
        assert_eq!(err.status, XiStatus::INVALID_HANDLE);
    }

    #[test]
    fn startup_sequence_order() {
        let api = MockXiApi::new();
        let handle = api.handle();
        let mut conn = XiConnection::open(&api, 0).unwrap();
        conn.apply_startup(2).unwrap();

        assert_eq!(
            handle.writes(),
            vec![
                ParamWrite::int(prm::DEBUG_LEVEL, XI_DL_DISABLED),
                ParamWrite::int(prm::BUFFER_POLICY, XI_BP_SAFE),
                ParamWrite::int(prm::USER_SET_SELECTOR, 2),
                ParamWrite::int(prm::USER_SET_LOAD, 0),
                ParamWrite::int(prm::USER_SET_DEFAULT, 2),
            ]
        );
    }

    #[test]
    fn open_failure_keeps_status() {
        let api = MockXiApi::new();
        api.handle().fail_open(XiStatus::INVALID_ARG);
        let err = XiConnection::open(&api, 3).err().unwrap();
        assert_eq!(err.status, XiStatus::INVALID_ARG);
        assert!(err.context.contains("camera 3"));
    }
}
