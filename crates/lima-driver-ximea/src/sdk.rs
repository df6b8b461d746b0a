//! xiAPI boundary.
//!
//! The plugin never links the vendor library directly. Everything it needs
//! from xiAPI is expressed by two traits:
//!
//! - [`XiApi`]: process-wide entry point, opens devices by index
//! - [`XiDevice`]: one opened camera (the device handle)
//!
//! A production build implements them over the C API; tests use
//! [`crate::mock::MockXiApi`]. Parameter keys and enumerated values below
//! mirror the strings and constants of `xiApi.h`.

use std::fmt;

/// Raw xiAPI return code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct XiStatus(pub i32);

impl XiStatus {
    /// Function call succeeded
    pub const OK: XiStatus = XiStatus(0);
    /// Invalid handle
    pub const INVALID_HANDLE: XiStatus = XiStatus(1);
    /// No image data
    pub const NO_IMAGE: XiStatus = XiStatus(9);
    /// Timeout
    pub const TIMEOUT: XiStatus = XiStatus(10);
    /// Invalid arguments supplied
    pub const INVALID_ARG: XiStatus = XiStatus(11);
    /// Not supported
    pub const NOT_SUPPORTED: XiStatus = XiStatus(12);
    /// Memory allocation error
    pub const MEMORY_ALLOCATION: XiStatus = XiStatus(15);
    /// Function not implemented
    pub const NOT_IMPLEMENTED: XiStatus = XiStatus(26);
    /// Wrong parameter value
    pub const WRONG_PARAM_VALUE: XiStatus = XiStatus(100);
    /// Buffer too small
    pub const BUFFER_TOO_SMALL: XiStatus = XiStatus(103);
    /// Parameter is not supported
    pub const NOT_SUPPORTED_PARAM: XiStatus = XiStatus(104);
    /// Read-only parameter
    pub const READ_ONLY_PARAM: XiStatus = XiStatus(107);

    /// True for `XI_OK`.
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// True for `XI_TIMEOUT`.
    #[must_use]
    pub fn is_timeout(self) -> bool {
        self == Self::TIMEOUT
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::OK => "XI_OK",
            Self::INVALID_HANDLE => "XI_INVALID_HANDLE",
            Self::NO_IMAGE => "XI_NO_IMAGE",
            Self::TIMEOUT => "XI_TIMEOUT",
            Self::INVALID_ARG => "XI_INVALID_ARG",
            Self::NOT_SUPPORTED => "XI_NOT_SUPPORTED",
            Self::MEMORY_ALLOCATION => "XI_MEMORY_ALLOCATION",
            Self::NOT_IMPLEMENTED => "XI_NOT_IMPLEMENTED",
            Self::WRONG_PARAM_VALUE => "XI_WRONG_PARAM_VALUE",
            Self::BUFFER_TOO_SMALL => "XI_BUFFER_TOO_SMALL",
            Self::NOT_SUPPORTED_PARAM => "XI_NOT_SUPPORTED_PARAM",
            Self::READ_ONLY_PARAM => "XI_READ_ONLY_PARAM",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for XiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Result of a raw xiAPI call.
pub type XiResult<T> = Result<T, XiStatus>;

/// Image header filled by `xiGetImage`.
///
/// Field meanings follow `XI_IMG`; the payload itself is written into the
/// caller's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XiImage {
    /// Raw `XI_IMG_FORMAT` value.
    pub frm: i32,
    /// Device frame counter.
    pub nframe: u64,
    /// Capture timestamp, seconds part.
    pub ts_sec: u32,
    /// Capture timestamp, microseconds part.
    pub ts_usec: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes written into the caller's buffer.
    pub bp_size: usize,
}

/// One opened camera.
///
/// Calls on the same device are not reentrant; callers serialise them.
pub trait XiDevice: Send {
    /// `xiGetParamInt`
    fn get_param_int(&mut self, key: &str) -> XiResult<i32>;
    /// `xiGetParamFloat`
    fn get_param_float(&mut self, key: &str) -> XiResult<f32>;
    /// `xiGetParamString`
    fn get_param_string(&mut self, key: &str) -> XiResult<String>;
    /// `xiSetParamInt`
    fn set_param_int(&mut self, key: &str, value: i32) -> XiResult<()>;
    /// `xiSetParamFloat`
    fn set_param_float(&mut self, key: &str, value: f32) -> XiResult<()>;
    /// `xiSetParamString`
    fn set_param_string(&mut self, key: &str, value: &str) -> XiResult<()>;
    /// `xiStartAcquisition`
    fn start_acquisition(&mut self) -> XiResult<()>;
    /// `xiStopAcquisition`
    fn stop_acquisition(&mut self) -> XiResult<()>;
    /// `xiGetImage`: block up to `timeout_ms` for the next frame and write
    /// its payload into `buffer`.
    fn get_image(&mut self, timeout_ms: u32, buffer: &mut [u8]) -> XiResult<XiImage>;
    /// `xiCloseDevice`
    fn close(&mut self) -> XiResult<()>;
}

/// Process-wide xiAPI entry point.
pub trait XiApi: Send + Sync {
    /// `xiOpenDevice`
    fn open_device(&self, device_id: u32) -> XiResult<Box<dyn XiDevice>>;
}

/// Parameter keys (`XI_PRM_*`).
pub mod prm {
    /// Model name string.
    pub const DEVICE_NAME: &str = "device_name";
    /// Interface type string (USB3.0, PCIe, ...).
    pub const DEVICE_TYPE: &str = "device_type";
    /// Write 1 to reset the camera.
    pub const DEVICE_RESET: &str = "device_reset";
    /// SDK log verbosity.
    pub const DEBUG_LEVEL: &str = "debug_level";
    /// Who owns the image buffer.
    pub const BUFFER_POLICY: &str = "buffer_policy";
    /// User set addressed by the load/default keys.
    pub const USER_SET_SELECTOR: &str = "user_set_selector";
    /// Load the selected user set.
    pub const USER_SET_LOAD: &str = "user_set_load";
    /// User set applied at power-up.
    pub const USER_SET_DEFAULT: &str = "user_set_default";

    /// Exposure time in microseconds.
    pub const EXPOSURE: &str = "exposure";

    /// Image width in pixels.
    pub const WIDTH: &str = "width";
    /// Image height in pixels.
    pub const HEIGHT: &str = "height";
    /// Horizontal ROI offset.
    pub const OFFSET_X: &str = "offsetX";
    /// Vertical ROI offset.
    pub const OFFSET_Y: &str = "offsetY";

    /// Horizontal binning factor.
    pub const BINNING_HORIZONTAL: &str = "binning_horizontal";
    /// Vertical binning factor.
    pub const BINNING_VERTICAL: &str = "binning_vertical";
    /// Horizontal binning mode (sum or average).
    pub const BINNING_HORIZONTAL_MODE: &str = "binning_horizontal_mode";
    /// Vertical binning mode (sum or average).
    pub const BINNING_VERTICAL_MODE: &str = "binning_vertical_mode";

    /// Bits per pixel delivered to the application.
    pub const IMAGE_DATA_BIT_DEPTH: &str = "image_data_bit_depth";
    /// Bits per pixel digitised by the sensor.
    pub const SENSOR_DATA_BIT_DEPTH: &str = "sensor_bit_depth";
    /// Bits per pixel sent over the interface.
    pub const OUTPUT_DATA_BIT_DEPTH: &str = "output_bit_depth";

    /// Trigger source (`XI_TRG_SOURCE`).
    pub const TRG_SOURCE: &str = "trigger_source";
    /// What a trigger starts (`XI_TRG_SELECTOR`).
    pub const TRG_SELECTOR: &str = "trigger_selector";
    /// Write 1 to fire a software trigger.
    pub const TRG_SOFTWARE: &str = "trigger_software";
    /// GPI port addressed by `gpi_mode`.
    pub const GPI_SELECTOR: &str = "gpi_selector";
    /// Function of the selected GPI port.
    pub const GPI_MODE: &str = "gpi_mode";

    /// Suffix for the minimum of a parameter.
    pub const INFO_MIN: &str = ":min";
    /// Suffix for the maximum of a parameter.
    pub const INFO_MAX: &str = ":max";
    /// Suffix for the increment of a parameter.
    pub const INFO_INCREMENT: &str = ":inc";
}

/// Generic on/off switch value (`XI_ON`).
pub const XI_ON: i32 = 1;
/// Buffer policy: SDK copies into the application buffer (`XI_BP_SAFE`).
pub const XI_BP_SAFE: i32 = 1;
/// Debug level that silences the SDK (`XI_DL_DISABLED`).
pub const XI_DL_DISABLED: i32 = 100;
/// GPI configured as trigger input (`XI_GPI_TRIGGER`).
pub const XI_GPI_TRIGGER: i32 = 1;
/// Binning adds pixel values (`XI_BIN_MODE_SUM`).
pub const XI_BIN_MODE_SUM: i32 = 0;

/// Pixel formats (`XI_IMG_FORMAT`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum XiImageFormat {
    /// 8 bits per pixel.
    Mono8,
    /// 16 bits per pixel.
    Mono16,
    /// RGB, 8 bits per channel.
    Rgb24,
    /// RGB plus padding byte, 8 bits per channel.
    Rgb32,
    /// Planar RGB, 8 bits per channel.
    RgbPlanar,
    /// Unprocessed 8-bit sensor data.
    Raw8,
    /// Unprocessed 16-bit sensor data.
    Raw16,
    /// Data as sent over the interface, unpacked by the SDK.
    TransportData,
    /// RGB, 16 bits per channel.
    Rgb48,
    /// RGB plus padding, 16 bits per channel.
    Rgb64,
    /// Planar RGB, 16 bits per channel.
    Rgb16Planar,
    /// Two 8-bit raw channels.
    Raw8x2,
    /// Four 8-bit raw channels.
    Raw8x4,
    /// Two 16-bit raw channels.
    Raw16x2,
    /// Four 16-bit raw channels.
    Raw16x4,
    /// Unprocessed 32-bit sensor data.
    Raw32,
    /// 32-bit float sensor data.
    Raw32Float,
    /// A value this crate does not know.
    Unknown(i32),
}

impl XiImageFormat {
    /// Decode a raw `XI_IMG_FORMAT`.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Mono8,
            1 => Self::Mono16,
            2 => Self::Rgb24,
            3 => Self::Rgb32,
            4 => Self::RgbPlanar,
            5 => Self::Raw8,
            6 => Self::Raw16,
            7 => Self::TransportData,
            8 => Self::Rgb48,
            9 => Self::Rgb64,
            10 => Self::Rgb16Planar,
            11 => Self::Raw8x2,
            12 => Self::Raw8x4,
            13 => Self::Raw16x2,
            14 => Self::Raw16x4,
            15 => Self::Raw32,
            16 => Self::Raw32Float,
            other => Self::Unknown(other),
        }
    }

    /// Encode back to the raw value.
    #[must_use]
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Mono8 => 0,
            Self::Mono16 => 1,
            Self::Rgb24 => 2,
            Self::Rgb32 => 3,
            Self::RgbPlanar => 4,
            Self::Raw8 => 5,
            Self::Raw16 => 6,
            Self::TransportData => 7,
            Self::Rgb48 => 8,
            Self::Rgb64 => 9,
            Self::Rgb16Planar => 10,
            Self::Raw8x2 => 11,
            Self::Raw8x4 => 12,
            Self::Raw16x2 => 13,
            Self::Raw16x4 => 14,
            Self::Raw32 => 15,
            Self::Raw32Float => 16,
            Self::Unknown(raw) => raw,
        }
    }

    /// Bytes per pixel as delivered by the device.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono8 | Self::Raw8 | Self::TransportData => 1,
            Self::Mono16 | Self::Raw16 => 2,
            Self::Rgb24 | Self::RgbPlanar => 3,
            Self::Rgb32 | Self::Raw32 | Self::Raw32Float => 4,
            Self::Rgb48 | Self::Rgb16Planar => 6,
            Self::Rgb64 => 8,
            Self::Raw8x2 => 2,
            Self::Raw8x4 | Self::Raw16x2 => 4,
            Self::Raw16x4 => 8,
            Self::Unknown(_) => 1,
        }
    }
}
