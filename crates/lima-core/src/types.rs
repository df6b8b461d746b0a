//! Value types shared across the host/plugin boundary.

use serde::{Deserialize, Serialize};

/// Trigger modes understood by the host.
///
/// Plugins advertise which subset they support through their sync control;
/// the rest must be rejected synchronously.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrigMode {
    /// Free-running internal trigger.
    IntTrig,
    /// One software trigger per frame.
    IntTrigMult,
    /// A single external edge starts the whole sequence.
    ExtTrigSingle,
    /// One external edge per frame.
    ExtTrigMult,
    /// External level gates the exposure.
    ExtGate,
    /// External start and stop edges.
    ExtStartStop,
    /// External edge triggers readout.
    ExtTrigReadout,
}

impl TrigMode {
    /// True for the hardware-triggered modes.
    #[must_use]
    pub fn is_external(self) -> bool {
        !matches!(self, TrigMode::IntTrig | TrigMode::IntTrigMult)
    }
}

/// Pixel coordinates of a top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

/// Image size in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Region of interest for camera acquisition.
///
/// An all-zero ROI is "inactive" and means the full sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    /// X-coordinate of top-left corner in pixels
    pub x: u32,
    /// Y-coordinate of top-left corner in pixels
    pub y: u32,
    /// Width of ROI in pixels
    pub width: u32,
    /// Height of ROI in pixels
    pub height: u32,
}

impl Roi {
    /// Create a new ROI.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full-frame ROI for a given sensor size.
    #[must_use]
    pub const fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// An ROI is active unless every field is zero.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self != Roi::default()
    }

    /// Top-left corner.
    #[must_use]
    pub fn top_left(&self) -> Point {
        Point {
            x: self.x,
            y: self.y,
        }
    }

    /// Width and height.
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Binning factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bin {
    /// Horizontal factor.
    pub x: u32,
    /// Vertical factor.
    pub y: u32,
}

impl Bin {
    /// Create a new binning.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl Default for Bin {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Pixel depth as seen by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    /// 8-bit unsigned.
    Bpp8,
    /// 8-bit signed.
    Bpp8S,
    /// 10-bit unsigned in 16-bit words.
    Bpp10,
    /// 12-bit unsigned in 16-bit words.
    Bpp12,
    /// 14-bit unsigned in 16-bit words.
    Bpp14,
    /// 16-bit unsigned.
    Bpp16,
    /// 16-bit signed.
    Bpp16S,
    /// 24-bit unsigned in 32-bit words.
    Bpp24,
    /// 32-bit unsigned.
    Bpp32,
    /// 32-bit signed.
    Bpp32S,
    /// 32-bit float.
    Bpp32F,
}

impl ImageType {
    /// Bytes used to store one pixel.
    #[must_use]
    pub fn depth_bytes(self) -> usize {
        match self {
            ImageType::Bpp8 | ImageType::Bpp8S => 1,
            ImageType::Bpp10
            | ImageType::Bpp12
            | ImageType::Bpp14
            | ImageType::Bpp16
            | ImageType::Bpp16S => 2,
            ImageType::Bpp24 | ImageType::Bpp32 | ImageType::Bpp32S | ImageType::Bpp32F => 4,
        }
    }
}

/// Dimensions of one frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameDim {
    /// Image size in pixels.
    pub size: Size,
    /// Pixel type.
    pub image_type: ImageType,
}

impl FrameDim {
    /// Create a new frame dimension.
    #[must_use]
    pub const fn new(size: Size, image_type: ImageType) -> Self {
        Self { size, image_type }
    }

    /// Bytes needed for one frame.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.size.width as usize * self.size.height as usize * self.image_type.depth_bytes()
    }
}

/// Pixel layout tag attached to each published frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoMode {
    /// 8-bit monochrome.
    Y8,
    /// 16-bit monochrome.
    Y16,
    /// 8-bit RGB.
    Rgb24,
    /// 8-bit RGB with padding byte.
    Rgb32,
}
