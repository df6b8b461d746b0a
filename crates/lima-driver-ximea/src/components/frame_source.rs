//! Pulls one frame from the device into a caller-provided slot.

use super::connection::XiConnection;
use crate::error::DeviceError;
use crate::sdk::{XiImage, XiImageFormat};
use lima_core::VideoMode;
use std::time::Duration;

/// Metadata of one frame returned by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Device frame counter.
    pub seq: u64,
    /// Capture time on the device clock.
    pub timestamp: Duration,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: XiImageFormat,
    /// Bytes the device wrote into the slot.
    pub payload_bytes: usize,
}

impl FrameHeader {
    /// Host pixel layout for this frame's format, if the host has one.
    #[must_use]
    pub fn video_mode(&self) -> Option<VideoMode> {
        match self.format {
            XiImageFormat::Mono8 => Some(VideoMode::Y8),
            XiImageFormat::Mono16 => Some(VideoMode::Y16),
            XiImageFormat::Rgb24 => Some(VideoMode::Rgb24),
            XiImageFormat::Rgb32 => Some(VideoMode::Rgb32),
            _ => None,
        }
    }
}

impl From<XiImage> for FrameHeader {
    fn from(image: XiImage) -> Self {
        Self {
            seq: image.nframe,
            timestamp: Duration::from_secs(u64::from(image.ts_sec))
                + Duration::from_micros(u64::from(image.ts_usec)),
            width: image.width,
            height: image.height,
            format: XiImageFormat::from_raw(image.frm),
            payload_bytes: image.bp_size,
        }
    }
}

/// Blocking frame reader with a fixed per-call timeout.
#[derive(Clone, Copy, Debug)]
pub struct FrameSource {
    timeout_ms: u32,
}

impl FrameSource {
    /// Reader that waits at most `timeout` per frame.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_ms: u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX),
        }
    }

    /// Per-call timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Wait for the next frame and write its payload into `slot`.
    ///
    /// A timeout is returned as an error like any other status; callers
    /// check [`DeviceError::is_timeout`].
    pub fn pull(&self, conn: &mut XiConnection, slot: &mut [u8]) -> Result<FrameHeader, DeviceError> {
        conn.get_image(self.timeout_ms, slot).map(FrameHeader::from)
    }
}
