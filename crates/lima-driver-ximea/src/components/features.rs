//! Camera features: image type, ROI, binning, exposure.
//!
//! Stateless helpers over a [`ParamGateway`]. The session caches what it
//! needs (sensor size, model) and calls these for every get/set.

use super::connection::to_u32;
use super::params::ParamGateway;
use crate::sdk::{prm, XI_BIN_MODE_SUM};
use lima_core::{Bin, HwError, HwResult, ImageType, Roi, Size};
use std::time::Duration;

/// Smallest ROI side the camera accepts.
pub const MIN_ROI_SIDE: u32 = 32;

/// Pixel pitch in metres, identical for every supported model.
pub const PIXEL_SIZE_M: f64 = 1e-5;

/// Exposure parameter unit.
const EXPOSURE_UNITS_PER_SECOND: f64 = 1e6;

/// Stateless feature accessors.
pub struct XimeaFeatures;

impl XimeaFeatures {
    // =========================================================================
    // Image type
    // =========================================================================

    /// Current pixel depth.
    pub fn image_type(gw: &mut dyn ParamGateway) -> HwResult<ImageType> {
        let depth = gw.get_int(prm::IMAGE_DATA_BIT_DEPTH)?;
        image_type_for_depth(depth)
    }

    /// Set sensor, output and image data depth.
    pub fn set_image_type(gw: &mut dyn ParamGateway, image_type: ImageType) -> HwResult<()> {
        let depth = depth_for_image_type(image_type)?;
        gw.set_int(prm::SENSOR_DATA_BIT_DEPTH, depth)?;
        gw.set_int(prm::OUTPUT_DATA_BIT_DEPTH, depth)?;
        gw.set_int(prm::IMAGE_DATA_BIT_DEPTH, depth)?;
        tracing::debug!(?image_type, depth, "Image type set");
        Ok(())
    }

    // =========================================================================
    // Size and ROI
    // =========================================================================

    /// Current image size.
    pub fn image_size(gw: &mut dyn ParamGateway) -> HwResult<Size> {
        let width = gw.get_int(prm::WIDTH)?;
        let height = gw.get_int(prm::HEIGHT)?;
        Ok(Size::new(to_u32(width), to_u32(height)))
    }

    /// Align `roi` to what the device accepts.
    ///
    /// An all-zero ROI means full frame. Offsets are aligned down and the
    /// size grown to keep the requested area covered, then rounded up to the
    /// size increment and clamped. Leaves the device at the returned size.
    pub fn check_roi(gw: &mut dyn ParamGateway, max_size: Size, roi: Roi) -> HwResult<Roi> {
        gw.set_int(prm::OFFSET_X, 0)?;
        gw.set_int(prm::OFFSET_Y, 0)?;
        gw.set_int(prm::WIDTH, max_size.width as i32)?;
        gw.set_int(prm::HEIGHT, max_size.height as i32)?;

        if !roi.is_active() {
            return Ok(Roi::full(max_size));
        }
        if roi.width < MIN_ROI_SIDE || roi.height < MIN_ROI_SIDE {
            return Err(HwError::InvalidRoi(format!(
                "ROI must be at least {MIN_ROI_SIDE}x{MIN_ROI_SIDE}"
            )));
        }

        let x_inc = step(gw.get_inc(prm::OFFSET_X)?);
        let y_inc = step(gw.get_inc(prm::OFFSET_Y)?);
        let x = align_down(roi.x, x_inc);
        let y = align_down(roi.y, y_inc);
        let width = roi.width.saturating_add(roi.x - x);
        let height = roi.height.saturating_add(roi.y - y);

        let width = align_up(width, step(gw.get_inc(prm::WIDTH)?)).clamp(
            to_u32(gw.get_min(prm::WIDTH)?),
            to_u32(gw.get_max(prm::WIDTH)?),
        );
        let height = align_up(height, step(gw.get_inc(prm::HEIGHT)?)).clamp(
            to_u32(gw.get_min(prm::HEIGHT)?),
            to_u32(gw.get_max(prm::HEIGHT)?),
        );
        gw.set_int(prm::HEIGHT, height as i32)?;
        gw.set_int(prm::WIDTH, width as i32)?;

        // offset ranges depend on the size just written
        let x = x.clamp(
            to_u32(gw.get_min(prm::OFFSET_X)?),
            to_u32(gw.get_max(prm::OFFSET_X)?),
        );
        let y = y.clamp(
            to_u32(gw.get_min(prm::OFFSET_Y)?),
            to_u32(gw.get_max(prm::OFFSET_Y)?),
        );

        let checked = Roi::new(x, y, width, height);
        if checked != roi {
            tracing::debug!(requested = ?roi, ?checked, "ROI aligned to device increments");
        }
        Ok(checked)
    }

    /// Current ROI.
    pub fn roi(gw: &mut dyn ParamGateway) -> HwResult<Roi> {
        let x = gw.get_int(prm::OFFSET_X)?;
        let y = gw.get_int(prm::OFFSET_Y)?;
        let size = Self::image_size(gw)?;
        Ok(Roi::new(to_u32(x), to_u32(y), size.width, size.height))
    }

    /// Apply an already checked ROI. An inactive ROI is ignored.
    pub fn set_roi(gw: &mut dyn ParamGateway, roi: Roi) -> HwResult<()> {
        if !roi.is_active() {
            return Ok(());
        }
        if Self::roi(gw)? == roi {
            return Ok(());
        }

        // zero the offsets first so any size is accepted
        gw.set_int(prm::OFFSET_X, 0)?;
        gw.set_int(prm::OFFSET_Y, 0)?;
        gw.set_int(prm::WIDTH, roi_value(roi.width)?)?;
        gw.set_int(prm::HEIGHT, roi_value(roi.height)?)?;
        gw.set_int(prm::OFFSET_X, roi_value(roi.x)?)?;
        gw.set_int(prm::OFFSET_Y, roi_value(roi.y)?)?;

        tracing::debug!(?roi, "ROI applied");
        Ok(())
    }

    // =========================================================================
    // Binning
    // =========================================================================

    /// Largest power-of-two factor per axis that divides the request.
    pub fn check_bin(gw: &mut dyn ParamGateway, bin: Bin) -> HwResult<Bin> {
        if bin.x == 0 || bin.y == 0 {
            return Err(HwError::InvalidBin(format!("{}x{}", bin.x, bin.y)));
        }
        let x = supported_bin(
            bin.x,
            gw.get_max(prm::BINNING_HORIZONTAL)?,
            gw.get_inc(prm::BINNING_HORIZONTAL)?,
        );
        let y = supported_bin(
            bin.y,
            gw.get_max(prm::BINNING_VERTICAL)?,
            gw.get_inc(prm::BINNING_VERTICAL)?,
        );
        Ok(Bin::new(x, y))
    }

    /// Apply summing binning.
    pub fn set_bin(gw: &mut dyn ParamGateway, bin: Bin) -> HwResult<()> {
        gw.set_int(prm::BINNING_HORIZONTAL_MODE, XI_BIN_MODE_SUM)?;
        gw.set_int(prm::BINNING_VERTICAL_MODE, XI_BIN_MODE_SUM)?;
        gw.set_int(prm::BINNING_HORIZONTAL, bin.x as i32)?;
        gw.set_int(prm::BINNING_VERTICAL, bin.y as i32)?;
        Ok(())
    }

    /// Current binning.
    pub fn bin(gw: &mut dyn ParamGateway) -> HwResult<Bin> {
        let x = gw.get_int(prm::BINNING_HORIZONTAL)?;
        let y = gw.get_int(prm::BINNING_VERTICAL)?;
        Ok(Bin::new(to_u32(x), to_u32(y)))
    }

    // =========================================================================
    // Exposure
    // =========================================================================

    /// Exposure time in seconds.
    pub fn exposure(gw: &mut dyn ParamGateway) -> HwResult<f64> {
        let us = gw.get_int(prm::EXPOSURE)?;
        Ok(f64::from(us) / EXPOSURE_UNITS_PER_SECOND)
    }

    /// Set exposure time in seconds.
    pub fn set_exposure(gw: &mut dyn ParamGateway, seconds: f64) -> HwResult<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(HwError::Config(format!("invalid exposure time {seconds} s")));
        }
        let us = (seconds * EXPOSURE_UNITS_PER_SECOND).round();
        if us > f64::from(i32::MAX) {
            return Err(HwError::Config(format!("exposure time {seconds} s out of range")));
        }
        gw.set_int(prm::EXPOSURE, us as i32)?;
        Ok(())
    }

    /// Exposure as a duration.
    pub fn exposure_duration(gw: &mut dyn ParamGateway) -> HwResult<Duration> {
        let us = gw.get_int(prm::EXPOSURE)?;
        Ok(Duration::from_micros(u64::try_from(us).unwrap_or(0)))
    }
}

/// Host image type for a device data depth.
pub fn image_type_for_depth(depth: i32) -> HwResult<ImageType> {
    match depth {
        8 => Ok(ImageType::Bpp8),
        10 => Ok(ImageType::Bpp10),
        12 => Ok(ImageType::Bpp12),
        14 => Ok(ImageType::Bpp14),
        16 => Ok(ImageType::Bpp16),
        24 => Ok(ImageType::Bpp24),
        32 => Ok(ImageType::Bpp32),
        9 | 11 => Err(HwError::UnsupportedImageType(format!(
            "{depth}-bit data is not supported by LImA"
        ))),
        other => Err(HwError::UnsupportedImageType(format!("{other}-bit data"))),
    }
}

/// Device data depth for a host image type.
pub fn depth_for_image_type(image_type: ImageType) -> HwResult<i32> {
    match image_type {
        ImageType::Bpp8 => Ok(8),
        ImageType::Bpp10 => Ok(10),
        ImageType::Bpp12 => Ok(12),
        ImageType::Bpp14 => Ok(14),
        ImageType::Bpp16 => Ok(16),
        ImageType::Bpp24 => Ok(24),
        ImageType::Bpp32 => Ok(32),
        other => Err(HwError::UnsupportedImageType(format!("{other:?}"))),
    }
}

/// Walk exponents from `log2(max)` down by `inc`; first power of two that
/// divides `requested` wins, 1 if none does.
fn supported_bin(requested: u32, max: i32, inc: i32) -> u32 {
    let max = to_u32(max).max(1);
    let inc = step(inc) as usize;
    let top = max.ilog2();
    (0..=top)
        .rev()
        .step_by(inc)
        .map(|exp| 1u32 << exp)
        .find(|bin| requested % bin == 0)
        .unwrap_or(1)
}

fn roi_value(value: u32) -> HwResult<i32> {
    i32::try_from(value).map_err(|_| HwError::InvalidRoi(format!("{value} out of range")))
}

fn step(inc: i32) -> u32 {
    to_u32(inc).max(1)
}

fn align_down(value: u32, inc: u32) -> u32 {
    value / inc * inc
}

/// Saturates at `u32::MAX`; callers clamp afterwards.
fn align_up(value: u32, inc: u32) -> u32 {
    value.div_ceil(inc).saturating_mul(inc)
}
