//! Trigger configuration and the software-trigger flag.
//!
//! Each supported [`TrigMode`] maps to a `(trigger_source, trigger_selector)`
//! pair. The two edge-triggered external modes also route the configured GPI
//! port to trigger mode first. The gate mode runs on the level of the input
//! and leaves the GPI configuration alone.
//!
//! | Mode            | GPI setup | Source                 | Selector            |
//! |-----------------|-----------|------------------------|---------------------|
//! | `IntTrig`       | no        | OFF                    | FRAME_BURST_START   |
//! | `IntTrigMult`   | no        | SOFTWARE               | FRAME_START         |
//! | `ExtTrigSingle` | yes       | EDGE_RISING / FALLING  | FRAME_BURST_START   |
//! | `ExtTrigMult`   | yes       | EDGE_RISING / FALLING  | FRAME_START         |
//! | `ExtGate`       | no        | LEVEL_HIGH / LOW       | EXPOSURE_ACTIVE     |

use super::params::ParamGateway;
use crate::error::DeviceError;
use crate::sdk::{prm, XI_GPI_TRIGGER, XI_ON};
use lima_core::{HwError, HwResult, TrigMode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// `XI_TRG_SOURCE`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TriggerSource {
    /// Free run
    Off = 0,
    /// Rising edge on the GPI
    EdgeRising = 1,
    /// Falling edge on the GPI
    EdgeFalling = 2,
    /// `trigger_software` writes
    Software = 3,
    /// Exposure while the GPI is high
    LevelHigh = 4,
    /// Exposure while the GPI is low
    LevelLow = 5,
}

/// `XI_TRG_SELECTOR`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TriggerSelector {
    /// Each trigger starts one frame
    FrameStart = 0,
    /// Trigger level gates the exposure
    ExposureActive = 1,
    /// One trigger starts the whole burst
    FrameBurstStart = 2,
}

/// Which edge or level of the external input is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolarity {
    /// Falling edge, or low level for the gate mode.
    LowFalling,
    /// Rising edge, or high level for the gate mode.
    #[default]
    HighRising,
}

/// Device-side routing for one trigger mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerRouting {
    /// Route the GPI port to trigger mode first.
    pub gpi_setup: bool,
    /// Value for `trigger_source`.
    pub source: TriggerSource,
    /// Value for `trigger_selector`.
    pub selector: TriggerSelector,
}

impl TriggerRouting {
    /// Routing for `mode`, or `None` if the camera cannot do it.
    #[must_use]
    pub fn for_mode(mode: TrigMode, polarity: TriggerPolarity) -> Option<Self> {
        let edge = match polarity {
            TriggerPolarity::HighRising => TriggerSource::EdgeRising,
            TriggerPolarity::LowFalling => TriggerSource::EdgeFalling,
        };
        let level = match polarity {
            TriggerPolarity::HighRising => TriggerSource::LevelHigh,
            TriggerPolarity::LowFalling => TriggerSource::LevelLow,
        };

        let routing = match mode {
            TrigMode::IntTrig => (false, TriggerSource::Off, TriggerSelector::FrameBurstStart),
            TrigMode::IntTrigMult => (false, TriggerSource::Software, TriggerSelector::FrameStart),
            TrigMode::ExtTrigSingle => (true, edge, TriggerSelector::FrameBurstStart),
            TrigMode::ExtTrigMult => (true, edge, TriggerSelector::FrameStart),
            TrigMode::ExtGate => (false, level, TriggerSelector::ExposureActive),
            TrigMode::ExtStartStop | TrigMode::ExtTrigReadout => return None,
        };

        Some(Self {
            gpi_setup: routing.0,
            source: routing.1,
            selector: routing.2,
        })
    }
}

/// Single-shot software trigger flag shared between the control thread
/// and the acquisition loop.
///
/// Raising it twice before the loop consumes it still yields one frame.
#[derive(Clone, Debug, Default)]
pub struct SoftTrigger(Arc<AtomicBool>);

impl SoftTrigger {
    /// Create a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a trigger as pending.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Take the pending trigger, if any. Clears the flag.
    pub fn consume(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// True if a trigger is waiting to be consumed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Applies trigger modes to the device and issues software triggers.
#[derive(Debug, Clone)]
pub struct TriggerController {
    gpi_port: i32,
    soft_trigger: SoftTrigger,
}

impl TriggerController {
    /// Controller routing external triggers through `gpi_port`.
    #[must_use]
    pub fn new(gpi_port: u32) -> Self {
        Self {
            gpi_port: i32::try_from(gpi_port).unwrap_or(1),
            soft_trigger: SoftTrigger::new(),
        }
    }

    /// Handle on the flag the acquisition loop polls.
    #[must_use]
    pub fn soft_trigger(&self) -> SoftTrigger {
        self.soft_trigger.clone()
    }

    /// True if `mode` can be configured.
    #[must_use]
    pub fn check_mode(mode: TrigMode) -> bool {
        TriggerRouting::for_mode(mode, TriggerPolarity::default()).is_some()
    }

    /// Write the routing for `mode` to the device.
    pub fn configure(
        &self,
        gw: &mut dyn ParamGateway,
        mode: TrigMode,
        polarity: TriggerPolarity,
    ) -> HwResult<()> {
        let routing =
            TriggerRouting::for_mode(mode, polarity).ok_or(HwError::InvalidTrigMode(mode))?;

        if routing.gpi_setup {
            self.route_gpi_to_trigger(gw)?;
        }
        gw.set_int(prm::TRG_SOURCE, routing.source as i32)?;
        gw.set_int(prm::TRG_SELECTOR, routing.selector as i32)?;

        tracing::debug!(?mode, ?polarity, ?routing, "Trigger mode configured");
        Ok(())
    }

    /// Write `trigger_software` and raise the loop's flag.
    pub fn issue_software_trigger(&self, gw: &mut dyn ParamGateway) -> Result<(), DeviceError> {
        gw.set_int(prm::TRG_SOFTWARE, XI_ON)?;
        self.soft_trigger.raise();
        tracing::trace!("Software trigger issued");
        Ok(())
    }

    /// Put the trigger port in trigger mode, leaving the GPI selector as it
    /// was found.
    fn route_gpi_to_trigger(&self, gw: &mut dyn ParamGateway) -> Result<(), DeviceError> {
        let previous = gw.get_int(prm::GPI_SELECTOR)?;
        gw.set_int(prm::GPI_SELECTOR, self.gpi_port)?;
        gw.set_int(prm::GPI_MODE, XI_GPI_TRIGGER)?;
        gw.set_int(prm::GPI_SELECTOR, previous)?;
        Ok(())
    }
}
