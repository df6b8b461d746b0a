//! Plugin entry point seen by the host.

use crate::error::HwResult;
use serde::{Deserialize, Serialize};

/// Control objects a plugin can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Detector information (model, sizes, pixel size)
    DetInfo,
    /// Frame buffer management
    Buffer,
    /// Trigger / exposure / latency / frame count
    Sync,
    /// Region of interest
    Roi,
    /// Binning
    Bin,
    /// Image flipping
    Flip,
    /// Mechanical shutter
    Shutter,
    /// Asynchronous event reporting
    Event,
    /// Live video
    Video,
}

/// Host-level acquisition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcqStatus {
    /// Idle, ready for a new acquisition.
    Ready,
    /// Acquisition in progress.
    Running,
    /// Acquisition stopped on a fault.
    Fault,
    /// Being reconfigured.
    Config,
}

/// Detector-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetStatus {
    /// Idle.
    Idle,
    /// Faulted.
    Fault,
    /// Waiting for a trigger.
    WaitForTrigger,
    /// Exposing.
    Exposure,
    /// Reading out.
    Readout,
    /// Inter-frame latency.
    Latency,
}

/// Combined status reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HwStatus {
    /// Acquisition part.
    pub acq: AcqStatus,
    /// Detector part.
    pub det: DetStatus,
}

/// Reset depth requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetLevel {
    /// Stop acquisition and return to Ready.
    SoftReset,
    /// Also power-cycle / reopen the device.
    HardReset,
}

/// Hardware interface implemented by every plugin.
///
/// All methods run on the host's control thread.
pub trait HwInterface: Send {
    /// Capabilities this plugin provides.
    fn cap_list(&self) -> Vec<Capability>;

    /// Reset the detector.
    fn reset(&mut self, level: ResetLevel) -> HwResult<()>;

    /// Arm a new acquisition sequence.
    fn prepare_acq(&mut self) -> HwResult<()>;

    /// Start (or, for software-triggered modes, advance) the acquisition.
    fn start_acq(&mut self) -> HwResult<()>;

    /// Stop the running acquisition.
    fn stop_acq(&mut self) -> HwResult<()>;

    /// Current status.
    fn status(&self) -> HwResult<HwStatus>;

    /// Frames published during the current sequence.
    fn nb_hw_acquired_frames(&self) -> u64;
}
