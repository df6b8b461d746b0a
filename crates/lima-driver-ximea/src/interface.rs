//! Host-facing hardware interface.

use crate::camera::Camera;
use crate::components::acquisition::CameraStatus;
use lima_core::{
    AcqStatus, Capability, DetStatus, HwInterface, HwResult, HwStatus, ResetLevel, TrigMode,
};

/// [`HwInterface`] over one [`Camera`].
pub struct Interface {
    camera: Camera,
}

impl Interface {
    /// Wrap an opened camera.
    #[must_use]
    pub fn new(camera: Camera) -> Self {
        Self { camera }
    }

    /// The wrapped camera, for the capability-specific calls.
    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Mutable access to the wrapped camera.
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }
}

impl HwInterface for Interface {
    fn cap_list(&self) -> Vec<Capability> {
        vec![
            Capability::DetInfo,
            Capability::Sync,
            Capability::Roi,
            Capability::Bin,
            Capability::Buffer,
            Capability::Event,
        ]
    }

    fn reset(&mut self, level: ResetLevel) -> HwResult<()> {
        tracing::info!(?level, "Interface reset");
        match level {
            ResetLevel::SoftReset => self.camera.stop_acq(),
            ResetLevel::HardReset => self.camera.reset(),
        }
    }

    fn prepare_acq(&mut self) -> HwResult<()> {
        self.camera.prepare_acq()
    }

    fn start_acq(&mut self) -> HwResult<()> {
        self.camera.start_acq()
    }

    fn stop_acq(&mut self) -> HwResult<()> {
        self.camera.stop_acq()
    }

    fn status(&self) -> HwResult<HwStatus> {
        let status = match self.camera.status() {
            CameraStatus::Fault => HwStatus {
                acq: AcqStatus::Fault,
                det: DetStatus::Fault,
            },
            CameraStatus::Exposure => running(DetStatus::Exposure),
            CameraStatus::Readout => running(DetStatus::Readout),
            CameraStatus::Latency => running(DetStatus::Latency),
            CameraStatus::Ready if self.camera.is_acquiring() => {
                let det = match self.camera.trig_mode() {
                    TrigMode::IntTrig => DetStatus::Idle,
                    _ => DetStatus::WaitForTrigger,
                };
                running(det)
            }
            CameraStatus::Ready => HwStatus {
                acq: AcqStatus::Ready,
                det: DetStatus::Idle,
            },
        };
        Ok(status)
    }

    fn nb_hw_acquired_frames(&self) -> u64 {
        self.camera.nb_hw_acquired_frames()
    }
}

fn running(det: DetStatus) -> HwStatus {
    HwStatus {
        acq: AcqStatus::Running,
        det,
    }
}
