//! XIMEA camera plugin.
//!
//! Drives XIMEA cameras through xiAPI and feeds frames into the host's frame
//! buffer from a dedicated acquisition thread.
//!
//! ## Layout
//!
//! - [`sdk`]: the xiAPI boundary ([`XiApi`](sdk::XiApi), [`XiDevice`](sdk::XiDevice))
//! - [`components`]: connection, parameter access, trigger routing, frame
//!   source, acquisition loop, feature helpers
//! - [`Camera`]: the control-thread session
//! - [`Interface`]: the [`HwInterface`](lima_core::HwInterface) the host talks to
//! - [`mock`]: simulated camera (feature `mock`, on by default)
//!
//! ## Example
//!
//! ```
//! use lima_driver_ximea::{mock::MockXiApi, Camera, XimeaConfig};
//! use std::sync::Arc;
//!
//! let api = Arc::new(MockXiApi::new());
//! let mut camera = Camera::open(api, XimeaConfig::new(0))?;
//! let buffer = camera.allocate_soft_buffer()?;
//!
//! camera.set_nb_frames(3)?;
//! camera.prepare_acq()?;
//! camera.start_acq()?;
//! while camera.is_acquiring() {
//!     std::thread::sleep(std::time::Duration::from_millis(1));
//! }
//! camera.stop_acq()?;
//! assert_eq!(buffer.published_count(), 3);
//! # Ok::<(), lima_core::HwError>(())
//! ```

pub mod camera;
pub mod components;
pub mod config;
pub mod error;
pub mod interface;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod sdk;

pub use camera::Camera;
pub use components::acquisition::{AcqStatsSnapshot, CameraStatus, LatencyPolicy, LoopExit};
pub use components::trigger::TriggerPolarity;
pub use config::XimeaConfig;
pub use error::DeviceError;
pub use interface::Interface;
