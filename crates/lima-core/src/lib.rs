//! `lima-core`
//!
//! Host-side contracts for LImA hardware plugins.
//!
//! A camera plugin sits between a vendor SDK and the acquisition host. This
//! crate describes the host half of that boundary so a plugin can be written,
//! exercised and tested without the host process:
//!
//! - [`types`]: value types shared by host and plugin (trigger modes, ROI,
//!   binning, image types, frame dimensions, video modes)
//! - [`buffer`]: the ring-buffer sink contract ([`HwBufferCtrl`]) and a
//!   software implementation ([`SoftBufferCtrl`])
//! - [`event`]: asynchronous fault reporting ([`EventSink`])
//! - [`interface`]: the capability list and the [`HwInterface`] entry point
//! - [`error`]: [`HwError`], returned by every synchronous control call
//!
//! ## Threading
//!
//! Buffer and event sinks are `Send + Sync`: the acquisition thread writes
//! frames and reports events while the control thread reads status.

pub mod buffer;
pub mod error;
pub mod event;
pub mod interface;
pub mod types;

pub use buffer::{FrameCallback, FrameSlot, HwBufferCtrl, HwFrameInfo, SoftBufferCtrl};
pub use error::{HwError, HwResult};
pub use event::{Event, EventCode, EventLog, EventSink, Severity, TracingEventSink};
pub use interface::{AcqStatus, Capability, DetStatus, HwInterface, HwStatus, ResetLevel};
pub use types::{Bin, FrameDim, ImageType, Point, Roi, Size, TrigMode, VideoMode};
