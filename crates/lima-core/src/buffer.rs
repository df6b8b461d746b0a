//! Ring-buffer sink for acquired frames.
//!
//! The host owns a preallocated set of equally sized frame slots. During an
//! acquisition the plugin's acquisition thread:
//!
//! 1. borrows slot `frame_nb` with [`HwBufferCtrl::frame_buffer`] and lets the
//!    device write the payload straight into it,
//! 2. publishes the frame with [`HwBufferCtrl::new_frame_ready`].
//!
//! Frame `n` always lands in slot `n % nb_buffers`. The publish call returns
//! `false` when the consumer cannot take more frames; the plugin must treat
//! that as fatal for the running acquisition.
//!
//! [`SoftBufferCtrl`] is an in-process implementation used when the plugin
//! runs without the host (tests, tools).

use crate::error::{HwError, HwResult};
use crate::types::{FrameDim, VideoMode};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Exclusive write access to one frame slot.
pub type FrameSlot<'a> = MappedMutexGuard<'a, [u8]>;

/// Consumer hook called for every published frame.
///
/// Returning `false` tells the producer to stop.
pub type FrameCallback = Box<dyn FnMut(&HwFrameInfo) -> bool + Send>;

/// Metadata handed to the host with each published frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HwFrameInfo {
    /// Zero-based frame index within the acquisition.
    pub acq_frame_nb: u64,
    /// Dimensions of the slot the frame was written to.
    pub frame_dim: FrameDim,
    /// Device capture timestamp.
    pub frame_timestamp: Duration,
    /// Payload bytes written by the device.
    pub valid_bytes: usize,
    /// Pixel layout tag.
    pub video_mode: VideoMode,
    /// Device sequence number of the frame.
    pub device_seq: u64,
}

/// Host frame-buffer contract.
pub trait HwBufferCtrl: Send + Sync {
    /// Dimensions of each slot.
    fn frame_dim(&self) -> FrameDim;

    /// Number of slots in the ring.
    fn nb_buffers(&self) -> usize;

    /// Borrow the slot for `frame_nb` (ring index `frame_nb % nb_buffers`).
    fn frame_buffer(&self, frame_nb: u64) -> FrameSlot<'_>;

    /// Publish a filled slot. Returns whether the consumer wants more frames.
    fn new_frame_ready(&self, info: &HwFrameInfo) -> bool;

    /// Record the wall-clock start of the acquisition.
    fn set_start_timestamp(&self, timestamp: SystemTime);

    /// Wall-clock start of the acquisition, if recorded.
    fn start_timestamp(&self) -> Option<SystemTime>;
}

/// Software ring buffer with an optional consumer callback.
pub struct SoftBufferCtrl {
    frame_dim: FrameDim,
    slots: Vec<Mutex<Vec<u8>>>,
    start_timestamp: Mutex<Option<SystemTime>>,
    /// -1 until the first frame is published
    last_acquired: AtomicI64,
    published: AtomicU64,
    callback: Mutex<Option<FrameCallback>>,
}

impl SoftBufferCtrl {
    /// Allocate `nb_buffers` slots of `frame_dim.mem_size()` bytes each.
    pub fn new(frame_dim: FrameDim, nb_buffers: usize) -> HwResult<Self> {
        let frame_bytes = frame_dim.mem_size();
        if nb_buffers == 0 {
            return Err(HwError::Config("buffer count must be > 0".into()));
        }
        if frame_bytes == 0 {
            return Err(HwError::Config("frame size must be > 0".into()));
        }

        tracing::debug!(
            nb_buffers,
            frame_bytes,
            total_mb = (nb_buffers * frame_bytes) as f64 / (1024.0 * 1024.0),
            "Allocating soft frame buffer"
        );

        let slots = (0..nb_buffers)
            .map(|_| Mutex::new(vec![0u8; frame_bytes]))
            .collect();

        Ok(Self {
            frame_dim,
            slots,
            start_timestamp: Mutex::new(None),
            last_acquired: AtomicI64::new(-1),
            published: AtomicU64::new(0),
            callback: Mutex::new(None),
        })
    }

    /// Install the consumer callback. Its return value becomes the result of
    /// `new_frame_ready`.
    pub fn set_frame_callback(&self, callback: FrameCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Remove the consumer callback; frames are then always accepted.
    pub fn clear_frame_callback(&self) {
        *self.callback.lock() = None;
    }

    /// Index of the last published frame.
    #[must_use]
    pub fn last_acquired_frame(&self) -> Option<u64> {
        u64::try_from(self.last_acquired.load(Ordering::Acquire)).ok()
    }

    /// Number of `new_frame_ready` calls since creation or [`reset`](Self::reset).
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Copy out the payload currently held for `frame_nb`.
    #[must_use]
    pub fn read_frame(&self, frame_nb: u64) -> Vec<u8> {
        self.frame_buffer(frame_nb).to_vec()
    }

    /// Forget published frames and the start timestamp. Slot contents are
    /// left as they are.
    pub fn reset(&self) {
        self.last_acquired.store(-1, Ordering::Release);
        self.published.store(0, Ordering::Release);
        *self.start_timestamp.lock() = None;
    }

    fn slot_index(&self, frame_nb: u64) -> usize {
        (frame_nb % self.slots.len() as u64) as usize
    }
}

impl HwBufferCtrl for SoftBufferCtrl {
    fn frame_dim(&self) -> FrameDim {
        self.frame_dim
    }

    fn nb_buffers(&self) -> usize {
        self.slots.len()
    }

    fn frame_buffer(&self, frame_nb: u64) -> FrameSlot<'_> {
        let guard = self.slots[self.slot_index(frame_nb)].lock();
        MutexGuard::map(guard, |slot| slot.as_mut_slice())
    }

    fn new_frame_ready(&self, info: &HwFrameInfo) -> bool {
        self.last_acquired
            .store(info.acq_frame_nb as i64, Ordering::Release);
        self.published.fetch_add(1, Ordering::AcqRel);

        match self.callback.lock().as_mut() {
            Some(callback) => callback(info),
            None => true,
        }
    }

    fn set_start_timestamp(&self, timestamp: SystemTime) {
        *self.start_timestamp.lock() = Some(timestamp);
    }

    fn start_timestamp(&self) -> Option<SystemTime> {
        *self.start_timestamp.lock()
    }
}
