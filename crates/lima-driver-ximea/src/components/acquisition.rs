//! Acquisition loop.
//!
//! One dedicated OS thread per started sequence pulls frames from the device
//! into the host's frame buffer:
//!
//! ```text
//!   ┌─► frame count reached? ── yes ─► exit
//!   │   cancelled? ──────────── yes ─► exit
//!   │   [IntTrigMult] wait for the software-trigger flag (1 ms poll)
//!   │   Exposure: xiGetImage into slot `frame_nb % nb_buffers`
//!   │       timeout      → retry while not cancelled
//!   │       other error  → Fault + Error event, next iteration
//!   │   same seq as last → discard
//!   │   unknown format   → exit
//!   │   Readout: publish; counter += 1
//!   │       rejected     → Fault + Fatal event, exit
//!   │   [latency] Latency: sleep
//!   └── Ready
//! ```
//!
//! Whatever the exit reason, the loop stops device acquisition before it
//! returns. A fault stays visible until the next `prepare_acq`.

use super::connection::XiConnection;
use super::frame_source::{FrameHeader, FrameSource};
use super::trigger::SoftTrigger;
use crate::error::DeviceError;
use crate::sdk::XiImageFormat;
use lima_core::{
    Event, EventCode, EventSink, HwBufferCtrl, HwError, HwFrameInfo, HwResult, Severity, TrigMode,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll interval while waiting for a software trigger.
pub const TRIGGER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// State of the camera as seen by the acquisition loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CameraStatus {
    /// Idle or between frames.
    Ready = 0,
    /// Waiting for the device to deliver a frame.
    Exposure = 1,
    /// Handing a frame to the buffer.
    Readout = 2,
    /// Sleeping the latency time.
    Latency = 3,
    /// A device error or rejected frame; cleared by `prepare_acq`.
    Fault = 4,
}

impl CameraStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Exposure,
            2 => Self::Readout,
            3 => Self::Latency,
            4 => Self::Fault,
            _ => Self::Ready,
        }
    }
}

/// Camera status shared between the loop and the control thread.
///
/// `Fault` is sticky: [`set`](Self::set) cannot leave it, only
/// [`reset`](Self::reset) does.
#[derive(Clone, Debug, Default)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    /// Current status.
    #[must_use]
    pub fn get(&self) -> CameraStatus {
        CameraStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `status` unless faulted.
    pub fn set(&self, status: CameraStatus) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != CameraStatus::Fault as u8).then_some(status as u8)
            });
    }

    /// Back to `Ready`, clearing a fault.
    pub fn reset(&self) {
        self.0.store(CameraStatus::Ready as u8, Ordering::Release);
    }
}

/// Set-only stop request for one loop instance.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Ask the loop to stop at its next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// When the configured latency is slept after a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyPolicy {
    /// Only between software-triggered frames.
    #[default]
    SoftwareTriggerOnly,
    /// After every frame regardless of trigger mode.
    Always,
}

/// Per-sequence counters, readable while the loop runs.
///
/// Tracks frame loss by watching the device sequence number: a jump larger
/// than one counts the skipped frames as lost, an equal number is a
/// duplicate delivery.
#[derive(Debug, Default)]
pub struct AcqStats {
    published: AtomicU64,
    duplicates: AtomicU64,
    lost_frames: AtomicU64,
    discontinuities: AtomicU64,
    timeouts: AtomicU64,
    device_errors: AtomicU64,
    latency_waits: AtomicU64,
}

/// Point-in-time copy of [`AcqStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcqStatsSnapshot {
    /// Frames handed to the buffer.
    pub published: u64,
    /// Frames discarded as repeats of the previous sequence number.
    pub duplicates: u64,
    /// Frames skipped by the device sequence number.
    pub lost_frames: u64,
    /// Sequence gaps (each may cover several lost frames).
    pub discontinuities: u64,
    /// `xiGetImage` calls that timed out.
    pub timeouts: u64,
    /// `xiGetImage` calls that failed otherwise.
    pub device_errors: u64,
    /// Latency sleeps taken.
    pub latency_waits: u64,
}

impl AcqStats {
    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> AcqStatsSnapshot {
        AcqStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            lost_frames: self.lost_frames.load(Ordering::Relaxed),
            discontinuities: self.discontinuities.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            latency_waits: self.latency_waits.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.published,
            &self.duplicates,
            &self.lost_frames,
            &self.discontinuities,
            &self.timeouts,
            &self.device_errors,
            &self.latency_waits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Acquisition parameters, fixed for the lifetime of one loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcqParams {
    /// Trigger mode the device was configured for.
    pub trig_mode: TrigMode,
    /// Frames to acquire, 0 for unlimited.
    pub nb_frames: u64,
    /// Sleep between frames, subject to `latency_policy`.
    pub latency: Duration,
    /// When `latency` applies.
    pub latency_policy: LatencyPolicy,
    /// `xiGetImage` timeout per call.
    pub frame_timeout: Duration,
}

/// Everything the loop shares with the camera session.
///
/// The loop only sees these handles, never the session itself.
#[derive(Clone)]
pub struct LoopContext {
    /// Device, shared with the control thread.
    pub connection: Arc<Mutex<XiConnection>>,
    /// Destination of every frame.
    pub buffer: Arc<dyn HwBufferCtrl>,
    /// Receiver of loop faults.
    pub events: Arc<dyn EventSink>,
    /// Flag raised by `start_acq` in `IntTrigMult` mode.
    pub soft_trigger: SoftTrigger,
    /// Camera status, written by the loop.
    pub status: StatusCell,
    /// Frames published in the current sequence.
    pub image_number: Arc<AtomicU64>,
    /// Loop counters.
    pub stats: Arc<AcqStats>,
    /// Entered on the loop thread for every log line it emits.
    pub span: tracing::Span,
}

/// Why a loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// Requested frame count published.
    FrameCountReached,
    /// Cancel flag observed.
    Cancelled,
    /// The buffer refused a frame.
    BufferRejected,
    /// The device delivered a format the host cannot take.
    UnsupportedFormat(XiImageFormat),
}

enum Pull {
    Frame(FrameHeader),
    Failed(DeviceError),
    Cancelled,
}

/// One acquisition sequence, ready to run.
pub struct AcqLoop {
    ctx: LoopContext,
    params: AcqParams,
    source: FrameSource,
    cancel: CancelFlag,
    last_seq: Option<u64>,
}

impl AcqLoop {
    /// Build a loop with a fresh cancel flag.
    #[must_use]
    pub fn new(ctx: LoopContext, params: AcqParams) -> Self {
        Self {
            ctx,
            source: FrameSource::new(params.frame_timeout),
            params,
            cancel: CancelFlag::default(),
            last_seq: None,
        }
    }

    /// Handle to stop this loop.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Parameters the loop runs with.
    #[must_use]
    pub fn params(&self) -> &AcqParams {
        &self.params
    }

    /// Run on a new named thread.
    pub fn spawn(self, name: String) -> HwResult<AcqThread> {
        let cancel = self.cancel_flag();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(HwError::ThreadSpawn)?;
        Ok(AcqThread {
            cancel,
            handle: Some(handle),
        })
    }

    /// Run on the calling thread until exit. Device acquisition is stopped
    /// before returning.
    pub fn run(mut self) -> LoopExit {
        let span = self.ctx.span.clone();
        let _entered = span.enter();

        tracing::debug!(
            trig_mode = ?self.params.trig_mode,
            nb_frames = self.params.nb_frames,
            timeout_ms = self.source.timeout_ms(),
            "Acquisition loop started"
        );

        let exit = self.acquire();
        self.ctx.status.set(CameraStatus::Ready);

        if let Err(err) = self.ctx.connection.lock().stop_acquisition() {
            tracing::warn!(error = %err, "Stop at loop exit failed");
        }

        let stats = self.ctx.stats.snapshot();
        tracing::info!(
            ?exit,
            frames = self.ctx.image_number.load(Ordering::Acquire),
            lost = stats.lost_frames,
            duplicates = stats.duplicates,
            device_errors = stats.device_errors,
            "Acquisition loop finished"
        );
        exit
    }

    fn acquire(&mut self) -> LoopExit {
        loop {
            let frame_nb = self.ctx.image_number.load(Ordering::Acquire);
            if self.params.nb_frames != 0 && frame_nb >= self.params.nb_frames {
                return LoopExit::FrameCountReached;
            }
            if self.cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            if self.params.trig_mode == TrigMode::IntTrigMult && !self.wait_for_soft_trigger() {
                return LoopExit::Cancelled;
            }

            self.ctx.status.set(CameraStatus::Exposure);
            let header = match self.pull(frame_nb) {
                Pull::Frame(header) => header,
                Pull::Cancelled => return LoopExit::Cancelled,
                Pull::Failed(err) => {
                    self.report_device_error(&err);
                    continue;
                }
            };

            if !self.accept_sequence(header.seq) {
                continue;
            }

            let Some(video_mode) = header.video_mode() else {
                tracing::error!(format = ?header.format, "Image format not supported by LImA");
                return LoopExit::UnsupportedFormat(header.format);
            };

            self.ctx.status.set(CameraStatus::Readout);
            let info = HwFrameInfo {
                acq_frame_nb: frame_nb,
                frame_dim: self.ctx.buffer.frame_dim(),
                frame_timestamp: header.timestamp,
                valid_bytes: header.payload_bytes,
                video_mode,
                device_seq: header.seq,
            };
            let keep_going = self.ctx.buffer.new_frame_ready(&info);
            self.ctx.image_number.fetch_add(1, Ordering::AcqRel);
            AcqStats::bump(&self.ctx.stats.published, 1);
            tracing::trace!(frame_nb, seq = header.seq, "Frame published");

            if !keep_going {
                self.ctx.status.set(CameraStatus::Fault);
                self.ctx.events.report(Event::new(
                    Severity::Fatal,
                    EventCode::CamOverrun,
                    "Frame not ready",
                ));
                return LoopExit::BufferRejected;
            }

            if self.latency_applies() {
                self.ctx.status.set(CameraStatus::Latency);
                AcqStats::bump(&self.ctx.stats.latency_waits, 1);
                thread::sleep(self.params.latency);
            }

            self.ctx.status.set(CameraStatus::Ready);
        }
    }

    /// Block until a software trigger is pending, consuming it. False if
    /// cancelled first.
    fn wait_for_soft_trigger(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if self.ctx.soft_trigger.consume() {
                return true;
            }
            thread::sleep(TRIGGER_POLL_INTERVAL);
        }
    }

    /// `xiGetImage` into the slot for `frame_nb`, retrying timeouts until a
    /// frame, another error, or cancellation.
    fn pull(&self, frame_nb: u64) -> Pull {
        loop {
            let result = {
                let mut slot = self.ctx.buffer.frame_buffer(frame_nb);
                let mut conn = self.ctx.connection.lock();
                self.source.pull(&mut conn, &mut slot)
            };

            match result {
                Ok(header) => return Pull::Frame(header),
                Err(err) if err.is_timeout() => {
                    AcqStats::bump(&self.ctx.stats.timeouts, 1);
                    if self.cancel.is_cancelled() {
                        return Pull::Cancelled;
                    }
                }
                Err(err) => return Pull::Failed(err),
            }
        }
    }

    fn report_device_error(&self, err: &DeviceError) {
        AcqStats::bump(&self.ctx.stats.device_errors, 1);
        self.ctx.status.set(CameraStatus::Fault);
        tracing::error!(error = %err, "Image readout failed");
        self.ctx.events.report(Event::new(
            Severity::Error,
            EventCode::CamFault,
            format!("Error getting image: {err}"),
        ));
    }

    /// Drop repeats of the last sequence number and count gaps.
    fn accept_sequence(&mut self, seq: u64) -> bool {
        if let Some(last) = self.last_seq {
            if seq == last {
                AcqStats::bump(&self.ctx.stats.duplicates, 1);
                tracing::debug!(seq, "Repeated frame, discarding");
                return false;
            }
            if seq > last + 1 {
                let lost = seq - last - 1;
                AcqStats::bump(&self.ctx.stats.lost_frames, lost);
                AcqStats::bump(&self.ctx.stats.discontinuities, 1);
                tracing::warn!(last, seq, lost, "Device sequence gap");
            }
        }
        self.last_seq = Some(seq);
        true
    }

    fn latency_applies(&self) -> bool {
        if self.params.latency.is_zero() {
            return false;
        }
        match self.params.latency_policy {
            LatencyPolicy::SoftwareTriggerOnly => self.params.trig_mode == TrigMode::IntTrigMult,
            LatencyPolicy::Always => true,
        }
    }
}

/// A running loop thread.
///
/// Dropping it cancels and joins the thread.
pub struct AcqThread {
    cancel: CancelFlag,
    handle: Option<JoinHandle<LoopExit>>,
}

impl AcqThread {
    /// True once the loop has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait for the loop. `None` if already joined or the
    /// thread panicked.
    pub fn stop(&mut self) -> Option<LoopExit> {
        self.cancel.cancel();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                tracing::error!("Acquisition thread panicked");
                None
            }
        }
    }
}

impl Drop for AcqThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFrame, MockHandle, MockXiApi};
    use lima_core::{EventLog, FrameDim, ImageType, Size, SoftBufferCtrl};
    use std::time::Instant;

    struct Rig {
        handle: MockHandle,
        ctx: LoopContext,
        buffer: Arc<SoftBufferCtrl>,
        events: Arc<EventLog>,
    }

    fn rig() -> Rig {
        let api = MockXiApi::with_sensor(32, 32);
        let handle = api.handle();
        handle.set_free_run(false);
        let mut conn = XiConnection::open(&api, 0).unwrap();
        conn.start_acquisition().unwrap();

        let dim = FrameDim::new(Size::new(32, 32), ImageType::Bpp8);
        let buffer = Arc::new(SoftBufferCtrl::new(dim, 4).unwrap());
        let events = Arc::new(EventLog::new());
        let ctx = LoopContext {
            connection: Arc::new(Mutex::new(conn)),
            buffer: buffer.clone(),
            events: events.clone(),
            soft_trigger: SoftTrigger::new(),
            status: StatusCell::default(),
            image_number: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(AcqStats::default()),
            span: tracing::Span::none(),
        };
        Rig {
            handle,
            ctx,
            buffer,
            events,
        }
    }

    fn params(trig_mode: TrigMode, nb_frames: u64) -> AcqParams {
        AcqParams {
            trig_mode,
            nb_frames,
            latency: Duration::ZERO,
            latency_policy: LatencyPolicy::SoftwareTriggerOnly,
            frame_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn status_fault_is_sticky() {
        let status = StatusCell::default();
        status.set(CameraStatus::Exposure);
        assert_eq!(status.get(), CameraStatus::Exposure);
        status.set(CameraStatus::Fault);
        status.set(CameraStatus::Ready);
        assert_eq!(status.get(), CameraStatus::Fault);
        status.reset();
        assert_eq!(status.get(), CameraStatus::Ready);
    }

    #[test]
    fn publishes_requested_frames_then_stops_device() {
        let rig = rig();
        rig.handle.push_frames((1..=3).map(MockFrame::image));

        let exit = AcqLoop::new(rig.ctx.clone(), params(TrigMode::IntTrig, 3)).run();

        assert_eq!(exit, LoopExit::FrameCountReached);
        assert_eq!(rig.buffer.published_count(), 3);
        assert_eq!(rig.ctx.status.get(), CameraStatus::Ready);
        assert_eq!(rig.handle.stop_count(), 1);
        assert!(rig.events.is_empty());
    }

    #[test]
    fn duplicates_are_dropped_and_gaps_counted() {
        let rig = rig();
        rig.handle
            .push_frames([1, 1, 2, 5].map(MockFrame::image));

        AcqLoop::new(rig.ctx.clone(), params(TrigMode::IntTrig, 3)).run();

        let stats = rig.ctx.stats.snapshot();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.lost_frames, 2);
        assert_eq!(stats.discontinuities, 1);
    }

    #[test]
    fn timeouts_are_retried() {
        let rig = rig();
        rig.handle.push_frames([
            MockFrame::Timeout,
            MockFrame::Timeout,
            MockFrame::image(1),
        ]);

        let exit = AcqLoop::new(rig.ctx.clone(), params(TrigMode::IntTrig, 1)).run();

        assert_eq!(exit, LoopExit::FrameCountReached);
        assert_eq!(rig.ctx.stats.snapshot().timeouts, 2);
        assert!(rig.events.is_empty());
    }

    #[test]
    fn rejected_publish_faults_and_reports_fatal() {
        let rig = rig();
        rig.handle.push_frames((1..=5).map(MockFrame::image));
        rig.buffer
            .set_frame_callback(Box::new(|info| info.acq_frame_nb == 0));

        let exit = AcqLoop::new(rig.ctx.clone(), params(TrigMode::IntTrig, 5)).run();

        assert_eq!(exit, LoopExit::BufferRejected);
        assert_eq!(rig.ctx.image_number.load(Ordering::Acquire), 2);
        assert_eq!(rig.ctx.status.get(), CameraStatus::Fault);
        let events = rig.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Fatal);
        assert_eq!(events[0].description, "Frame not ready");
        assert_eq!(rig.handle.stop_count(), 1);
    }

    #[test]
    fn unsupported_format_ends_without_fault() {
        let rig = rig();
        rig.handle.push_frames([
            MockFrame::image(1),
            MockFrame::with_format(2, XiImageFormat::Raw16),
        ]);

        let exit = AcqLoop::new(rig.ctx.clone(), params(TrigMode::IntTrig, 5)).run();

        assert_eq!(exit, LoopExit::UnsupportedFormat(XiImageFormat::Raw16));
        assert_eq!(rig.buffer.published_count(), 1);
        assert_ne!(rig.ctx.status.get(), CameraStatus::Fault);
        assert!(rig.events.is_empty());
    }

    #[test]
    fn latency_policy() {
        let rig = rig();
        let mut p = params(TrigMode::IntTrig, 1);
        p.latency = Duration::from_millis(1);
        let acq = AcqLoop::new(rig.ctx.clone(), p);
        assert!(!acq.latency_applies());

        p.trig_mode = TrigMode::IntTrigMult;
        assert!(AcqLoop::new(rig.ctx.clone(), p).latency_applies());

        for mode in [TrigMode::ExtTrigSingle, TrigMode::ExtTrigMult, TrigMode::ExtGate] {
            p.trig_mode = mode;
            assert!(!AcqLoop::new(rig.ctx.clone(), p).latency_applies(), "{mode:?}");
        }

        p.trig_mode = TrigMode::ExtTrigMult;
        p.latency_policy = LatencyPolicy::Always;
        assert!(AcqLoop::new(rig.ctx.clone(), p).latency_applies());

        p.latency = Duration::ZERO;
        assert!(!AcqLoop::new(rig.ctx.clone(), p).latency_applies());
    }

    #[test]
    fn spawned_loop_stops_on_cancel() {
        let rig = rig();
        let acq = AcqLoop::new(rig.ctx.clone(), params(TrigMode::IntTrig, 0));
        let mut thread = acq.spawn("acq-test".into()).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert!(!thread.is_finished());

        assert_eq!(thread.stop(), Some(LoopExit::Cancelled));
        assert!(thread.is_finished());
        assert_eq!(rig.handle.stop_count(), 1);
        assert!(!rig.handle.is_acquiring());
    }

    #[test]
    fn latency_sleep_lasts_configured_time() {
        let rig = rig();
        rig.handle.push_frames((1..=2).map(MockFrame::image));
        let mut p = params(TrigMode::IntTrig, 2);
        p.latency = Duration::from_millis(30);
        p.latency_policy = LatencyPolicy::Always;

        let started = Instant::now();
        let exit = AcqLoop::new(rig.ctx.clone(), p).run();

        assert_eq!(exit, LoopExit::FrameCountReached);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(rig.ctx.stats.snapshot().latency_waits, 2);
    }

    #[test]
    fn cancel_while_waiting_for_trigger_publishes_nothing() {
        let rig = rig();
        let acq = AcqLoop::new(rig.ctx.clone(), params(TrigMode::IntTrigMult, 0));
        let mut thread = acq.spawn("acq-trigger-wait".into()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!thread.is_finished());

        let started = Instant::now();
        assert_eq!(thread.stop(), Some(LoopExit::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(250));

        assert_eq!(rig.buffer.published_count(), 0);
        assert_eq!(rig.handle.get_image_calls(), 0);
        assert_eq!(rig.ctx.stats.snapshot(), AcqStatsSnapshot::default());
        assert_eq!(rig.handle.stop_count(), 1);
    }
}
