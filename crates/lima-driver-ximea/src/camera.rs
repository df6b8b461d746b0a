//! Camera session.
//!
//! [`Camera`] is the control-thread side of the plugin. It owns the device
//! connection (shared with the acquisition loop behind a mutex), caches
//! what the host queries often, and drives the loop lifecycle:
//!
//! - `prepare_acq` builds a loop from the current settings
//! - `start_acq` starts the device and spawns the loop, or in `IntTrigMult`
//!   mode with a loop already running just issues the next software trigger
//! - `stop_acq` cancels and joins the loop, then stops the device
//!
//! Every device parameter write happens on the control thread, and only
//! while no loop thread is running: setters return
//! [`HwError::AcquisitionRunning`] until the loop has been stopped or has
//! finished on its own.

use crate::components::acquisition::{
    AcqLoop, AcqParams, AcqStats, AcqStatsSnapshot, AcqThread, CameraStatus, LoopContext,
    StatusCell,
};
use crate::components::connection::XiConnection;
use crate::components::features::{XimeaFeatures, PIXEL_SIZE_M};
use crate::components::params::ParamGateway;
use crate::components::trigger::{TriggerController, TriggerPolarity};
use crate::config::XimeaConfig;
use crate::sdk::{prm, XiApi};
use lima_core::{
    Bin, EventSink, FrameDim, HwBufferCtrl, HwError, HwResult, ImageType, Roi, Size,
    SoftBufferCtrl, TracingEventSink, TrigMode,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Models whose pixel size is known.
const KNOWN_MODELS: &[&str] = &["MX377MR", "MQ013MG-ON"];

/// One opened XIMEA camera.
pub struct Camera {
    api: Arc<dyn XiApi>,
    config: XimeaConfig,
    connection: Arc<Mutex<XiConnection>>,
    buffer: Option<Arc<dyn HwBufferCtrl>>,
    events: Arc<dyn EventSink>,
    trigger: TriggerController,
    status: StatusCell,
    image_number: Arc<AtomicU64>,
    stats: Arc<AcqStats>,
    prepared: Option<AcqLoop>,
    acq_thread: Option<AcqThread>,
    span: tracing::Span,

    model: String,
    max_size: Size,
    trig_mode: TrigMode,
    trig_polarity: TriggerPolarity,
    nb_frames: u64,
    latency: Duration,
}

impl Camera {
    /// Open the camera named by `config` and bring it to a known state:
    /// SDK logging off, safe buffer policy, startup user set loaded,
    /// internal trigger, one frame.
    pub fn open(api: Arc<dyn XiApi>, config: XimeaConfig) -> HwResult<Self> {
        config.validate()?;

        let span = tracing::info_span!("ximea", camera_id = config.camera_id);
        let _entered = span.enter();

        let mut conn = XiConnection::open(api.as_ref(), config.camera_id)?;
        let model = conn.model()?;
        conn.apply_startup(config.startup_mode)?;
        let max_size = conn.max_image_size()?;

        let trigger = TriggerController::new(config.trigger_gpi_port);
        trigger.configure(&mut conn, TrigMode::IntTrig, TriggerPolarity::default())?;

        if !KNOWN_MODELS.iter().any(|known| model.starts_with(known)) {
            tracing::warn!(%model, "Unknown model, assuming default pixel size");
        }
        tracing::info!(
            %model,
            max_width = max_size.width,
            max_height = max_size.height,
            "XIMEA camera ready"
        );

        drop(_entered);
        Ok(Self {
            api,
            config,
            connection: Arc::new(Mutex::new(conn)),
            buffer: None,
            events: Arc::new(TracingEventSink),
            trigger,
            status: StatusCell::default(),
            image_number: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(AcqStats::default()),
            prepared: None,
            acq_thread: None,
            span,
            model,
            max_size,
            trig_mode: TrigMode::IntTrig,
            trig_polarity: TriggerPolarity::default(),
            nb_frames: 1,
            latency: Duration::ZERO,
        })
    }

    /// Configuration the session was opened with.
    #[must_use]
    pub fn config(&self) -> &XimeaConfig {
        &self.config
    }

    // =========================================================================
    // Buffer and events
    // =========================================================================

    /// Use `buffer` for the following acquisitions.
    pub fn set_buffer_ctrl(&mut self, buffer: Arc<dyn HwBufferCtrl>) {
        self.buffer = Some(buffer);
    }

    /// Allocate and install an in-process buffer sized for the current
    /// image, with `config.nb_buffers` slots.
    pub fn allocate_soft_buffer(&mut self) -> HwResult<Arc<SoftBufferCtrl>> {
        let dim = FrameDim::new(self.image_size()?, self.image_type()?);
        let buffer = Arc::new(SoftBufferCtrl::new(dim, self.config.nb_buffers)?);
        self.buffer = Some(buffer.clone());
        Ok(buffer)
    }

    /// Route loop events to `events` instead of the log.
    pub fn set_event_sink(&mut self, events: Arc<dyn EventSink>) {
        self.events = events;
    }

    // =========================================================================
    // Acquisition control
    // =========================================================================

    /// Stop any running loop, reset counters and the fault state, and
    /// build the loop for the next `start_acq`.
    ///
    /// Fails if the installed buffer's slots do not match the current image
    /// size and type.
    pub fn prepare_acq(&mut self) -> HwResult<()> {
        self.join_loop();

        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| HwError::Config("no frame buffer installed".into()))?;

        let frame_dim = FrameDim::new(self.image_size()?, self.image_type()?);
        if buffer.frame_dim() != frame_dim {
            return Err(HwError::Config(format!(
                "frame buffer holds {:?} but the camera delivers {:?}",
                buffer.frame_dim(),
                frame_dim
            )));
        }

        let frame_timeout = self.frame_timeout()?;
        self.image_number.store(0, Ordering::Release);
        self.stats.reset();
        self.trigger.soft_trigger().consume();

        let ctx = LoopContext {
            connection: Arc::clone(&self.connection),
            buffer,
            events: Arc::clone(&self.events),
            soft_trigger: self.trigger.soft_trigger(),
            status: self.status.clone(),
            image_number: Arc::clone(&self.image_number),
            stats: Arc::clone(&self.stats),
            span: tracing::info_span!(parent: &self.span, "acq_loop"),
        };
        let params = AcqParams {
            trig_mode: self.trig_mode,
            nb_frames: self.nb_frames,
            latency: self.latency,
            latency_policy: self.config.latency_policy,
            frame_timeout,
        };

        self.prepared = Some(AcqLoop::new(ctx, params));
        self.status.reset();
        tracing::debug!(parent: &self.span, ?params, "Acquisition prepared");
        Ok(())
    }

    /// Start the prepared acquisition. With `IntTrigMult` and a loop still
    /// running, only issues the next software trigger.
    pub fn start_acq(&mut self) -> HwResult<()> {
        if self.trig_mode == TrigMode::IntTrigMult && self.is_acquiring() {
            return self.issue_software_trigger();
        }

        let acq_loop = self.prepared.take().ok_or(HwError::NotPrepared)?;

        if self.image_number.load(Ordering::Acquire) == 0 {
            if let Some(buffer) = &self.buffer {
                buffer.set_start_timestamp(SystemTime::now());
            }
        }

        self.connection.lock().start_acquisition()?;

        let name = format!("ximea-acq-{}", self.config.camera_id);
        match acq_loop.spawn(name) {
            Ok(thread) => self.acq_thread = Some(thread),
            Err(err) => {
                if let Err(stop_err) = self.connection.lock().stop_acquisition() {
                    tracing::warn!(parent: &self.span, error = %stop_err, "Stop after failed spawn failed");
                }
                return Err(err);
            }
        }

        if self.trig_mode == TrigMode::IntTrigMult {
            self.issue_software_trigger()?;
        }
        Ok(())
    }

    /// Cancel and join the loop, then stop the device. Safe to call at any
    /// time, including when nothing runs.
    pub fn stop_acq(&mut self) -> HwResult<()> {
        self.join_loop();
        self.prepared = None;
        self.connection.lock().stop_acquisition()?;
        self.status.set(CameraStatus::Ready);
        Ok(())
    }

    /// Stop, send `device_reset`, close and reopen the camera with the
    /// startup sequence.
    pub fn reset(&mut self) -> HwResult<()> {
        let span = self.span.clone();
        let _entered = span.enter();
        self.join_loop();
        self.prepared = None;

        let mut conn = self.connection.lock();
        conn.stop_acquisition()?;
        if let Err(err) = conn.set_int(prm::DEVICE_RESET, 1) {
            tracing::warn!(error = %err, "device_reset failed, reopening anyway");
        }
        conn.close();

        let mut fresh = XiConnection::open(self.api.as_ref(), self.config.camera_id)?;
        fresh.apply_startup(self.config.startup_mode)?;
        self.trigger
            .configure(&mut fresh, TrigMode::IntTrig, TriggerPolarity::default())?;
        self.max_size = fresh.max_image_size()?;
        *conn = fresh;
        drop(conn);

        self.trig_mode = TrigMode::IntTrig;
        self.nb_frames = 1;
        self.status.reset();
        tracing::info!("Camera reset");
        Ok(())
    }

    /// Status as last set by the loop or the control thread.
    #[must_use]
    pub fn status(&self) -> CameraStatus {
        self.status.get()
    }

    /// True while a loop thread is running.
    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.acq_thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Frames published in the current sequence.
    #[must_use]
    pub fn nb_hw_acquired_frames(&self) -> u64 {
        self.image_number.load(Ordering::Acquire)
    }

    /// Loop counters of the current sequence.
    #[must_use]
    pub fn acq_stats(&self) -> AcqStatsSnapshot {
        self.stats.snapshot()
    }

    fn ensure_idle(&self, operation: &'static str) -> HwResult<()> {
        if self.is_acquiring() {
            tracing::warn!(parent: &self.span, operation, "Rejected while acquiring");
            return Err(HwError::AcquisitionRunning(operation));
        }
        Ok(())
    }

    fn join_loop(&mut self) {
        if let Some(mut thread) = self.acq_thread.take() {
            if let Some(exit) = thread.stop() {
                tracing::debug!(parent: &self.span, ?exit, "Acquisition loop joined");
            }
        }
    }

    /// `xiGetImage` timeout: base timeout plus exposure.
    pub fn frame_timeout(&self) -> HwResult<Duration> {
        let exposure = XimeaFeatures::exposure_duration(&mut *self.connection.lock())?;
        Ok(Duration::from_millis(u64::from(self.config.timeout_ms)) + exposure)
    }

    // =========================================================================
    // Synchronisation
    // =========================================================================

    /// True for the modes the camera can be configured for.
    #[must_use]
    pub fn check_trig_mode(&self, mode: TrigMode) -> bool {
        TriggerController::check_mode(mode)
    }

    /// Configure the device trigger for `mode`.
    pub fn set_trig_mode(&mut self, mode: TrigMode) -> HwResult<()> {
        self.ensure_idle("change trigger mode")?;
        self.trigger
            .configure(&mut *self.connection.lock(), mode, self.trig_polarity)?;
        self.trig_mode = mode;
        Ok(())
    }

    /// Trigger mode last applied.
    #[must_use]
    pub fn trig_mode(&self) -> TrigMode {
        self.trig_mode
    }

    /// Polarity applied by the next `set_trig_mode`.
    pub fn set_trigger_polarity(&mut self, polarity: TriggerPolarity) {
        self.trig_polarity = polarity;
    }

    /// Polarity used for external modes.
    #[must_use]
    pub fn trigger_polarity(&self) -> TriggerPolarity {
        self.trig_polarity
    }

    /// Exposure time in seconds.
    pub fn set_exp_time(&mut self, seconds: f64) -> HwResult<()> {
        self.ensure_idle("change exposure time")?;
        XimeaFeatures::set_exposure(&mut *self.connection.lock(), seconds)
    }

    /// Exposure time in seconds.
    pub fn exp_time(&self) -> HwResult<f64> {
        XimeaFeatures::exposure(&mut *self.connection.lock())
    }

    /// Latency time in seconds.
    pub fn set_lat_time(&mut self, seconds: f64) -> HwResult<()> {
        self.ensure_idle("change latency time")?;
        self.latency = Duration::try_from_secs_f64(seconds)
            .map_err(|_| HwError::Config(format!("invalid latency time {seconds} s")))?;
        Ok(())
    }

    /// Latency time in seconds.
    #[must_use]
    pub fn lat_time(&self) -> f64 {
        self.latency.as_secs_f64()
    }

    /// Frames per sequence, 0 for unlimited.
    pub fn set_nb_frames(&mut self, nb_frames: u64) -> HwResult<()> {
        self.ensure_idle("change frame count")?;
        self.nb_frames = nb_frames;
        Ok(())
    }

    /// Frames per sequence, 0 for unlimited.
    #[must_use]
    pub fn nb_frames(&self) -> u64 {
        self.nb_frames
    }

    /// Issue one software trigger. The value is ignored; there is no level
    /// to hold.
    pub fn set_software_trigger(&mut self, _value: bool) -> HwResult<()> {
        self.issue_software_trigger()
    }

    /// Always false: a software trigger is an event, not a state.
    #[must_use]
    pub fn software_trigger(&self) -> bool {
        false
    }

    fn issue_software_trigger(&self) -> HwResult<()> {
        self.trigger
            .issue_software_trigger(&mut *self.connection.lock())?;
        Ok(())
    }

    // =========================================================================
    // Detector information
    // =========================================================================

    /// Model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Interface type (e.g. "USB3.0").
    pub fn detector_type(&self) -> HwResult<String> {
        Ok(self.connection.lock().get_string(prm::DEVICE_TYPE)?)
    }

    /// Full sensor size.
    #[must_use]
    pub fn max_image_size(&self) -> Size {
        self.max_size
    }

    /// Current image size.
    pub fn image_size(&self) -> HwResult<Size> {
        XimeaFeatures::image_size(&mut *self.connection.lock())
    }

    /// Pixel pitch in metres (x, y).
    #[must_use]
    pub fn pixel_size(&self) -> (f64, f64) {
        (PIXEL_SIZE_M, PIXEL_SIZE_M)
    }

    /// Pixel depth delivered by the camera.
    pub fn image_type(&self) -> HwResult<ImageType> {
        XimeaFeatures::image_type(&mut *self.connection.lock())
    }

    /// Change the pixel depth. The frame buffer must be reallocated before
    /// the next `prepare_acq`.
    pub fn set_image_type(&mut self, image_type: ImageType) -> HwResult<()> {
        self.ensure_idle("change image type")?;
        XimeaFeatures::set_image_type(&mut *self.connection.lock(), image_type)
    }

    // =========================================================================
    // ROI and binning
    // =========================================================================

    /// Align `roi` to the device increments. Reads the device limits after
    /// writing the size, so it is refused while acquiring.
    pub fn check_roi(&mut self, roi: Roi) -> HwResult<Roi> {
        self.ensure_idle("check ROI")?;
        XimeaFeatures::check_roi(&mut *self.connection.lock(), self.max_size, roi)
    }

    /// Apply a checked ROI.
    pub fn set_roi(&mut self, roi: Roi) -> HwResult<()> {
        self.ensure_idle("set ROI")?;
        XimeaFeatures::set_roi(&mut *self.connection.lock(), roi)
    }

    /// Current ROI.
    pub fn roi(&self) -> HwResult<Roi> {
        XimeaFeatures::roi(&mut *self.connection.lock())
    }

    /// Closest supported binning.
    pub fn check_bin(&mut self, bin: Bin) -> HwResult<Bin> {
        XimeaFeatures::check_bin(&mut *self.connection.lock(), bin)
    }

    /// Apply a checked binning.
    pub fn set_bin(&mut self, bin: Bin) -> HwResult<()> {
        self.ensure_idle("set binning")?;
        XimeaFeatures::set_bin(&mut *self.connection.lock(), bin)
    }

    /// Current binning.
    pub fn bin(&self) -> HwResult<Bin> {
        XimeaFeatures::bin(&mut *self.connection.lock())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.join_loop();
        self.connection.lock().close();
    }
}
