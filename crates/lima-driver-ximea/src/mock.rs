//! Simulated xiAPI.
//!
//! [`MockXiApi`] hands out [`MockDevice`]s that behave like a small
//! monochrome XIMEA camera:
//!
//! - integer/float/string parameters with `:min`/`:max`/`:inc` ranges that
//!   are enforced on write
//! - `xiGetImage` served from a scripted queue of [`MockFrame`]s, falling back
//!   to a free-running frame generator when the queue is empty
//! - software-trigger mode only produces a frame per `trigger_software` write
//!
//! Every device shares its state with a [`MockHandle`], so tests can script
//! frames and inspect what the plugin did (parameter writes in order,
//! start/stop/close counts) after the device has been moved into a
//! connection.
//!
//! # Example
//!
//! ```
//! use lima_driver_ximea::mock::{MockFrame, MockXiApi};
//!
//! let api = MockXiApi::new();
//! let handle = api.handle();
//! handle.set_free_run(false);
//! handle.push_frames([MockFrame::image(1), MockFrame::Timeout, MockFrame::image(2)]);
//! ```

use crate::components::trigger::TriggerSource;
use crate::sdk::{prm, XiApi, XiDevice, XiImage, XiImageFormat, XiResult, XiStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default sensor width of the simulated camera.
pub const MOCK_SENSOR_WIDTH: u32 = 1280;
/// Default sensor height of the simulated camera.
pub const MOCK_SENSOR_HEIGHT: u32 = 1024;
/// Model name reported by the simulated camera.
pub const MOCK_MODEL: &str = "MQ013MG-ON";

/// How long a simulated `xiGetImage` blocks before reporting a timeout.
const IDLE_POLL: Duration = Duration::from_millis(2);

/// One scripted `xiGetImage` outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFrame {
    /// A frame with the given device sequence number. `format: None` derives
    /// the format from `image_data_bit_depth`.
    Image {
        /// Device sequence number.
        seq: u64,
        /// Pixel format override.
        format: Option<XiImageFormat>,
    },
    /// `XI_TIMEOUT`
    Timeout,
    /// Any other status.
    Error(XiStatus),
}

impl MockFrame {
    /// Frame `seq` in the current pixel format.
    #[must_use]
    pub fn image(seq: u64) -> Self {
        Self::Image { seq, format: None }
    }

    /// Frame `seq` in an explicit pixel format.
    #[must_use]
    pub fn with_format(seq: u64, format: XiImageFormat) -> Self {
        Self::Image {
            seq,
            format: Some(format),
        }
    }
}

/// A recorded parameter write.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamWrite {
    /// `xiSetParamInt`
    Int(String, i32),
    /// `xiSetParamFloat`
    Float(String, f32),
    /// `xiSetParamString`
    Str(String, String),
}

impl ParamWrite {
    /// Integer write of `value` to `key`.
    pub fn int(key: &str, value: i32) -> Self {
        Self::Int(key.to_string(), value)
    }

    /// Key written.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Int(key, _) | Self::Float(key, _) | Self::Str(key, _) => key,
        }
    }
}

struct MockState {
    sensor_width: u32,
    sensor_height: u32,
    numbers: HashMap<String, f64>,
    strings: HashMap<String, String>,
    script: VecDeque<MockFrame>,
    free_run: bool,
    frame_period: Duration,
    next_seq: u64,
    pending_soft_triggers: u32,
    acquiring: bool,
    acq_started_at: Option<Instant>,
    writes: Vec<ParamWrite>,
    set_failures: HashMap<String, XiStatus>,
    fail_open: Option<XiStatus>,
    open_count: u32,
    start_count: u32,
    stop_count: u32,
    close_count: u32,
    get_image_calls: u64,
}

impl MockState {
    fn new(sensor_width: u32, sensor_height: u32) -> Self {
        let mut state = Self {
            sensor_width,
            sensor_height,
            numbers: HashMap::new(),
            strings: HashMap::new(),
            script: VecDeque::new(),
            free_run: true,
            frame_period: Duration::ZERO,
            next_seq: 1,
            pending_soft_triggers: 0,
            acquiring: false,
            acq_started_at: None,
            writes: Vec::new(),
            set_failures: HashMap::new(),
            fail_open: None,
            open_count: 0,
            start_count: 0,
            stop_count: 0,
            close_count: 0,
            get_image_calls: 0,
        };
        state.load_defaults();
        state
    }

    fn load_defaults(&mut self) {
        let (w, h) = (f64::from(self.sensor_width), f64::from(self.sensor_height));
        let numbers: &[(&str, f64)] = &[
            (prm::EXPOSURE, 10_000.0),
            (prm::WIDTH, w),
            ("width:min", 32.0),
            ("width:max", w),
            ("width:inc", 16.0),
            (prm::HEIGHT, h),
            ("height:min", 32.0),
            ("height:max", h),
            ("height:inc", 2.0),
            (prm::OFFSET_X, 0.0),
            ("offsetX:min", 0.0),
            ("offsetX:inc", 16.0),
            (prm::OFFSET_Y, 0.0),
            ("offsetY:min", 0.0),
            ("offsetY:inc", 2.0),
            (prm::BINNING_HORIZONTAL, 1.0),
            ("binning_horizontal:min", 1.0),
            ("binning_horizontal:max", 4.0),
            ("binning_horizontal:inc", 1.0),
            (prm::BINNING_VERTICAL, 1.0),
            ("binning_vertical:min", 1.0),
            ("binning_vertical:max", 4.0),
            ("binning_vertical:inc", 1.0),
            (prm::BINNING_HORIZONTAL_MODE, 1.0),
            (prm::BINNING_VERTICAL_MODE, 1.0),
            (prm::IMAGE_DATA_BIT_DEPTH, 8.0),
            (prm::SENSOR_DATA_BIT_DEPTH, 10.0),
            (prm::OUTPUT_DATA_BIT_DEPTH, 8.0),
            (prm::TRG_SOURCE, 0.0),
            (prm::TRG_SELECTOR, 0.0),
            (prm::TRG_SOFTWARE, 0.0),
            (prm::GPI_SELECTOR, 1.0),
            (prm::GPI_MODE, 0.0),
            (prm::DEBUG_LEVEL, 0.0),
            (prm::BUFFER_POLICY, 0.0),
            (prm::USER_SET_SELECTOR, 0.0),
            (prm::USER_SET_LOAD, 0.0),
            (prm::USER_SET_DEFAULT, 0.0),
            (prm::DEVICE_RESET, 0.0),
        ];
        self.numbers = numbers
            .iter()
            .map(|(key, value)| ((*key).to_string(), *value))
            .collect();

        self.strings.insert(prm::DEVICE_NAME.to_string(), MOCK_MODEL.to_string());
        self.strings.insert(prm::DEVICE_TYPE.to_string(), "USB3.0".to_string());
    }

    fn number(&self, key: &str) -> XiResult<f64> {
        match key {
            "offsetX:max" => Ok(f64::from(self.sensor_width) - self.numbers[prm::WIDTH]),
            "offsetY:max" => Ok(f64::from(self.sensor_height) - self.numbers[prm::HEIGHT]),
            _ => self
                .numbers
                .get(key)
                .copied()
                .ok_or(XiStatus::NOT_SUPPORTED_PARAM),
        }
    }

    fn int(&self, key: &str) -> i32 {
        self.number(key).map(|v| v as i32).unwrap_or(0)
    }

    fn write(&mut self, key: &str, value: f64) -> XiResult<()> {
        if let Some(status) = self.set_failures.get(key) {
            return Err(*status);
        }
        if key.contains(':') {
            return Err(XiStatus::READ_ONLY_PARAM);
        }
        if !self.numbers.contains_key(key) {
            return Err(XiStatus::NOT_SUPPORTED_PARAM);
        }
        self.check_range(key, value)?;

        let extent_ok = match key {
            prm::WIDTH => value + self.numbers[prm::OFFSET_X] <= f64::from(self.sensor_width),
            prm::HEIGHT => value + self.numbers[prm::OFFSET_Y] <= f64::from(self.sensor_height),
            _ => true,
        };
        if !extent_ok {
            return Err(XiStatus::WRONG_PARAM_VALUE);
        }

        if key == prm::TRG_SOFTWARE && value != 0.0 {
            self.pending_soft_triggers += 1;
        }
        self.numbers.insert(key.to_string(), value);
        Ok(())
    }

    fn check_range(&self, key: &str, value: f64) -> XiResult<()> {
        let min = self.number(&format!("{key}:min")).ok();
        let max = self.number(&format!("{key}:max")).ok();
        let inc = self.number(&format!("{key}:inc")).ok();

        if min.is_some_and(|min| value < min) || max.is_some_and(|max| value > max) {
            return Err(XiStatus::WRONG_PARAM_VALUE);
        }
        if let Some(inc) = inc.filter(|inc| *inc > 0.0) {
            let base = min.unwrap_or(0.0);
            if ((value - base) % inc).abs() > f64::EPSILON {
                return Err(XiStatus::WRONG_PARAM_VALUE);
            }
        }
        Ok(())
    }

    fn current_format(&self) -> XiImageFormat {
        if self.int(prm::IMAGE_DATA_BIT_DEPTH) <= 8 {
            XiImageFormat::Mono8
        } else {
            XiImageFormat::Mono16
        }
    }

    fn software_triggered(&self) -> bool {
        self.int(prm::TRG_SOURCE) == TriggerSource::Software as i32
    }
}

/// Result of one simulated `xiGetImage`, decided under the state lock and
/// acted upon after releasing it.
enum Outcome {
    Frame { seq: u64, format: XiImageFormat },
    Wait,
    Fail(XiStatus),
}

/// Simulated xiAPI entry point.
pub struct MockXiApi {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockXiApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockXiApi {
    /// Simulated camera with the default sensor.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sensor(MOCK_SENSOR_WIDTH, MOCK_SENSOR_HEIGHT)
    }

    /// Simulated camera with a custom sensor size.
    #[must_use]
    pub fn with_sensor(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new(width, height))),
        }
    }

    /// Handle for scripting and inspection.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl XiApi for MockXiApi {
    fn open_device(&self, device_id: u32) -> XiResult<Box<dyn XiDevice>> {
        let mut state = self.state.lock();
        if let Some(status) = state.fail_open {
            return Err(status);
        }
        state.open_count += 1;
        tracing::debug!(device_id, "Mock xiAPI device opened");
        Ok(Box::new(MockDevice {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

/// One opened simulated camera.
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockDevice {
    fn state(&self) -> XiResult<parking_lot::MutexGuard<'_, MockState>> {
        if self.closed {
            return Err(XiStatus::INVALID_HANDLE);
        }
        Ok(self.state.lock())
    }
}

impl XiDevice for MockDevice {
    fn get_param_int(&mut self, key: &str) -> XiResult<i32> {
        self.state()?.number(key).map(|v| v as i32)
    }

    fn get_param_float(&mut self, key: &str) -> XiResult<f32> {
        self.state()?.number(key).map(|v| v as f32)
    }

    fn get_param_string(&mut self, key: &str) -> XiResult<String> {
        self.state()?
            .strings
            .get(key)
            .cloned()
            .ok_or(XiStatus::NOT_SUPPORTED_PARAM)
    }

    fn set_param_int(&mut self, key: &str, value: i32) -> XiResult<()> {
        let mut state = self.state()?;
        state.writes.push(ParamWrite::int(key, value));
        state.write(key, f64::from(value))
    }

    fn set_param_float(&mut self, key: &str, value: f32) -> XiResult<()> {
        let mut state = self.state()?;
        state.writes.push(ParamWrite::Float(key.to_string(), value));
        state.write(key, f64::from(value).round())
    }

    fn set_param_string(&mut self, key: &str, value: &str) -> XiResult<()> {
        let mut state = self.state()?;
        state
            .writes
            .push(ParamWrite::Str(key.to_string(), value.to_string()));
        if !state.strings.contains_key(key) {
            return Err(XiStatus::NOT_SUPPORTED_PARAM);
        }
        state.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn start_acquisition(&mut self) -> XiResult<()> {
        let mut state = self.state()?;
        state.acquiring = true;
        state.acq_started_at = Some(Instant::now());
        state.start_count += 1;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> XiResult<()> {
        let mut state = self.state()?;
        state.acquiring = false;
        state.pending_soft_triggers = 0;
        state.stop_count += 1;
        Ok(())
    }

    fn get_image(&mut self, _timeout_ms: u32, buffer: &mut [u8]) -> XiResult<XiImage> {
        let (outcome, period) = {
            let mut state = self.state()?;
            state.get_image_calls += 1;
            (next_outcome(&mut state), state.frame_period)
        };

        let (seq, format) = match outcome {
            Outcome::Frame { seq, format } => (seq, format),
            Outcome::Wait => {
                thread::sleep(IDLE_POLL);
                return Err(XiStatus::TIMEOUT);
            }
            Outcome::Fail(status) => return Err(status),
        };

        if !period.is_zero() {
            thread::sleep(period);
        }

        let state = self.state()?;
        let width = state.int(prm::WIDTH).max(0) as u32;
        let height = state.int(prm::HEIGHT).max(0) as u32;
        let frame_bytes = width as usize * height as usize * format.bytes_per_pixel();
        let written = frame_bytes.min(buffer.len());
        buffer[..written].fill(seq as u8);

        let elapsed = state
            .acq_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();

        Ok(XiImage {
            frm: format.to_raw(),
            nframe: seq,
            ts_sec: elapsed.as_secs() as u32,
            ts_usec: elapsed.subsec_micros(),
            width,
            height,
            bp_size: written,
        })
    }

    fn close(&mut self) -> XiResult<()> {
        let mut state = self.state()?;
        state.acquiring = false;
        state.close_count += 1;
        drop(state);
        self.closed = true;
        Ok(())
    }
}

fn next_outcome(state: &mut MockState) -> Outcome {
    if !state.acquiring {
        return Outcome::Fail(XiStatus::NO_IMAGE);
    }
    if state.software_triggered() {
        if state.pending_soft_triggers == 0 {
            return Outcome::Wait;
        }
        state.pending_soft_triggers -= 1;
    }

    match state.script.pop_front() {
        Some(MockFrame::Image { seq, format }) => {
            state.next_seq = seq + 1;
            let format = format.unwrap_or_else(|| state.current_format());
            Outcome::Frame { seq, format }
        }
        Some(MockFrame::Timeout) => Outcome::Wait,
        Some(MockFrame::Error(status)) => Outcome::Fail(status),
        None if state.free_run => {
            let seq = state.next_seq;
            state.next_seq += 1;
            Outcome::Frame {
                seq,
                format: state.current_format(),
            }
        }
        None => Outcome::Wait,
    }
}

/// Shared view of a simulated camera.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Queue scripted `xiGetImage` outcomes.
    pub fn push_frames(&self, frames: impl IntoIterator<Item = MockFrame>) {
        self.state.lock().script.extend(frames);
    }

    /// Frames still queued.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.state.lock().script.len()
    }

    /// Generate frames when the script is empty (default) or time out.
    pub fn set_free_run(&self, free_run: bool) {
        self.state.lock().free_run = free_run;
    }

    /// Extra time each produced frame takes.
    pub fn set_frame_period(&self, period: Duration) {
        self.state.lock().frame_period = period;
    }

    /// Make every following open fail with `status`.
    pub fn fail_open(&self, status: XiStatus) {
        self.state.lock().fail_open = Some(status);
    }

    /// Make writes to `key` fail with `status`.
    pub fn fail_set(&self, key: &str, status: XiStatus) {
        self.state.lock().set_failures.insert(key.to_string(), status);
    }

    /// Undo [`fail_open`](Self::fail_open) and [`fail_set`](Self::fail_set).
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_open = None;
        state.set_failures.clear();
    }

    /// Override a numeric parameter without journaling it.
    pub fn set_param(&self, key: &str, value: f64) {
        self.state.lock().numbers.insert(key.to_string(), value);
    }

    /// Current value of a numeric parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<i32> {
        self.state.lock().number(key).ok().map(|v| v as i32)
    }

    /// Override a string parameter.
    pub fn set_string(&self, key: &str, value: &str) {
        self.state
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
    }

    /// Every parameter write so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<ParamWrite> {
        self.state.lock().writes.clone()
    }

    /// Writes to `key` so far, in order.
    #[must_use]
    pub fn writes_to(&self, key: &str) -> Vec<ParamWrite> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.key() == key)
            .cloned()
            .collect()
    }

    /// Forget the write journal.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Software triggers written but not yet consumed by a frame.
    #[must_use]
    pub fn pending_soft_triggers(&self) -> u32 {
        self.state.lock().pending_soft_triggers
    }

    /// True between `xiStartAcquisition` and `xiStopAcquisition`.
    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.state.lock().acquiring
    }

    /// Successful `xiOpenDevice` calls.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    /// `xiStartAcquisition` calls.
    #[must_use]
    pub fn start_count(&self) -> u32 {
        self.state.lock().start_count
    }

    /// `xiStopAcquisition` calls.
    #[must_use]
    pub fn stop_count(&self) -> u32 {
        self.state.lock().stop_count
    }

    /// `xiCloseDevice` calls.
    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.state.lock().close_count
    }

    /// `xiGetImage` calls.
    #[must_use]
    pub fn get_image_calls(&self) -> u64 {
        self.state.lock().get_image_calls
    }
}
