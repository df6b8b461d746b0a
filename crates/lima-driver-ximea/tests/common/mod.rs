//! Shared test utilities for the XIMEA plugin tests.
//!
//! - `TestCamera`: a [`Camera`] on a simulated 64x64 sensor with an
//!   in-process buffer and an event log wired in
//! - `wait_for`: poll a condition with a deadline
//! - `init_tracing`: route logs to the test harness once per binary

#![allow(dead_code)] // Utilities may not all be used in every test file

use lima_core::{EventLog, SoftBufferCtrl};
use lima_driver_ximea::mock::{MockHandle, MockXiApi};
use lima_driver_ximea::{Camera, XimeaConfig};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

pub const SENSOR_WIDTH: u32 = 64;
pub const SENSOR_HEIGHT: u32 = 64;

/// Generous deadline for conditions that normally hold within milliseconds.
pub const DEADLINE: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Camera, buffer, events and mock handle for one test.
pub struct TestCamera {
    pub camera: Camera,
    pub buffer: Arc<SoftBufferCtrl>,
    pub events: Arc<EventLog>,
    pub mock: MockHandle,
}

impl TestCamera {
    /// Default config, scripted frames only (no free run).
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: XimeaConfig) -> Self {
        init_tracing();
        let api = MockXiApi::with_sensor(SENSOR_WIDTH, SENSOR_HEIGHT);
        let mock = api.handle();
        mock.set_free_run(false);

        let mut camera = Camera::open(Arc::new(api), config).expect("open mock camera");
        let buffer = camera.allocate_soft_buffer().expect("allocate buffer");
        let events = Arc::new(EventLog::new());
        camera.set_event_sink(events.clone());

        Self {
            camera,
            buffer,
            events,
            mock,
        }
    }

    /// Prepare and start, expecting both to succeed.
    pub fn run(&mut self) {
        self.camera.prepare_acq().expect("prepare_acq");
        self.camera.start_acq().expect("start_acq");
    }

    /// Wait for the loop thread to return on its own.
    pub fn wait_idle(&self) -> bool {
        wait_for(|| !self.camera.is_acquiring(), DEADLINE)
    }
}

pub fn test_config() -> XimeaConfig {
    let mut config = XimeaConfig::new(0);
    config.timeout_ms = 50;
    config.nb_buffers = 4;
    config
}

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
