//! Acquisition loop behaviour through the camera session.
//!
//! Every test runs against the simulated camera with scripted frames, so
//! the exact sequence of device outcomes is known.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p lima-driver-ximea --test acquisition_test
//! ```

mod common;

use common::{wait_for, TestCamera, DEADLINE};
use lima_core::{
    AcqStatus, Bin, DetStatus, EventLog, FrameDim, HwBufferCtrl, HwError, HwInterface, ImageType,
    Roi, Severity, Size, SoftBufferCtrl, TrigMode,
};
use lima_driver_ximea::components::acquisition::{
    AcqLoop, AcqParams, AcqStats, LoopContext, LoopExit, StatusCell,
};
use lima_driver_ximea::components::connection::XiConnection;
use lima_driver_ximea::components::params::ParamGateway;
use lima_driver_ximea::components::trigger::{SoftTrigger, TriggerController, TriggerPolarity};
use lima_driver_ximea::mock::{MockFrame, MockXiApi};
use lima_driver_ximea::sdk::{prm, XiImageFormat, XiStatus};
use lima_driver_ximea::{CameraStatus, Interface, LatencyPolicy};
use parking_lot::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Internal trigger
// =============================================================================

#[test]
fn internal_trigger_acquires_requested_frames() {
    let mut t = TestCamera::new();
    t.mock.push_frames((1..=3).map(MockFrame::image));
    t.camera.set_nb_frames(3).unwrap();

    t.run();
    assert!(t.wait_idle());

    assert_eq!(t.buffer.published_count(), 3);
    assert_eq!(t.camera.nb_hw_acquired_frames(), 3);
    assert_eq!(t.camera.status(), CameraStatus::Ready);
    assert_eq!(t.mock.start_count(), 1);
    assert_eq!(t.mock.stop_count(), 1, "loop stops the device once at exit");
    assert!(t.events.is_empty());

    // explicit stop after a finished sequence adds no second stop
    t.camera.stop_acq().unwrap();
    assert_eq!(t.mock.stop_count(), 1);
}

#[test]
fn frames_land_in_ring_slots() {
    let mut t = TestCamera::new();
    t.mock.push_frames((1..=6).map(MockFrame::image));
    t.camera.set_nb_frames(6).unwrap();

    t.run();
    assert!(t.wait_idle());

    // 4 slots: frames 4 and 5 overwrote slots 0 and 1
    assert_eq!(t.buffer.read_frame(0)[0], 5);
    assert_eq!(t.buffer.read_frame(1)[0], 6);
    assert_eq!(t.buffer.read_frame(2)[0], 3);
    assert_eq!(t.buffer.last_acquired_frame(), Some(5));
    assert!(t.buffer.start_timestamp().is_some());
}

#[test]
fn start_without_prepare_is_rejected() {
    let mut t = TestCamera::new();
    assert!(matches!(t.camera.start_acq(), Err(HwError::NotPrepared)));
    assert_eq!(t.mock.start_count(), 0);
}

#[test]
fn prepare_rejects_buffer_of_another_geometry() {
    let mut t = TestCamera::new();
    t.camera.set_image_type(ImageType::Bpp16).unwrap();

    let err = t.camera.prepare_acq().unwrap_err();
    assert!(matches!(err, HwError::Config(_)));
    assert!(err.to_string().contains("frame buffer"), "{err}");

    // reallocating for the new depth makes the sequence go through
    let buffer = t.camera.allocate_soft_buffer().unwrap();
    assert_eq!(
        buffer.frame_dim(),
        FrameDim::new(Size::new(64, 64), ImageType::Bpp16)
    );
    t.mock.push_frames((1..=2).map(MockFrame::image));
    t.camera.set_nb_frames(2).unwrap();
    t.run();
    assert!(t.wait_idle());
    assert_eq!(buffer.published_count(), 2);
    assert_eq!(buffer.read_frame(1).len(), 64 * 64 * 2);
}

#[test]
fn prepare_rejects_buffer_after_roi_change() {
    let mut t = TestCamera::new();
    let roi = t.camera.check_roi(Roi::new(0, 0, 32, 32)).unwrap();
    t.camera.set_roi(roi).unwrap();

    assert!(matches!(t.camera.prepare_acq(), Err(HwError::Config(_))));
}

#[test]
fn settings_are_refused_while_acquiring() {
    let mut t = TestCamera::new();
    t.camera.set_nb_frames(0).unwrap();
    t.run();
    assert!(t.camera.is_acquiring());
    t.mock.clear_writes();

    let results = [
        t.camera.set_trig_mode(TrigMode::IntTrigMult),
        t.camera.set_exp_time(0.01),
        t.camera.set_lat_time(0.1),
        t.camera.set_nb_frames(5),
        t.camera.set_image_type(ImageType::Bpp16),
        t.camera.check_roi(Roi::new(0, 0, 32, 32)).map(|_| ()),
        t.camera.set_roi(Roi::new(0, 0, 32, 32)),
        t.camera.set_bin(Bin::new(2, 2)),
    ];
    for result in results {
        assert!(
            matches!(result, Err(HwError::AcquisitionRunning(_))),
            "{result:?}"
        );
    }
    assert!(t.mock.writes().is_empty(), "device untouched mid-run");
    assert_eq!(t.camera.trig_mode(), TrigMode::IntTrig);
    assert_eq!(t.camera.nb_frames(), 0);
    assert!(t.camera.is_acquiring());

    t.camera.stop_acq().unwrap();
    t.camera.set_trig_mode(TrigMode::IntTrigMult).unwrap();
    t.camera.set_nb_frames(5).unwrap();
    assert_eq!(t.camera.nb_frames(), 5);
}

#[test]
fn prepare_needs_a_buffer() {
    let api = MockXiApi::with_sensor(64, 64);
    let mut camera =
        lima_driver_ximea::Camera::open(Arc::new(api), common::test_config()).unwrap();
    let err = camera.prepare_acq().unwrap_err();
    assert!(err.to_string().contains("no frame buffer"));
}

// =============================================================================
// Software trigger
// =============================================================================

#[test]
fn each_start_in_software_mode_yields_one_frame() {
    let mut t = TestCamera::new();
    t.mock.set_free_run(true);
    t.camera.set_trig_mode(TrigMode::IntTrigMult).unwrap();
    t.camera.set_nb_frames(3).unwrap();

    t.run();
    assert!(wait_for(|| t.camera.nb_hw_acquired_frames() == 1, DEADLINE));

    t.camera.start_acq().unwrap();
    assert!(wait_for(|| t.camera.nb_hw_acquired_frames() == 2, DEADLINE));

    t.camera.start_acq().unwrap();
    assert!(t.wait_idle());

    assert_eq!(t.camera.nb_hw_acquired_frames(), 3);
    assert_eq!(t.mock.start_count(), 1, "later starts only trigger");
    assert_eq!(t.mock.writes_to(prm::TRG_SOFTWARE).len(), 3);
    assert_eq!(t.camera.status(), CameraStatus::Ready);
}

#[test]
fn back_to_back_triggers_yield_one_frame() {
    let api = MockXiApi::with_sensor(32, 32);
    let mock = api.handle();
    let mut conn = XiConnection::open(&api, 0).unwrap();
    TriggerController::new(1)
        .configure(&mut conn, TrigMode::IntTrigMult, TriggerPolarity::default())
        .unwrap();
    conn.start_acquisition().unwrap();
    // the device itself would serve both
    conn.set_int(prm::TRG_SOFTWARE, 1).unwrap();
    conn.set_int(prm::TRG_SOFTWARE, 1).unwrap();

    let dim = FrameDim::new(Size::new(32, 32), ImageType::Bpp8);
    let buffer = Arc::new(SoftBufferCtrl::new(dim, 2).unwrap());
    let soft_trigger = SoftTrigger::new();
    let ctx = LoopContext {
        connection: Arc::new(Mutex::new(conn)),
        buffer: buffer.clone(),
        events: Arc::new(EventLog::new()),
        soft_trigger: soft_trigger.clone(),
        status: StatusCell::default(),
        image_number: Arc::new(AtomicU64::new(0)),
        stats: Arc::new(AcqStats::default()),
        span: tracing::Span::none(),
    };

    // both raised before the loop looks at the flag
    soft_trigger.raise();
    soft_trigger.raise();

    let params = AcqParams {
        trig_mode: TrigMode::IntTrigMult,
        nb_frames: 5,
        latency: Duration::ZERO,
        latency_policy: LatencyPolicy::SoftwareTriggerOnly,
        frame_timeout: Duration::from_millis(20),
    };
    let mut thread = AcqLoop::new(ctx, params).spawn("acq-test".into()).unwrap();

    assert!(wait_for(|| buffer.published_count() == 1, DEADLINE));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(buffer.published_count(), 1);

    assert_eq!(thread.stop(), Some(LoopExit::Cancelled));
    assert_eq!(mock.stop_count(), 1);
}

#[test]
fn start_after_software_sequence_finished_needs_prepare() {
    let mut t = TestCamera::new();
    t.mock.set_free_run(true);
    t.camera.set_trig_mode(TrigMode::IntTrigMult).unwrap();
    t.camera.set_nb_frames(1).unwrap();

    t.run();
    assert!(t.wait_idle());
    assert_eq!(t.camera.nb_hw_acquired_frames(), 1);

    assert!(matches!(t.camera.start_acq(), Err(HwError::NotPrepared)));
    assert_eq!(t.mock.writes_to(prm::TRG_SOFTWARE).len(), 1);
}

#[test]
fn software_trigger_getter_is_always_false() {
    let mut t = TestCamera::new();
    t.camera.set_software_trigger(true).unwrap();
    assert!(!t.camera.software_trigger());
    assert_eq!(t.mock.writes_to(prm::TRG_SOFTWARE).len(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn rejected_frame_faults_and_stops() {
    let mut t = TestCamera::new();
    t.mock.push_frames((1..=5).map(MockFrame::image));
    t.buffer
        .set_frame_callback(Box::new(|info| info.acq_frame_nb < 1));
    t.camera.set_nb_frames(5).unwrap();

    t.run();
    assert!(t.wait_idle());

    assert_eq!(t.camera.nb_hw_acquired_frames(), 2);
    assert_eq!(t.camera.status(), CameraStatus::Fault);
    assert_eq!(t.mock.stop_count(), 1);

    let events = t.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Fatal);
    assert_eq!(events[0].description, "Frame not ready");
}

#[test]
fn device_error_reports_and_continues() {
    let mut t = TestCamera::new();
    t.mock.push_frames([
        MockFrame::image(1),
        MockFrame::Error(XiStatus::NO_IMAGE),
        MockFrame::image(2),
    ]);
    t.camera.set_nb_frames(2).unwrap();

    t.run();
    assert!(t.wait_idle());

    assert_eq!(t.camera.nb_hw_acquired_frames(), 2);
    let events = t.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Error);
    assert!(events[0].description.contains("XI_NO_IMAGE"));
    assert_eq!(t.camera.acq_stats().device_errors, 1);

    // fault stays until the next prepare
    assert_eq!(t.camera.status(), CameraStatus::Fault);
    t.camera.stop_acq().unwrap();
    assert_eq!(t.camera.status(), CameraStatus::Fault);
    t.camera.prepare_acq().unwrap();
    assert_eq!(t.camera.status(), CameraStatus::Ready);
}

#[test]
fn duplicate_frames_are_not_published() {
    let mut t = TestCamera::new();
    t.mock
        .push_frames([1, 1, 2, 2, 3].map(MockFrame::image));
    t.camera.set_nb_frames(3).unwrap();

    t.run();
    assert!(t.wait_idle());

    let stats = t.camera.acq_stats();
    assert_eq!(stats.published, 3);
    assert_eq!(stats.duplicates, 2);
    assert_eq!(t.mock.queued_frames(), 0);
}

#[test]
fn sequence_gaps_are_counted() {
    let mut t = TestCamera::new();
    t.mock.push_frames([1, 2, 6, 7].map(MockFrame::image));
    t.camera.set_nb_frames(4).unwrap();

    t.run();
    assert!(t.wait_idle());

    let stats = t.camera.acq_stats();
    assert_eq!(stats.lost_frames, 3);
    assert_eq!(stats.discontinuities, 1);
}

#[test]
fn unknown_format_ends_sequence_silently() {
    let mut t = TestCamera::new();
    t.mock.push_frames([
        MockFrame::image(1),
        MockFrame::with_format(2, XiImageFormat::Raw8),
        MockFrame::image(3),
    ]);
    t.camera.set_nb_frames(3).unwrap();

    t.run();
    assert!(t.wait_idle());

    assert_eq!(t.camera.nb_hw_acquired_frames(), 1);
    assert_eq!(t.camera.status(), CameraStatus::Ready);
    assert!(t.events.is_empty());
    assert_eq!(t.mock.stop_count(), 1);
}

// =============================================================================
// Cancellation and timing
// =============================================================================

#[test]
fn stop_during_timeouts_returns_promptly() {
    let mut t = TestCamera::new();
    t.camera.set_nb_frames(0).unwrap();

    t.run();
    assert!(wait_for(|| t.camera.acq_stats().timeouts >= 3, DEADLINE));
    assert!(t.camera.is_acquiring());

    let started = Instant::now();
    t.camera.stop_acq().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(!t.camera.is_acquiring());
    assert_eq!(t.mock.stop_count(), 1);
    assert_eq!(t.camera.status(), CameraStatus::Ready);
    assert_eq!(t.camera.nb_hw_acquired_frames(), 0);
}

#[test]
fn continuous_acquisition_runs_until_stopped() {
    let mut t = TestCamera::new();
    t.mock.set_free_run(true);
    t.mock.set_frame_period(Duration::from_millis(1));
    t.camera.set_nb_frames(0).unwrap();

    t.run();
    assert!(wait_for(|| t.camera.nb_hw_acquired_frames() >= 10, DEADLINE));
    t.camera.stop_acq().unwrap();

    let frames = t.camera.nb_hw_acquired_frames();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(t.camera.nb_hw_acquired_frames(), frames);
    assert_eq!(t.mock.stop_count(), 1);
}

#[test]
fn latency_only_applies_to_software_trigger() {
    let mut t = TestCamera::new();
    t.mock.set_free_run(true);
    t.camera.set_lat_time(0.002).unwrap();
    t.camera.set_nb_frames(2).unwrap();

    t.run();
    assert!(t.wait_idle());
    assert_eq!(t.camera.acq_stats().latency_waits, 0);

    t.camera.set_trig_mode(TrigMode::IntTrigMult).unwrap();
    t.run();
    assert!(wait_for(|| t.camera.nb_hw_acquired_frames() == 1, DEADLINE));
    t.camera.start_acq().unwrap();
    assert!(t.wait_idle());
    assert_eq!(t.camera.acq_stats().latency_waits, 2);
}

#[test]
fn external_trigger_modes_skip_latency() {
    let mut t = TestCamera::new();
    t.camera.set_lat_time(0.002).unwrap();

    for mode in [TrigMode::ExtTrigSingle, TrigMode::ExtTrigMult] {
        t.camera.set_trig_mode(mode).unwrap();
        t.camera.set_nb_frames(2).unwrap();
        t.mock.push_frames((1..=2).map(MockFrame::image));

        t.run();
        assert!(t.wait_idle());
        assert_eq!(t.camera.nb_hw_acquired_frames(), 2, "{mode:?}");
        assert_eq!(t.camera.acq_stats().latency_waits, 0, "{mode:?}");
    }
}

#[test]
fn always_latency_policy_sleeps_in_every_mode() {
    let mut config = common::test_config();
    config.latency_policy = LatencyPolicy::Always;
    let mut t = TestCamera::with_config(config);
    t.mock.set_free_run(true);
    t.camera.set_lat_time(0.001).unwrap();
    t.camera.set_nb_frames(3).unwrap();

    t.run();
    assert!(t.wait_idle());
    assert_eq!(t.camera.acq_stats().latency_waits, 3);
}

#[test]
fn frame_timeout_includes_exposure() {
    let t = TestCamera::new();
    t.mock.set_param(prm::EXPOSURE, 25_000.0);
    assert_eq!(t.camera.frame_timeout().unwrap(), Duration::from_millis(75));
}

// =============================================================================
// Host interface
// =============================================================================

#[test]
fn interface_reports_running_then_ready() {
    let t = TestCamera::new();
    let mut iface = Interface::new(t.camera);
    t.mock.push_frames((1..=2).map(MockFrame::image));
    iface.camera_mut().set_nb_frames(0).unwrap();

    iface.prepare_acq().unwrap();
    iface.start_acq().unwrap();
    assert!(wait_for(|| iface.nb_hw_acquired_frames() == 2, DEADLINE));

    let status = iface.status().unwrap();
    assert_eq!(status.acq, AcqStatus::Running);

    iface.stop_acq().unwrap();
    let status = iface.status().unwrap();
    assert_eq!(status.acq, AcqStatus::Ready);
    assert_eq!(status.det, DetStatus::Idle);
    assert_eq!(t.mock.stop_count(), 1);
}

#[test]
fn interface_waits_for_trigger_in_software_mode() {
    let t = TestCamera::new();
    t.mock.set_free_run(true);
    let mut iface = Interface::new(t.camera);
    iface.camera_mut().set_trig_mode(TrigMode::IntTrigMult).unwrap();
    iface.camera_mut().set_nb_frames(2).unwrap();

    iface.prepare_acq().unwrap();
    iface.start_acq().unwrap();

    assert!(wait_for(
        || {
            matches!(iface.status(), Ok(s) if s.det == DetStatus::WaitForTrigger)
                && iface.nb_hw_acquired_frames() == 1
        },
        DEADLINE
    ));
    iface.stop_acq().unwrap();
    assert_eq!(iface.nb_hw_acquired_frames(), 1);
    assert_eq!(t.buffer.published_count(), 1);
}
