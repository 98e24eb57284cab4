//! Integration tests: blocking facade against simulated drives.
//!
//! Each test starts a real controller thread and a running simulated bus, so
//! requests travel the same path as in the daemon: facade → cyclic thread →
//! output frame → simulated drive → input frame → ingest.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use weld_axis::config::{ControllerConfig, CycleSettings};
use weld_axis::controller::{AxisController, create_controller};
use weld_axis::observer::{AxisEvent, RecordingObserver};
use weld_axis::sampling::NullSampleSink;
use weld_common::axis::config::{AxisConfig, HomingDirection};
use weld_common::axis::status::AxisStatusBits;
use weld_common::axis::types::{AxisErrorCode, AxisIdentity, AxisTag, HeadMode, PositionKind, PostureStatus};
use weld_common::bus::DeviceAddress;
use weld_common::config::ConfigLoader;
use weld_common::drive::cia402::DriveState;
use weld_common::drive::family::{
    ControllerVariant, PRODUCT_ACCELNET, PRODUCT_EPOS4, VENDOR_COPLEY, VENDOR_MAXON,
};
use weld_hal::simulation::{FaultCause, SimBus, SimDrive, SimDriveConfig};

const EPOS4: DeviceAddress = DeviceAddress::new(VENDOR_MAXON, PRODUCT_EPOS4, 0);
const ACCELNET: DeviceAddress = DeviceAddress::new(VENDOR_COPLEY, PRODUCT_ACCELNET, 0);

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    bus: Arc<SimBus>,
    observer: Arc<RecordingObserver>,
    controller: Box<dyn AxisController>,
}

impl Harness {
    fn start(address: DeviceAddress, config: AxisConfig, drive: SimDriveConfig) -> Self {
        let bus = Arc::new(SimBus::new());
        bus.attach(SimDrive::new(drive));
        let observer = Arc::new(RecordingObserver::new());
        let controller = create_controller(
            AxisIdentity::new(AxisTag::X, address, true),
            config,
            &CycleSettings::immediate(),
            bus.clone(),
            observer.clone(),
            Arc::new(NullSampleSink),
        )
        .unwrap();
        bus.subscribe(address, controller.input_handler()).unwrap();
        bus.start().unwrap();
        let h = Self {
            bus,
            observer,
            controller,
        };
        assert!(wait_until(Duration::from_secs(2), || h.controller.shared().telemetry.frames() > 0));
        h
    }

    fn epos4() -> Self {
        Self::start(EPOS4, AxisConfig::default(), SimDriveConfig::new(EPOS4))
    }

    fn drive_state(&self, address: DeviceAddress) -> Option<DriveState> {
        self.bus.with_drive(address, |d| d.state())
    }

    fn flags(&self) -> AxisStatusBits {
        self.controller.shared().flags.get()
    }
}

fn limited(lower: i32, upper: i32) -> AxisConfig {
    let mut config = AxisConfig::default();
    config.soft_limits_active = true;
    config.soft_lower_limit = lower;
    config.soft_upper_limit = upper;
    config
}

fn slow_drive(address: DeviceAddress) -> SimDriveConfig {
    let mut drive = SimDriveConfig::new(address);
    drive.step_per_tick = 4;
    drive
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn near(actual: i32, expected: i32) -> bool {
    (actual - expected).abs() <= 1
}

// ── Cyclic Variant ──────────────────────────────────────────────────

#[test]
fn enable_then_move() {
    let h = Harness::epos4();
    assert_eq!(h.controller.variant(), ControllerVariant::Cyclic);
    assert!(h.controller.request_mode(HeadMode::Position, false, false));
    assert_eq!(h.drive_state(EPOS4), Some(DriveState::OperationEnabled));
    assert_eq!(h.controller.shared().posture(), PostureStatus::Position);

    assert!(h.controller.request_position(1000, PositionKind::Absolute));
    assert!(near(h.controller.position(), 1000));
    assert_eq!(h.bus.with_drive(EPOS4, |d| d.raw_target()), Some(4114));

    assert!(h.controller.request_position(-200, PositionKind::Relative));
    assert!(near(h.controller.position(), 800));

    let info = h.controller.head_info();
    assert_eq!(info.posture, PostureStatus::Position);
    assert_eq!(info.error_code, 0);
}

#[test]
fn target_beyond_upper_limit_is_clamped() {
    let h = Harness::start(EPOS4, limited(-1000, 1000), SimDriveConfig::new(EPOS4));
    assert!(h.controller.request_mode(HeadMode::Position, false, false));

    assert!(h.controller.request_position(1500, PositionKind::Absolute));
    assert!(near(h.controller.position(), 1000));
    assert!(h.observer.errors().contains(&(AxisErrorCode::UpperLimit, 1000)));
    assert!(h.flags().contains(AxisStatusBits::SW_LIMIT_POS));

    assert!(h.controller.request_position(0, PositionKind::Absolute));
    assert!(!h.flags().contains(AxisStatusBits::SW_LIMIT_POS));
}

#[test]
fn already_at_target_reports_without_moving() {
    let h = Harness::epos4();
    assert!(h.controller.request_mode(HeadMode::Position, false, false));
    h.observer.clear();
    assert!(h.controller.request_position(1, PositionKind::Absolute));
    assert_eq!(
        h.observer.events(),
        vec![AxisEvent::ValueReached(AxisTag::X, HeadMode::Position, 1)]
    );
}

#[test]
fn position_out_of_range_is_rejected() {
    let mut drive = SimDriveConfig::new(EPOS4);
    drive.initial_position = 4114 * 2;
    let h = Harness::start(EPOS4, limited(-1000, 1000), drive);

    assert!(!h.controller.request_position(0, PositionKind::Absolute));
    assert!(h.flags().contains(AxisStatusBits::OUT_OF_RANGE));
    assert!(
        h.observer
            .errors()
            .iter()
            .any(|(code, _)| *code == AxisErrorCode::LowerLimit)
    );
    // the drive was never enabled
    assert_ne!(h.drive_state(EPOS4), Some(DriveState::OperationEnabled));
}

#[test]
fn second_move_supersedes_first() {
    let h = Harness::start(EPOS4, AxisConfig::default(), slow_drive(EPOS4));
    assert!(h.controller.request_mode(HeadMode::Position, false, false));

    let (first, second) = thread::scope(|s| {
        let first = s.spawn(|| h.controller.request_position(500, PositionKind::Absolute));
        thread::sleep(Duration::from_millis(100));
        let second = h.controller.request_position(800, PositionKind::Absolute);
        (first.join().unwrap(), second)
    });
    assert!(!first);
    assert!(second);
    assert!(near(h.controller.position(), 800));
}

#[test]
fn fault_mid_move_fails_until_reset() {
    let h = Harness::start(EPOS4, AxisConfig::default(), slow_drive(EPOS4));
    assert!(h.controller.request_mode(HeadMode::Position, false, false));

    let moved = thread::scope(|s| {
        let mover = s.spawn(|| h.controller.request_position(3000, PositionKind::Absolute));
        thread::sleep(Duration::from_millis(100));
        h.bus
            .with_drive(EPOS4, |d| d.inject_fault(0x8611, FaultCause::FollowingError));
        mover.join().unwrap()
    });
    assert!(!moved);
    assert!(h.flags().contains(AxisStatusBits::GEN_FAULT));
    assert_eq!(h.controller.shared().posture(), PostureStatus::Offline);
    assert_eq!(h.controller.error_code(), 0x8611);

    assert!(!h.controller.request_position(0, PositionKind::Absolute));

    h.controller.test_fault_reset();
    assert!(wait_until(Duration::from_secs(1), || {
        !h.flags().contains(AxisStatusBits::GEN_FAULT)
            && h.drive_state(EPOS4) != Some(DriveState::Fault)
    }));
    assert!(h.controller.request_position(0, PositionKind::Absolute));
}

#[test]
fn homing_clears_home_position_flag() {
    let h = Harness::epos4();
    assert!(h.flags().contains(AxisStatusBits::HOME_POS_NOT_OK));
    assert!(h.controller.request_mode(HeadMode::Position, true, false));
    assert!(!h.flags().contains(AxisStatusBits::HOME_POS_NOT_OK));
    assert!(!h.controller.shared().homing_active());
    assert!(near(h.controller.position(), 0));
}

#[test]
fn homing_error_keeps_home_position_flag() {
    let h = Harness::epos4();
    h.bus.with_drive(EPOS4, |d| d.fail_next_homing());
    assert!(!h.controller.request_mode(HeadMode::Position, true, false));
    assert!(h.flags().contains(AxisStatusBits::HOME_POS_NOT_OK));
}

#[test]
fn homing_drives_to_soft_limit_when_asked() {
    let config = limited(-2000, -100).with_homing_direction(HomingDirection::Positive);
    let h = Harness::start(EPOS4, config, SimDriveConfig::new(EPOS4));
    assert!(h.controller.request_mode(HeadMode::Position, true, true));
    assert!(near(h.controller.position(), -100));
}

#[test]
fn offline_disables_the_drive() {
    let h = Harness::epos4();
    assert!(h.controller.request_mode(HeadMode::Position, false, false));
    assert!(h.controller.request_mode(HeadMode::Offline, false, false));
    assert_ne!(h.drive_state(EPOS4), Some(DriveState::OperationEnabled));
    assert_eq!(h.controller.shared().posture(), PostureStatus::Offline);
}

#[test]
fn offline_mid_move_fails_the_move() {
    let h = Harness::start(EPOS4, AxisConfig::default(), slow_drive(EPOS4));
    assert!(h.controller.request_mode(HeadMode::Position, false, false));
    h.observer.clear();

    let (moved, off) = thread::scope(|s| {
        let mover = s.spawn(|| h.controller.request_position(3000, PositionKind::Absolute));
        thread::sleep(Duration::from_millis(100));
        let off = h.controller.request_mode(HeadMode::Offline, false, false);
        (mover.join().unwrap(), off)
    });
    assert!(off);
    assert!(!moved);
    assert!(
        !h.observer
            .events()
            .iter()
            .any(|e| matches!(e, AxisEvent::ValueReached(..)))
    );
    assert_ne!(h.drive_state(EPOS4), Some(DriveState::OperationEnabled));
    assert_eq!(h.controller.shared().posture(), PostureStatus::Offline);
}

#[test]
fn requests_fail_after_shutdown() {
    let h = Harness::epos4();
    h.controller.shutdown();
    assert!(!h.controller.request_mode(HeadMode::Position, false, false));
    assert!(!h.controller.request_position(10, PositionKind::Absolute));
}

// ── Mailbox Variant ─────────────────────────────────────────────────

#[test]
fn legacy_flow() {
    let h = Harness::start(ACCELNET, AxisConfig::default(), SimDriveConfig::new(ACCELNET));
    assert_eq!(h.controller.variant(), ControllerVariant::Mailbox);

    assert!(!h.controller.request_position(300, PositionKind::Absolute));
    assert_eq!(h.observer.errors(), vec![(AxisErrorCode::NotInRequestedMode, 0)]);

    assert!(h.controller.request_mode(HeadMode::Position, false, false));
    assert_eq!(h.drive_state(ACCELNET), Some(DriveState::OperationEnabled));
    assert!(h.controller.request_position(300, PositionKind::Absolute));
    assert!(near(h.controller.position(), 300));

    assert!(h.controller.request_mode(HeadMode::Offline, false, false));
    assert_eq!(h.controller.shared().posture(), PostureStatus::Offline);
}

#[test]
fn legacy_homing() {
    let h = Harness::start(ACCELNET, AxisConfig::default(), SimDriveConfig::new(ACCELNET));
    assert!(h.controller.request_mode(HeadMode::Position, true, false));
    assert!(!h.flags().contains(AxisStatusBits::HOME_POS_NOT_OK));
    assert!(h.controller.request_position(-50, PositionKind::Absolute));
    assert!(near(h.controller.position(), -50));
}

#[test]
fn legacy_clamps_to_lower_limit() {
    let h = Harness::start(ACCELNET, limited(-100, 100), SimDriveConfig::new(ACCELNET));
    assert!(h.controller.request_mode(HeadMode::Position, false, false));
    assert!(h.controller.request_position(-400, PositionKind::Absolute));
    assert!(near(h.controller.position(), -100));
    assert!(h.observer.errors().contains(&(AxisErrorCode::LowerLimit, -100)));
    assert!(h.flags().contains(AxisStatusBits::SW_LIMIT_NEG));
}

// ── Configuration ───────────────────────────────────────────────────

const CONFIG_TOML: &str = r#"
[controller]
startup_delay_ms = 0
align_to_second = false

[[axes]]
tag = "X"
vendor_id = 0xAB
product_code = 0x380

[[axes]]
tag = "Y"
vendor_id = 0xFB
product_code = 0x63500000
soft_limits_active = true
soft_lower_limit = -500
soft_upper_limit = 500
"#;

#[test]
fn controllers_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG_TOML.as_bytes()).unwrap();
    let config = ControllerConfig::load(file.path()).unwrap();
    config.validate().unwrap();

    let bus = Arc::new(SimBus::new());
    let variants: Vec<_> = config
        .axes
        .iter()
        .map(|entry| {
            let controller = create_controller(
                entry.identity(),
                entry.axis_config(),
                &config.controller,
                bus.clone(),
                Arc::new(RecordingObserver::new()),
                Arc::new(NullSampleSink),
            )
            .unwrap();
            let variant = controller.variant();
            assert_eq!(controller.tag(), entry.tag);
            controller.shutdown();
            variant
        })
        .collect();
    assert_eq!(variants, vec![ControllerVariant::Mailbox, ControllerVariant::Cyclic]);
    assert_eq!(config.axes[1].axis_config().soft_limits(), (-500, 500));
}
