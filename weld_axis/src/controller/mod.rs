//! Axis controller contract and its two variants.
//!
//! Both variants share the blocking facade semantics and the observer
//! callbacks; their internals stay separate:
//!
//! | Variant | Families | Internals |
//! |---|---|---|
//! | [`CyclicController`] | EPOS4, Unknown | request flags + step procedures |
//! | [`MailboxController`] | ACCELNET | mailbox of requests + posture sequencer |
//!
//! [`create_controller`] selects the variant from the detected drive family.

pub mod cyclic;
pub mod mailbox;
pub mod requests;
pub mod settings;
pub mod shared;

use std::sync::Arc;
use tracing::{debug, error, info};
use weld_common::axis::config::AxisConfig;
use weld_common::axis::status::AxisStatusBits;
use weld_common::axis::types::{
    AxisErrorCode, AxisHeadInfo, AxisIdentity, AxisTag, HeadMode, MotionRequest, PositionKind,
};
use weld_common::bus::{FrameSink, InputHandler};
use weld_common::drive::family::{ControllerVariant, DriveFamily};

use crate::config::CycleSettings;
use crate::error::AxisError;
use crate::observer::AxisObserver;
use crate::sampling::{SampleSink, TriggerContext, TriggerInterval};

pub use cyclic::CyclicController;
pub use mailbox::MailboxController;
pub use settings::AxisSettings;
pub use shared::AxisShared;

/// Blocking command surface of one axis.
///
/// All methods are safe to call from any thread. Only one blocking call per
/// axis is meaningful at a time; a second one supersedes the first.
pub trait AxisController: Send + Sync {
    fn shared(&self) -> &AxisShared;

    fn variant(&self) -> ControllerVariant;

    /// Entry point the fieldbus I/O thread delivers input frames to.
    fn input_handler(&self) -> Arc<dyn InputHandler>;

    /// Switch the head mode, optionally homing first. Blocks up to 20 s.
    fn request_mode(&self, mode: HeadMode, home: bool, go_to_soft_lower_limit: bool) -> bool;

    /// Drive to a position. Blocks up to 20 s.
    fn request_position(&self, value: i32, kind: PositionKind) -> bool;

    /// Error field of the status snapshot.
    fn error_code(&self) -> u16;

    fn test_fault_reset(&self);

    fn test_enable_operation(&self);

    fn test_disable_operation(&self);

    /// Stop the cyclic thread. Further requests fail.
    fn shutdown(&self);

    fn tag(&self) -> AxisTag {
        self.shared().tag()
    }

    /// Dispatch a [`MotionRequest`] to the matching facade call.
    fn submit(&self, request: MotionRequest) -> bool {
        match request {
            MotionRequest::EnterOperational {
                home,
                go_to_soft_lower_limit,
            } => self.request_mode(HeadMode::Position, home, go_to_soft_lower_limit),
            MotionRequest::LeaveOperational => self.request_mode(HeadMode::Offline, false, false),
            MotionRequest::DriveTo { value, kind } => self.request_position(value, kind),
        }
    }

    /// Actual position in user units.
    fn position(&self) -> i32 {
        self.shared().telemetry.position()
    }

    /// `(lower, upper)` soft limits.
    fn soft_limits(&self) -> (i32, i32) {
        self.shared().settings.soft_limits()
    }

    fn head_info(&self) -> AxisHeadInfo {
        self.shared().head_info(self.error_code())
    }

    fn settings(&self) -> &AxisSettings {
        &self.shared().settings
    }

    fn set_debug_info(&self, on: bool) {
        info!(axis = %self.tag(), on, "debug info");
        self.shared().set_debug_info(on);
    }

    fn start_automatic_mode(&self) {
        self.shared().settings.set_cycle_on(true);
    }

    fn stop_automatic_mode(&self) {
        self.shared().settings.set_cycle_on(false);
    }

    fn burst(&self, context: TriggerContext, interval: TriggerInterval) {
        self.shared().sampler.burst(context, interval);
    }

    fn cancel_burst(&self) {
        self.shared().sampler.cancel();
    }

    /// Image trigger: sample the current position.
    fn incoming_motion_data(&self) {
        let shared = self.shared();
        shared.sampler.incoming_motion_data(shared.telemetry.position());
    }
}

/// Build the controller variant for `identity`'s drive family and start it.
///
/// # Errors
///
/// Returns `AxisError::Spawn` / `AxisError::Cycle` when the cyclic thread
/// cannot be started.
pub fn create_controller(
    identity: AxisIdentity,
    config: AxisConfig,
    cycle: &CycleSettings,
    sink: Arc<dyn FrameSink>,
    observer: Arc<dyn AxisObserver>,
    samples: Arc<dyn SampleSink>,
) -> Result<Box<dyn AxisController>, AxisError> {
    let profile = identity.family.profile();
    if identity.family == DriveFamily::Unknown {
        error!(
            axis = %identity.tag,
            address = %identity.address,
            "Axis {}: unknown drive family, positions are not scaled",
            identity.tag
        );
    }
    info!(
        axis = %identity.tag,
        family = %identity.family,
        variant = ?profile.variant,
        "creating axis controller"
    );
    let shared = Arc::new(AxisShared::new(identity, config, observer, samples, cycle.debug_info));
    Ok(match profile.variant {
        ControllerVariant::Cyclic => Box::new(CyclicController::start(shared, cycle, sink)?),
        ControllerVariant::Mailbox => Box::new(MailboxController::start(shared, cycle, sink)?),
    })
}

/// Target to drive to once homing succeeded.
///
/// With soft limits active the axis moves to the limit on the far side of
/// the home switch. Limits on the wrong side of home are reported and no
/// move is armed.
pub(crate) fn after_homing_target(shared: &AxisShared, go_to_soft_lower_limit: bool) -> Option<i32> {
    if !go_to_soft_lower_limit {
        return None;
    }
    let config = shared.settings.snapshot();
    if !config.soft_limits_active {
        shared.flags.remove(AxisStatusBits::OUT_OF_RANGE);
        return None;
    }
    let (lower, upper) = config.soft_limits();
    let (misplaced, target) = if config.homing_direction.is_positive() {
        (lower > 0 || upper > 0, upper)
    } else {
        (lower < 0 || upper < 0, lower)
    };
    if misplaced {
        let axis = shared.tag();
        shared.report_error(AxisErrorCode::LowerLimit, 0);
        shared.flags.insert(AxisStatusBits::OUT_OF_RANGE);
        error!(%axis, "Axis {axis}: The actual position is out of the software position limits");
        error!(%axis, "Axis {axis}: Please correct software position limits or do homing");
        return None;
    }
    shared.flags.remove(AxisStatusBits::OUT_OF_RANGE);
    debug!(axis = %shared.tag(), target, "drive after homing armed");
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::sampling::NullSampleSink;
    use weld_common::axis::config::HomingDirection;
    use weld_common::bus::DeviceAddress;
    use weld_common::drive::family::{PRODUCT_EPOS4, VENDOR_MAXON};

    fn shared_with(direction: HomingDirection, lower: i32, upper: i32) -> (AxisShared, Arc<RecordingObserver>) {
        let identity = AxisIdentity::new(AxisTag::Z, DeviceAddress::new(VENDOR_MAXON, PRODUCT_EPOS4, 0), true);
        let mut config = AxisConfig::default().with_homing_direction(direction);
        config.soft_limits_active = true;
        config.soft_lower_limit = lower;
        config.soft_upper_limit = upper;
        let obs = Arc::new(RecordingObserver::new());
        let shared = AxisShared::new(identity, config, obs.clone(), Arc::new(NullSampleSink), false);
        (shared, obs)
    }

    #[test]
    fn positive_homing_drives_to_upper_limit() {
        let (shared, obs) = shared_with(HomingDirection::Positive, -2000, -100);
        assert_eq!(after_homing_target(&shared, true), Some(-100));
        assert!(obs.errors().is_empty());
        assert_eq!(after_homing_target(&shared, false), None);
    }

    #[test]
    fn negative_homing_drives_to_lower_limit() {
        let (shared, _) = shared_with(HomingDirection::Negative, 100, 2000);
        assert_eq!(after_homing_target(&shared, true), Some(100));
    }

    #[test]
    fn limits_on_wrong_side_are_reported() {
        let (shared, obs) = shared_with(HomingDirection::Positive, -1000, 1000);
        assert_eq!(after_homing_target(&shared, true), None);
        assert!(shared.flags.contains(AxisStatusBits::OUT_OF_RANGE));
        assert_eq!(obs.errors(), vec![(AxisErrorCode::LowerLimit, 0)]);
    }

    #[test]
    fn inactive_limits_clear_out_of_range() {
        let (shared, _) = shared_with(HomingDirection::Positive, -1000, 1000);
        shared.settings.set_soft_limits_active(false);
        shared.flags.insert(AxisStatusBits::OUT_OF_RANGE);
        assert_eq!(after_homing_target(&shared, true), None);
        assert!(!shared.flags.contains(AxisStatusBits::OUT_OF_RANGE));
    }
}
