//! State shared by the ingest path, the cyclic thread and callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::warn;
use weld_common::axis::config::AxisConfig;
use weld_common::axis::types::{AxisErrorCode, AxisHeadInfo, AxisIdentity, AxisTag, PostureStatus};
use weld_common::drive::family::FamilyProfile;

use crate::controller::settings::AxisSettings;
use crate::event::CompletionEvent;
use crate::observer::AxisObserver;
use crate::sampling::{MotionSampler, SampleSink};
use crate::telemetry::{AxisTelemetry, StatusFlags};

pub struct AxisShared {
    pub identity: AxisIdentity,
    pub profile: &'static FamilyProfile,
    pub telemetry: AxisTelemetry,
    pub flags: StatusFlags,
    pub settings: AxisSettings,
    /// Completes mode requests (enable, disable, homing).
    pub mode_event: CompletionEvent,
    /// Completes position requests.
    pub position_event: CompletionEvent,
    pub observer: Arc<dyn AxisObserver>,
    pub sampler: MotionSampler,
    posture: AtomicU8,
    debug_info: AtomicBool,
    homing_active: AtomicBool,
}

impl AxisShared {
    pub fn new(
        identity: AxisIdentity,
        config: AxisConfig,
        observer: Arc<dyn AxisObserver>,
        samples: Arc<dyn SampleSink>,
        debug_info: bool,
    ) -> Self {
        let profile = identity.family.profile();
        Self {
            identity,
            profile,
            telemetry: AxisTelemetry::new(),
            flags: StatusFlags::default(),
            settings: AxisSettings::new(identity.tag, profile, config),
            mode_event: CompletionEvent::new(),
            position_event: CompletionEvent::new(),
            observer,
            sampler: MotionSampler::new(identity.tag, samples),
            posture: AtomicU8::new(PostureStatus::Offline as u8),
            debug_info: AtomicBool::new(debug_info),
            homing_active: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn tag(&self) -> AxisTag {
        self.identity.tag
    }

    pub fn posture(&self) -> PostureStatus {
        PostureStatus::from_u8(self.posture.load(Ordering::Acquire))
    }

    pub fn set_posture(&self, posture: PostureStatus) {
        self.posture.store(posture as u8, Ordering::Release);
    }

    pub fn debug_info(&self) -> bool {
        self.debug_info.load(Ordering::Relaxed)
    }

    pub fn set_debug_info(&self, on: bool) {
        self.debug_info.store(on, Ordering::Relaxed);
    }

    pub fn homing_active(&self) -> bool {
        self.homing_active.load(Ordering::Acquire)
    }

    pub fn set_homing_active(&self, active: bool) {
        self.homing_active.store(active, Ordering::Release);
    }

    /// Raise a control-level error toward the observer.
    pub fn report_error(&self, code: AxisErrorCode, value: i32) {
        warn!(axis = %self.tag(), %code, value, "axis error reported");
        self.observer.on_error(self.tag(), code, value);
    }

    /// Status snapshot. `error_code` is the variant's error field.
    pub fn head_info(&self, error_code: u16) -> AxisHeadInfo {
        let config = self.settings.snapshot();
        AxisHeadInfo {
            tag: self.tag(),
            posture: self.posture(),
            status_word: self.telemetry.status_word(),
            mode_display: self.telemetry.mode_display(),
            error_code,
            position: self.telemetry.position(),
            velocity: self.telemetry.velocity(),
            torque: self.telemetry.torque(),
            homing_direction_positive: config.homing_direction.is_positive(),
            soft_limits_active: config.soft_limits_active,
            soft_lower_limit: config.soft_lower_limit,
            soft_upper_limit: config.soft_upper_limit,
            status_bits: self.flags.get(),
        }
    }
}
