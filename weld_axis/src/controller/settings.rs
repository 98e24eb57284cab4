//! Mutex-guarded axis settings.
//!
//! Setters return the [`ConfigChange`] the caller should persist, if any.
//! Velocity and acceleration are only persisted while no automatic cycle
//! runs, since during a cycle they come from a hardware parameter set.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use weld_common::axis::config::{AxisConfig, HomingDirection};
use weld_common::axis::types::AxisTag;
use weld_common::drive::family::{DriveFamily, FamilyProfile};

use crate::config::ConfigChange;
use crate::limits::SoftLimitPolicy;

pub struct AxisSettings {
    tag: AxisTag,
    profile: &'static FamilyProfile,
    config: Mutex<AxisConfig>,
    cycle_on: AtomicBool,
}

impl AxisSettings {
    pub fn new(tag: AxisTag, profile: &'static FamilyProfile, config: AxisConfig) -> Self {
        Self {
            tag,
            profile,
            config: Mutex::new(config),
            cycle_on: AtomicBool::new(false),
        }
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> AxisConfig {
        self.config.lock().clone()
    }

    pub fn soft_limit_policy(&self, tolerance: i32) -> SoftLimitPolicy {
        SoftLimitPolicy::from_config(&self.config.lock(), tolerance)
    }

    pub fn soft_limits(&self) -> (i32, i32) {
        self.config.lock().soft_limits()
    }

    // ─── Automatic Cycle ────────────────────────────────────────────

    pub fn cycle_on(&self) -> bool {
        self.cycle_on.load(Ordering::Acquire)
    }

    pub fn set_cycle_on(&self, on: bool) {
        self.cycle_on.store(on, Ordering::Release);
    }

    // ─── Profile ────────────────────────────────────────────────────

    fn map_velocity(&self, percent: i32) -> i32 {
        match self.profile.family {
            DriveFamily::Unknown => percent,
            _ => self.profile.velocity_raw(percent),
        }
    }

    fn map_acceleration(&self, percent: i32) -> i32 {
        match self.profile.family {
            DriveFamily::Unknown => percent,
            _ => self.profile.acceleration_raw(percent),
        }
    }

    fn unmap(&self, raw: i32, percent: fn(&FamilyProfile, i32) -> i32) -> i32 {
        match self.profile.family {
            DriveFamily::Unknown => raw,
            _ => percent(self.profile, raw),
        }
    }

    /// Set profile velocity in percent.
    pub fn set_velocity(&self, percent: i32) -> Option<ConfigChange> {
        let change = (!self.cycle_on())
            .then(|| ConfigChange::int(self.tag.profile_key("Velocity"), percent));
        self.config.lock().velocity = self.map_velocity(percent);
        change
    }

    pub fn velocity_percent(&self) -> i32 {
        let raw = self.config.lock().velocity;
        self.unmap(raw, FamilyProfile::velocity_percent)
    }

    /// Set profile acceleration in percent. Deceleration follows.
    pub fn set_acceleration(&self, percent: i32) -> Option<ConfigChange> {
        let change = (!self.cycle_on())
            .then(|| ConfigChange::int(self.tag.profile_key("Acceleration"), percent));
        let raw = self.map_acceleration(percent);
        let mut config = self.config.lock();
        config.acceleration = raw;
        config.deceleration = raw;
        change
    }

    pub fn acceleration_percent(&self) -> i32 {
        let raw = self.config.lock().acceleration;
        self.unmap(raw, FamilyProfile::acceleration_percent)
    }

    /// Set profile deceleration in percent.
    ///
    /// Acceleration and deceleration are always kept equal, so this writes
    /// both and never produces a change to persist.
    pub fn set_deceleration(&self, percent: i32) -> Option<ConfigChange> {
        let raw = self.map_acceleration(percent);
        let mut config = self.config.lock();
        config.acceleration = raw;
        config.deceleration = raw;
        None
    }

    pub fn deceleration_percent(&self) -> i32 {
        let raw = self.config.lock().deceleration;
        self.unmap(raw, FamilyProfile::acceleration_percent)
    }

    // ─── Soft Limits ────────────────────────────────────────────────

    pub fn set_soft_limits_active(&self, active: bool) -> Option<ConfigChange> {
        let mut config = self.config.lock();
        let changed = config.soft_limits_active != active;
        config.soft_limits_active = active;
        changed.then(|| ConfigChange::bool(self.tag.setting_key("SoftLimitsActive"), active))
    }

    pub fn soft_limits_active(&self) -> bool {
        self.config.lock().soft_limits_active
    }

    pub fn set_soft_lower_limit(&self, value: i32) -> Option<ConfigChange> {
        let mut config = self.config.lock();
        let changed = config.soft_lower_limit != value;
        config.soft_lower_limit = value;
        changed.then(|| ConfigChange::int(self.tag.setting_key("SoftLowerLimit"), value))
    }

    pub fn soft_lower_limit(&self) -> i32 {
        self.config.lock().soft_lower_limit
    }

    pub fn set_soft_upper_limit(&self, value: i32) -> Option<ConfigChange> {
        let mut config = self.config.lock();
        let changed = config.soft_upper_limit != value;
        config.soft_upper_limit = value;
        changed.then(|| ConfigChange::int(self.tag.setting_key("SoftUpperLimit"), value))
    }

    pub fn soft_upper_limit(&self) -> i32 {
        self.config.lock().soft_upper_limit
    }

    // ─── Homing / Mounting ──────────────────────────────────────────

    /// Set the homing direction. Updates the homing method, not the offset.
    pub fn set_homing_direction(&self, positive: bool) -> Option<ConfigChange> {
        let direction = HomingDirection::from_positive(positive);
        let mut config = self.config.lock();
        let changed = config.homing_direction != direction;
        config.homing_direction = direction;
        config.homing_method = direction.method();
        changed.then(|| ConfigChange::bool(self.tag.setting_key("HomingDirPos"), positive))
    }

    pub fn homing_direction_positive(&self) -> bool {
        self.config.lock().homing_direction.is_positive()
    }

    pub fn set_home_offset(&self, offset: i32) {
        self.config.lock().home_offset = offset;
    }

    pub fn home_offset(&self) -> i32 {
        self.config.lock().home_offset
    }

    pub fn set_mounting_right_top(&self, right_top: bool) -> Option<ConfigChange> {
        let mut config = self.config.lock();
        let changed = config.mounting_right_top != right_top;
        config.mounting_right_top = right_top;
        changed.then(|| ConfigChange::bool(self.tag.setting_key("MountingRightTop"), right_top))
    }

    pub fn mounting_right_top(&self) -> bool {
        self.config.lock().mounting_right_top
    }
}
