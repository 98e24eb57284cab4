//! Persistent per-axis settings.
//!
//! An [`AxisConfig`] is handed to the controller at construction and is only
//! mutated through the controller's setters. Motion-profile values are kept
//! in raw drive units; the family profile converts from percentages.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::drive::family::FamilyProfile;

/// Direction in which the homing run searches for the reference switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomingDirection {
    #[default]
    Positive,
    Negative,
}

impl HomingDirection {
    pub const fn from_positive(positive: bool) -> Self {
        if positive { Self::Positive } else { Self::Negative }
    }

    pub const fn is_positive(self) -> bool {
        matches!(self, Self::Positive)
    }

    /// CiA 402 homing method (limit switch with index pulse).
    pub const fn method(self) -> i16 {
        match self {
            Self::Positive => 18,
            Self::Negative => 17,
        }
    }

    /// Home offset applied when the direction is first configured.
    pub const fn default_offset(self) -> i32 {
        match self {
            Self::Positive => -100,
            Self::Negative => 100,
        }
    }
}

/// Settings of one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    pub soft_limits_active: bool,
    pub soft_lower_limit: i32,
    pub soft_upper_limit: i32,
    /// Raw profile velocity.
    pub velocity: i32,
    /// Raw profile acceleration.
    pub acceleration: i32,
    /// Raw profile deceleration. Kept equal to `acceleration`.
    pub deceleration: i32,
    pub homing_direction: HomingDirection,
    pub homing_method: i16,
    /// Home offset in user units.
    pub home_offset: i32,
    pub mounting_right_top: bool,
    pub homeable: bool,
}

impl Default for AxisConfig {
    fn default() -> Self {
        let direction = HomingDirection::default();
        Self {
            soft_limits_active: false,
            soft_lower_limit: 0,
            soft_upper_limit: 0,
            velocity: 0,
            acceleration: 0,
            deceleration: 0,
            homing_direction: direction,
            homing_method: direction.method(),
            home_offset: direction.default_offset(),
            mounting_right_top: false,
            homeable: true,
        }
    }
}

impl AxisConfig {
    /// Default settings with the family's motion profile.
    pub fn for_family(profile: &FamilyProfile) -> Self {
        Self {
            velocity: profile.default_velocity,
            acceleration: profile.default_acceleration,
            deceleration: profile.default_deceleration,
            ..Self::default()
        }
    }

    /// Set homing direction together with its method and default offset.
    pub fn with_homing_direction(mut self, direction: HomingDirection) -> Self {
        self.homing_direction = direction;
        self.homing_method = direction.method();
        self.home_offset = direction.default_offset();
        self
    }

    pub fn soft_limits(&self) -> (i32, i32) {
        (self.soft_lower_limit, self.soft_upper_limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_lower_limit > self.soft_upper_limit {
            return Err(ConfigError::ValidationError(format!(
                "soft lower limit {} exceeds soft upper limit {}",
                self.soft_lower_limit, self.soft_upper_limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::family::DriveFamily;

    #[test]
    fn homing_parameters_follow_direction() {
        let cfg = AxisConfig::default().with_homing_direction(HomingDirection::Negative);
        assert_eq!(cfg.homing_method, 17);
        assert_eq!(cfg.home_offset, 100);

        let cfg = cfg.with_homing_direction(HomingDirection::Positive);
        assert_eq!(cfg.homing_method, 18);
        assert_eq!(cfg.home_offset, -100);
    }

    #[test]
    fn family_defaults() {
        let cfg = AxisConfig::for_family(DriveFamily::Epos4.profile());
        assert_eq!(cfg.velocity, 5_400);
        assert_eq!(cfg.acceleration, 180_000);
        assert_eq!(cfg.deceleration, cfg.acceleration);
    }

    #[test]
    fn inverted_limits_rejected() {
        let cfg = AxisConfig {
            soft_lower_limit: 10,
            soft_upper_limit: -10,
            ..AxisConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(AxisConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let cfg: AxisConfig = toml::from_str(
            "soft_limits_active = true\nsoft_lower_limit = -1000\nsoft_upper_limit = 1000\nhoming_direction = \"negative\"",
        )
        .unwrap();
        assert!(cfg.soft_limits_active);
        assert_eq!(cfg.soft_limits(), (-1000, 1000));
        assert_eq!(cfg.homing_direction, HomingDirection::Negative);
        assert!(cfg.homeable);
    }
}
