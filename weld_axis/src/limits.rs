//! Soft travel limits.
//!
//! Targets are resolved and clamped before they are ever forwarded to the
//! drive. Clamping is not an error for the motion: the clamped target is
//! driven and the violated bound is reported as a recoverable warning.

use weld_common::axis::config::AxisConfig;
use weld_common::axis::types::PositionKind;

/// Result of clamping a target against the soft limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    Within(i32),
    ClampedLower(i32),
    ClampedUpper(i32),
}

impl LimitCheck {
    /// The target that will be driven.
    pub const fn target(self) -> i32 {
        match self {
            Self::Within(t) | Self::ClampedLower(t) | Self::ClampedUpper(t) => t,
        }
    }
}

/// Soft-limit settings captured for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftLimitPolicy {
    pub active: bool,
    pub lower: i32,
    pub upper: i32,
    /// Slack around the limits for the out-of-range check (user units).
    pub tolerance: i32,
}

impl SoftLimitPolicy {
    pub fn from_config(config: &AxisConfig, tolerance: i32) -> Self {
        Self {
            active: config.soft_limits_active,
            lower: config.soft_lower_limit,
            upper: config.soft_upper_limit,
            tolerance,
        }
    }

    /// Current position already lies outside the limits (plus tolerance).
    pub fn out_of_range(&self, position: i32) -> bool {
        self.active
            && (position < self.lower.saturating_sub(self.tolerance)
                || position > self.upper.saturating_add(self.tolerance))
    }

    /// Absolute target for a request.
    pub fn resolve(current: i32, value: i32, kind: PositionKind) -> i32 {
        match kind {
            PositionKind::Absolute => value,
            PositionKind::Relative => current.saturating_add(value),
        }
    }

    pub fn clamp(&self, target: i32) -> LimitCheck {
        if !self.active {
            LimitCheck::Within(target)
        } else if target < self.lower {
            LimitCheck::ClampedLower(self.lower)
        } else if target > self.upper {
            LimitCheck::ClampedUpper(self.upper)
        } else {
            LimitCheck::Within(target)
        }
    }

    /// Target already satisfied by the current position.
    pub fn already_at(&self, current: i32, target: i32) -> bool {
        target.saturating_sub(current).saturating_abs() < self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> SoftLimitPolicy {
        SoftLimitPolicy {
            active: true,
            lower: -1000,
            upper: 1000,
            tolerance: 3,
        }
    }

    #[test]
    fn clamps_each_direction() {
        let p = policy();
        assert_eq!(p.clamp(1500), LimitCheck::ClampedUpper(1000));
        assert_eq!(p.clamp(-1500), LimitCheck::ClampedLower(-1000));
        assert_eq!(p.clamp(999), LimitCheck::Within(999));
        assert_eq!(p.clamp(1000), LimitCheck::Within(1000));
    }

    #[test]
    fn inactive_limits_pass_through() {
        let p = SoftLimitPolicy {
            active: false,
            ..policy()
        };
        assert_eq!(p.clamp(5000), LimitCheck::Within(5000));
        assert!(!p.out_of_range(5000));
    }

    #[test]
    fn out_of_range_honours_tolerance() {
        let p = policy();
        assert!(!p.out_of_range(1003));
        assert!(p.out_of_range(1004));
        assert!(!p.out_of_range(-1003));
        assert!(p.out_of_range(-1004));
    }

    #[test]
    fn relative_resolution() {
        assert_eq!(SoftLimitPolicy::resolve(200, -50, PositionKind::Relative), 150);
        assert_eq!(SoftLimitPolicy::resolve(200, -50, PositionKind::Absolute), -50);
    }

    #[test]
    fn already_at_target() {
        let p = policy();
        assert!(p.already_at(100, 102));
        assert!(!p.already_at(100, 103));
    }

    proptest! {
        #[test]
        fn clamped_target_is_std_clamp(t in any::<i32>(), lo in -100_000i32..0, hi in 0i32..100_000) {
            let p = SoftLimitPolicy { active: true, lower: lo, upper: hi, tolerance: 3 };
            prop_assert_eq!(p.clamp(t).target(), t.clamp(lo, hi));
        }
    }
}
