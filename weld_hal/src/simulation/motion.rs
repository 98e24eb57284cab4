//! Motion model of a simulated drive.
//!
//! Handles the profile-position set-point handshake and the homing run.
//! Positions are raw drive increments.

use weld_common::drive::cia402::control_bits;
use tracing::{debug, trace};

/// Ticks a new set-point is held before motion starts, so the target-reached
/// bit is visibly low for at least this long.
pub const SETPOINT_SETTLE_TICKS: u32 = 2;

/// Phase of the homing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomingPhase {
    #[default]
    Idle,
    Running {
        remaining: u32,
    },
    Attained,
    Failed,
}

/// Profile-position and homing kinematics.
#[derive(Debug, Clone)]
pub struct ProfileMotion {
    position: i32,
    target: i32,
    /// Maximum raw increments travelled per tick.
    step: i32,
    settle: u32,
    moving: bool,
    setpoint_ack: bool,
    target_reached: bool,
    last_velocity: i32,
    homing: HomingPhase,
    homing_ticks: u32,
    fail_next_homing: bool,
    stall_homing: bool,
    ignore_setpoints: bool,
    prev_control_word: u16,
}

impl ProfileMotion {
    pub fn new(initial_position: i32, step: i32, homing_ticks: u32) -> Self {
        Self {
            position: initial_position,
            target: initial_position,
            step: step.max(1),
            settle: 0,
            moving: false,
            setpoint_ack: false,
            target_reached: true,
            last_velocity: 0,
            homing: HomingPhase::Idle,
            homing_ticks: homing_ticks.max(2),
            fail_next_homing: false,
            stall_homing: false,
            ignore_setpoints: false,
            prev_control_word: 0,
        }
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn setpoint_ack(&self) -> bool {
        self.setpoint_ack
    }

    pub fn target_reached(&self) -> bool {
        self.target_reached
    }

    /// Raw increments per second over the last tick (1 ms).
    pub fn velocity(&self) -> i32 {
        self.last_velocity.saturating_mul(1000)
    }

    pub fn homing_phase(&self) -> HomingPhase {
        self.homing
    }

    /// Make the next homing run end with a homing error.
    pub fn fail_next_homing(&mut self) {
        self.fail_next_homing = true;
    }

    /// Keep every homing run running without ever attaining.
    pub fn stall_homing(&mut self) {
        self.stall_homing = true;
    }

    /// Never acknowledge a new set-point.
    pub fn ignore_setpoints(&mut self) {
        self.ignore_setpoints = true;
    }

    /// Place the axis without motion (test setup).
    pub fn set_position(&mut self, position: i32) {
        self.position = position;
        self.target = position;
        self.moving = false;
        self.target_reached = true;
    }

    /// One tick in profile-position mode.
    pub fn profile_position(&mut self, control_word: u16, target: i32) {
        let setpoint = control_word & control_bits::NEW_SETPOINT != 0;
        let rising = setpoint
            && self.prev_control_word & control_bits::NEW_SETPOINT == 0
            && !self.ignore_setpoints;
        self.prev_control_word = control_word;
        self.homing = HomingPhase::Idle;

        if rising {
            self.target = if control_word & control_bits::RELATIVE != 0 {
                self.position.saturating_add(target)
            } else {
                target
            };
            self.setpoint_ack = true;
            self.target_reached = false;
            self.moving = false;
            self.settle = SETPOINT_SETTLE_TICKS;
            trace!(target = self.target, "new set-point");
            self.last_velocity = 0;
            return;
        }
        if !setpoint {
            self.setpoint_ack = false;
        }
        if control_word & control_bits::HALT != 0 {
            self.moving = false;
            self.last_velocity = 0;
            return;
        }
        if self.settle > 0 {
            self.settle -= 1;
            self.last_velocity = 0;
            return;
        }
        self.travel_toward_target();
    }

    /// One tick in homing mode.
    pub fn homing(&mut self, control_word: u16) {
        let start = control_word & control_bits::START_HOMING != 0;
        let rising = start && self.prev_control_word & control_bits::START_HOMING == 0;
        self.prev_control_word = control_word;
        self.setpoint_ack = false;

        if rising {
            debug!("homing run started");
            self.homing = HomingPhase::Running {
                remaining: self.homing_ticks,
            };
            self.target_reached = false;
            self.moving = true;
            return;
        }

        if let HomingPhase::Running { remaining } = self.homing {
            if !start {
                // start bit withdrawn: run interrupted
                self.homing = HomingPhase::Idle;
                self.moving = false;
                self.target_reached = true;
                return;
            }
            self.target = 0;
            self.travel_toward_target();
            self.moving = true;
            self.target_reached = false;
            if self.stall_homing {
                return;
            }
            if remaining > 1 {
                self.homing = HomingPhase::Running {
                    remaining: remaining - 1,
                };
            } else if self.fail_next_homing {
                self.fail_next_homing = false;
                self.homing = HomingPhase::Failed;
                self.moving = false;
                self.target_reached = true;
                self.target = self.position;
                debug!("homing run failed");
            } else {
                self.position = 0;
                self.target = 0;
                self.homing = HomingPhase::Attained;
                self.moving = false;
                self.target_reached = true;
                debug!("homing attained");
            }
        }
    }

    /// Drive not enabled: stop where we are.
    pub fn hold(&mut self, control_word: u16) {
        self.prev_control_word = control_word;
        self.moving = false;
        self.setpoint_ack = false;
        self.last_velocity = 0;
        if let HomingPhase::Running { .. } = self.homing {
            self.homing = HomingPhase::Idle;
        }
        self.target = self.position;
        self.target_reached = true;
    }

    fn travel_toward_target(&mut self) {
        let delta = (self.target - self.position).clamp(-self.step, self.step);
        self.position += delta;
        self.last_velocity = delta;
        self.moving = self.position != self.target;
        if !self.moving {
            self.target_reached = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETPOINT: u16 = 0x000F | control_bits::NEW_SETPOINT | control_bits::CHANGE_IMMEDIATELY;
    const RUN: u16 = 0x000F;

    fn run_ticks(m: &mut ProfileMotion, cw: u16, target: i32, n: usize) {
        for _ in 0..n {
            m.profile_position(cw, target);
        }
    }

    #[test]
    fn setpoint_handshake() {
        let mut m = ProfileMotion::new(0, 100, 10);
        assert!(m.target_reached());

        m.profile_position(SETPOINT, 1000);
        assert!(m.setpoint_ack());
        assert!(!m.target_reached());

        m.profile_position(RUN, 1000);
        assert!(!m.setpoint_ack());

        run_ticks(&mut m, RUN, 1000, 20);
        assert_eq!(m.position(), 1000);
        assert!(m.target_reached());
        assert!(!m.is_moving());
    }

    #[test]
    fn held_setpoint_does_not_retrigger() {
        let mut m = ProfileMotion::new(0, 1000, 10);
        run_ticks(&mut m, SETPOINT, 500, 10);
        assert_eq!(m.position(), 500);
        // target changes while bit stays high: ignored until next rising edge
        run_ticks(&mut m, SETPOINT, 900, 10);
        assert_eq!(m.position(), 500);
    }

    #[test]
    fn relative_setpoint() {
        let mut m = ProfileMotion::new(200, 1000, 10);
        m.profile_position(SETPOINT | control_bits::RELATIVE, -50);
        run_ticks(&mut m, RUN, 0, 5);
        assert_eq!(m.position(), 150);
    }

    #[test]
    fn homing_run_attains_zero() {
        let mut m = ProfileMotion::new(4000, 100, 5);
        m.homing(RUN | control_bits::START_HOMING);
        assert!(!m.target_reached());
        for _ in 0..5 {
            m.homing(RUN | control_bits::START_HOMING);
        }
        assert_eq!(m.homing_phase(), HomingPhase::Attained);
        assert_eq!(m.position(), 0);
        assert!(m.target_reached());
    }

    #[test]
    fn injected_homing_error() {
        let mut m = ProfileMotion::new(0, 100, 3);
        m.fail_next_homing();
        for _ in 0..5 {
            m.homing(RUN | control_bits::START_HOMING);
        }
        assert_eq!(m.homing_phase(), HomingPhase::Failed);
    }

    #[test]
    fn ignored_setpoint_is_never_acknowledged() {
        let mut m = ProfileMotion::new(0, 100, 10);
        m.ignore_setpoints();
        run_ticks(&mut m, SETPOINT, 1000, 10);
        assert!(!m.setpoint_ack());
        assert_eq!(m.position(), 0);
    }

    #[test]
    fn stalled_homing_never_attains() {
        let mut m = ProfileMotion::new(50, 100, 5);
        m.stall_homing();
        for _ in 0..100 {
            m.homing(RUN | control_bits::START_HOMING);
        }
        assert!(matches!(m.homing_phase(), HomingPhase::Running { .. }));
        assert!(!m.target_reached());
    }
}
