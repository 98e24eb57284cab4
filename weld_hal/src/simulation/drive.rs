//! Simulated CiA 402 servo drive.
//!
//! Answers each output frame with an input frame encoded the way the real
//! drive family would encode it, so the controller's normalisation and
//! scaling paths are exercised end to end.

use tracing::{debug, info, warn};
use weld_common::axis::status::ErrorRegister;
use weld_common::bus::DeviceAddress;
use weld_common::drive::cia402::{DriveState, OperationMode, control_bits, status_bits};
use weld_common::drive::family::{DriveFamily, FamilyProfile};
use weld_common::drive::frame::{InputFrame, OutputFrame};

use super::motion::{HomingPhase, ProfileMotion};

/// ACCELNET manufacturer status: negative limit switch.
pub const MANU_STATUS_LIMIT_NEG: u32 = 0x0400;
/// ACCELNET manufacturer status: positive limit switch.
pub const MANU_STATUS_LIMIT_POS: u32 = 0x0200;
/// ACCELNET manufacturer status: brake released.
pub const MANU_STATUS_BRAKE: u32 = 0x4000;
/// Digital output that holds the brake closed (EPOS4).
pub const DIGITAL_OUT_BRAKE_CLOSED: u16 = 0x0001;
pub const DIGITAL_IN_LIMIT_NEG: u16 = 0x0001;
pub const DIGITAL_IN_LIMIT_POS: u16 = 0x0002;

/// Error code raised when a limit switch trips on an EPOS4.
pub const ERROR_LIMIT_NEG: u16 = 0x8A80;
pub const ERROR_LIMIT_POS: u16 = 0x8A81;

/// Cause attached to an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultCause {
    #[default]
    General,
    FollowingError,
    TrajectoryAborted,
}

/// Simulated drive parameters.
#[derive(Debug, Clone)]
pub struct SimDriveConfig {
    pub address: DeviceAddress,
    /// Raw increments travelled per tick at most.
    pub step_per_tick: i32,
    /// Ticks a homing run takes.
    pub homing_ticks: u32,
    pub initial_position: i32,
    /// Raw position at or below which the negative switch is engaged.
    pub lower_switch: Option<i32>,
    /// Raw position at or above which the positive switch is engaged.
    pub upper_switch: Option<i32>,
}

impl SimDriveConfig {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            step_per_tick: 400,
            homing_ticks: 50,
            initial_position: 0,
            lower_switch: None,
            upper_switch: None,
        }
    }
}

/// One simulated drive on the bus.
#[derive(Debug, Clone)]
pub struct SimDrive {
    config: SimDriveConfig,
    profile: &'static FamilyProfile,
    state: DriveState,
    mode_display: i8,
    motion: ProfileMotion,
    fault: Option<FaultCause>,
    error_code: u16,
    error_register: ErrorRegister,
    prev_control_word: u16,
    last_output: OutputFrame,
}

impl SimDrive {
    pub fn new(config: SimDriveConfig) -> Self {
        let family = DriveFamily::detect(config.address.vendor_id, config.address.product_code);
        let motion = ProfileMotion::new(
            config.initial_position,
            config.step_per_tick,
            config.homing_ticks,
        );
        Self {
            profile: family.profile(),
            config,
            state: DriveState::NotReadyToSwitchOn,
            mode_display: 0,
            motion,
            fault: None,
            error_code: 0,
            error_register: ErrorRegister::empty(),
            prev_control_word: 0,
            last_output: OutputFrame::default(),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.config.address
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn raw_position(&self) -> i32 {
        self.motion.position()
    }

    /// Last set-point target accepted by the drive (raw).
    pub fn raw_target(&self) -> i32 {
        self.motion.target()
    }

    /// Last output frame the drive processed.
    pub fn last_output(&self) -> &OutputFrame {
        &self.last_output
    }

    pub fn place_at(&mut self, raw_position: i32) {
        self.motion.set_position(raw_position);
    }

    /// Force the drive into Fault with the given error code.
    pub fn inject_fault(&mut self, error_code: u16, cause: FaultCause) {
        warn!(address = %self.config.address, error_code, ?cause, "injecting drive fault");
        self.state = DriveState::Fault;
        self.fault = Some(cause);
        self.error_code = error_code;
        self.error_register |= ErrorRegister::GENERIC;
        if cause != FaultCause::General {
            self.error_register |= ErrorRegister::MOTION;
        }
        self.motion.hold(self.prev_control_word);
    }

    /// Make the next homing run report a homing error.
    pub fn fail_next_homing(&mut self) {
        self.motion.fail_next_homing();
    }

    /// Keep homing runs going forever.
    pub fn stall_homing(&mut self) {
        self.motion.stall_homing();
    }

    /// Stop acknowledging new set-points.
    pub fn ignore_setpoints(&mut self) {
        self.motion.ignore_setpoints();
    }

    /// Process one output frame and produce the matching input frame.
    pub fn step(&mut self, output: &OutputFrame) -> InputFrame {
        let cw = output.control_word;
        self.last_output = *output;
        self.update_state(cw);
        self.mode_display = output.mode_of_operation;

        if self.state == DriveState::OperationEnabled {
            match OperationMode::from_i8(self.mode_display) {
                OperationMode::ProfilePosition => self.motion.profile_position(cw, output.target_position),
                OperationMode::Homing => self.motion.homing(cw),
                _ => self.motion.hold(cw),
            }
        } else {
            self.motion.hold(cw);
        }

        self.check_limit_switches();
        self.prev_control_word = cw;
        self.compose_input()
    }

    fn update_state(&mut self, cw: u16) {
        let prev = self.prev_control_word;
        let reset_edge = cw & control_bits::FAULT_RESET != 0 && prev & control_bits::FAULT_RESET == 0;

        if self.state == DriveState::Fault {
            if reset_edge {
                info!(address = %self.config.address, "fault reset");
                self.fault = None;
                self.error_code = 0;
                self.error_register = ErrorRegister::empty();
                self.state = DriveState::SwitchOnDisabled;
            }
            return;
        }
        if cw & control_bits::FAULT_RESET != 0 {
            return;
        }

        let next = match self.state {
            DriveState::NotReadyToSwitchOn => DriveState::SwitchOnDisabled,
            DriveState::FaultReactionActive => DriveState::Fault,
            _ if cw & control_bits::ENABLE_VOLTAGE == 0 => DriveState::SwitchOnDisabled,
            s if cw & 0x0006 == 0x0002 => match s {
                DriveState::OperationEnabled | DriveState::QuickStopActive => DriveState::QuickStopActive,
                _ => DriveState::SwitchOnDisabled,
            },
            DriveState::SwitchOnDisabled if cw & 0x0087 == 0x0006 => DriveState::ReadyToSwitchOn,
            DriveState::ReadyToSwitchOn if cw & 0x0087 == 0x0007 => DriveState::SwitchedOn,
            DriveState::SwitchedOn if cw & 0x008F == 0x000F => DriveState::OperationEnabled,
            DriveState::SwitchedOn if cw & 0x0087 == 0x0006 => DriveState::ReadyToSwitchOn,
            DriveState::OperationEnabled if cw & 0x008F == 0x0007 => DriveState::SwitchedOn,
            DriveState::OperationEnabled if cw & 0x0087 == 0x0006 => DriveState::ReadyToSwitchOn,
            DriveState::QuickStopActive if cw & 0x008F == 0x000F => DriveState::OperationEnabled,
            s => s,
        };
        if next != self.state {
            debug!(address = %self.config.address, from = ?self.state, to = ?next, "drive state");
            self.state = next;
        }
    }

    fn limit_switches(&self) -> (bool, bool) {
        let pos = self.motion.position();
        let neg = self.config.lower_switch.is_some_and(|l| pos <= l);
        let posi = self.config.upper_switch.is_some_and(|u| pos >= u);
        (neg, posi)
    }

    fn check_limit_switches(&mut self) {
        if self.profile.family != DriveFamily::Epos4 || self.state == DriveState::Fault {
            return;
        }
        match self.limit_switches() {
            (true, _) if self.motion.is_moving() => self.inject_fault(ERROR_LIMIT_NEG, FaultCause::General),
            (_, true) if self.motion.is_moving() => self.inject_fault(ERROR_LIMIT_POS, FaultCause::General),
            _ => {}
        }
    }

    fn compose_input(&self) -> InputFrame {
        let mut sw = self.state.status_pattern() | status_bits::REMOTE;
        if !matches!(
            self.state,
            DriveState::NotReadyToSwitchOn | DriveState::SwitchOnDisabled
        ) {
            sw |= status_bits::VOLTAGE_ENABLED;
        }
        if self.motion.target_reached() {
            sw |= status_bits::TARGET_REACHED;
        }
        if self.motion.is_moving() {
            sw |= status_bits::MOVING;
        }
        if OperationMode::from_i8(self.mode_display) == OperationMode::Homing {
            match self.motion.homing_phase() {
                HomingPhase::Attained => sw |= status_bits::HOMING_ATTAINED,
                HomingPhase::Failed => sw |= status_bits::HOMING_ERROR,
                _ => {}
            }
        } else if self.motion.setpoint_ack() {
            sw |= status_bits::SETPOINT_ACK;
        }
        match self.fault {
            Some(FaultCause::FollowingError) => sw |= status_bits::FOLLOWING_ERROR,
            Some(FaultCause::TrajectoryAborted) => sw |= status_bits::TRAJECTORY_ABORTED,
            _ => {}
        }

        let (limit_neg, limit_pos) = self.limit_switches();
        let enabled = self.state == DriveState::OperationEnabled;
        let mut digital_inputs = 0;
        if limit_neg {
            digital_inputs |= DIGITAL_IN_LIMIT_NEG;
        }
        if limit_pos {
            digital_inputs |= DIGITAL_IN_LIMIT_POS;
        }

        let (manufacturer_status, digital_outputs) = match self.profile.family {
            DriveFamily::Accelnet => {
                let mut manu = 0;
                if limit_neg {
                    manu |= MANU_STATUS_LIMIT_NEG;
                }
                if limit_pos {
                    manu |= MANU_STATUS_LIMIT_POS;
                }
                if enabled {
                    manu |= MANU_STATUS_BRAKE;
                }
                (manu, 0)
            }
            _ => (0, if enabled { 0 } else { DIGITAL_OUT_BRAKE_CLOSED }),
        };

        InputFrame {
            actual_position: self.motion.position(),
            actual_velocity: self.motion.velocity(),
            manufacturer_status,
            status_word: self.profile.encode_status_word(sw),
            error_code: self.error_code,
            digital_inputs,
            digital_outputs,
            actual_torque: if self.motion.is_moving() { 120 } else { 0 },
            mode_display: self.mode_display,
            error_register: self.error_register.bits(),
        }
    }
}
