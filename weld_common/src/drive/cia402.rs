//! CiA 402 device state machine encodings.
//!
//! The device state is never stored. It is derived every time from the
//! masked status word, so feeding the same word twice yields the same state.

use serde::{Deserialize, Serialize};

/// Status-word bits, after family normalisation.
pub mod status_bits {
    pub const READY_TO_SWITCH_ON: u16 = 0x0001;
    pub const SWITCHED_ON: u16 = 0x0002;
    pub const OPERATION_ENABLED: u16 = 0x0004;
    pub const FAULT: u16 = 0x0008;
    pub const VOLTAGE_ENABLED: u16 = 0x0010;
    pub const QUICK_STOP: u16 = 0x0020;
    pub const SWITCH_ON_DISABLED: u16 = 0x0040;
    pub const WARNING: u16 = 0x0080;
    /// Axis is moving (normalised from the family-specific bit).
    pub const MOVING: u16 = 0x0100;
    pub const REMOTE: u16 = 0x0200;
    pub const TARGET_REACHED: u16 = 0x0400;
    pub const INTERNAL_LIMIT: u16 = 0x0800;
    /// Profile position: set-point acknowledge.
    pub const SETPOINT_ACK: u16 = 0x1000;
    /// Homing: homing attained (same bit as `SETPOINT_ACK`).
    pub const HOMING_ATTAINED: u16 = 0x1000;
    /// Profile position: following error.
    pub const FOLLOWING_ERROR: u16 = 0x2000;
    /// Homing: homing error (same bit as `FOLLOWING_ERROR`).
    pub const HOMING_ERROR: u16 = 0x2000;
    /// Trajectory aborted (normalised from the family-specific bit).
    pub const TRAJECTORY_ABORTED: u16 = 0x8000;

    /// Bits that determine the device state.
    pub const STATE_MASK: u16 = 0x006F;
}

/// Control-word bits beyond the state-machine commands.
pub mod control_bits {
    pub const SWITCH_ON: u16 = 0x0001;
    pub const ENABLE_VOLTAGE: u16 = 0x0002;
    pub const QUICK_STOP: u16 = 0x0004;
    pub const ENABLE_OPERATION: u16 = 0x0008;
    /// Profile position: new set-point.
    pub const NEW_SETPOINT: u16 = 0x0010;
    /// Homing: start homing (same bit as `NEW_SETPOINT`).
    pub const START_HOMING: u16 = 0x0010;
    pub const CHANGE_IMMEDIATELY: u16 = 0x0020;
    pub const RELATIVE: u16 = 0x0040;
    pub const FAULT_RESET: u16 = 0x0080;
    pub const HALT: u16 = 0x0100;
}

/// CiA 402 device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DriveState {
    #[default]
    NotReadyToSwitchOn = 0,
    SwitchOnDisabled = 1,
    ReadyToSwitchOn = 2,
    SwitchedOn = 3,
    OperationEnabled = 4,
    QuickStopActive = 5,
    FaultReactionActive = 6,
    Fault = 7,
}

impl DriveState {
    /// Derive the state from a (normalised) status word.
    ///
    /// Unrecognised bit patterns map to `NotReadyToSwitchOn`.
    pub const fn from_status_word(status_word: u16) -> Self {
        match status_word & status_bits::STATE_MASK {
            0x0040 => Self::SwitchOnDisabled,
            0x0021 => Self::ReadyToSwitchOn,
            0x0023 => Self::SwitchedOn,
            0x0027 => Self::OperationEnabled,
            0x0007 => Self::QuickStopActive,
            0x000F => Self::FaultReactionActive,
            0x0008 => Self::Fault,
            _ => Self::NotReadyToSwitchOn,
        }
    }

    /// Canonical status word for this state (state bits only).
    pub const fn status_pattern(self) -> u16 {
        match self {
            Self::NotReadyToSwitchOn => 0x0000,
            Self::SwitchOnDisabled => 0x0040,
            Self::ReadyToSwitchOn => 0x0021,
            Self::SwitchedOn => 0x0023,
            Self::OperationEnabled => 0x0027,
            Self::QuickStopActive => 0x0007,
            Self::FaultReactionActive => 0x000F,
            Self::Fault => 0x0008,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::SwitchOnDisabled,
            2 => Self::ReadyToSwitchOn,
            3 => Self::SwitchedOn,
            4 => Self::OperationEnabled,
            5 => Self::QuickStopActive,
            6 => Self::FaultReactionActive,
            7 => Self::Fault,
            _ => Self::NotReadyToSwitchOn,
        }
    }

    #[inline]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReactionActive)
    }
}

/// State-machine command encoded into the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveCommand {
    Shutdown,
    SwitchOn,
    EnableOperation,
    DisableVoltage,
    QuickStop,
    DisableOperation,
    /// Rising edge on bit 7. The caller releases the bit after the pulse.
    FaultReset,
}

impl DriveCommand {
    /// Apply the command's bit pattern to the current control word.
    ///
    /// Bits outside the command pattern (set-point, halt, ...) are kept.
    pub const fn apply(self, control_word: u16) -> u16 {
        match self {
            Self::Shutdown => (control_word & !0x0087) | 0x0006,
            Self::SwitchOn => (control_word & !0x0087) | 0x0007,
            Self::EnableOperation => (control_word & !0x008F) | 0x000F,
            Self::DisableVoltage => control_word & !0x0082,
            Self::QuickStop => (control_word & !0x0086) | 0x0002,
            Self::DisableOperation => (control_word & !0x008F) | 0x0007,
            Self::FaultReset => control_word | control_bits::FAULT_RESET,
        }
    }
}

/// Mode of operation (object 0x6060 / display 0x6061).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationMode {
    #[default]
    NoValidMode,
    ProfilePosition,
    ProfileVelocity,
    Homing,
    CyclicSyncPosition,
    CyclicSyncVelocity,
    CyclicSyncTorque,
}

impl OperationMode {
    pub const fn from_i8(value: i8) -> Self {
        match value {
            1 => Self::ProfilePosition,
            3 => Self::ProfileVelocity,
            6 => Self::Homing,
            8 => Self::CyclicSyncPosition,
            9 => Self::CyclicSyncVelocity,
            10 => Self::CyclicSyncTorque,
            _ => Self::NoValidMode,
        }
    }

    pub const fn as_i8(self) -> i8 {
        match self {
            Self::NoValidMode => 0,
            Self::ProfilePosition => 1,
            Self::ProfileVelocity => 3,
            Self::Homing => 6,
            Self::CyclicSyncPosition => 8,
            Self::CyclicSyncVelocity => 9,
            Self::CyclicSyncTorque => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [DriveState; 8] = [
        DriveState::NotReadyToSwitchOn,
        DriveState::SwitchOnDisabled,
        DriveState::ReadyToSwitchOn,
        DriveState::SwitchedOn,
        DriveState::OperationEnabled,
        DriveState::QuickStopActive,
        DriveState::FaultReactionActive,
        DriveState::Fault,
    ];

    #[test]
    fn state_from_masked_status_word() {
        assert_eq!(DriveState::from_status_word(0x0250), DriveState::SwitchOnDisabled);
        assert_eq!(DriveState::from_status_word(0x0231), DriveState::ReadyToSwitchOn);
        assert_eq!(DriveState::from_status_word(0x0233), DriveState::SwitchedOn);
        assert_eq!(DriveState::from_status_word(0x1637), DriveState::OperationEnabled);
        assert_eq!(DriveState::from_status_word(0x0218), DriveState::Fault);
        assert_eq!(DriveState::from_status_word(0x0017), DriveState::QuickStopActive);
        assert_eq!(DriveState::from_status_word(0x001F), DriveState::FaultReactionActive);
    }

    #[test]
    fn unknown_pattern_is_not_ready() {
        assert_eq!(DriveState::from_status_word(0x0041), DriveState::NotReadyToSwitchOn);
        assert_eq!(DriveState::from_status_word(0x0000), DriveState::NotReadyToSwitchOn);
    }

    #[test]
    fn derivation_is_idempotent_for_every_word() {
        for word in 0..=u16::MAX {
            assert_eq!(DriveState::from_status_word(word), DriveState::from_status_word(word));
            let state = DriveState::from_status_word(word);
            assert_eq!(DriveState::from_status_word(state.status_pattern()), state);
        }
    }

    #[test]
    fn state_u8_roundtrip() {
        for state in ALL_STATES {
            assert_eq!(DriveState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn command_bit_patterns() {
        assert_eq!(DriveCommand::Shutdown.apply(0), 0x0006);
        assert_eq!(DriveCommand::SwitchOn.apply(0x0006), 0x0007);
        assert_eq!(DriveCommand::EnableOperation.apply(0x0007), 0x000F);
        assert_eq!(DriveCommand::DisableVoltage.apply(0x000F), 0x000D);
        assert_eq!(DriveCommand::QuickStop.apply(0x000F), 0x000B);
        assert_eq!(DriveCommand::DisableOperation.apply(0x000F), 0x0007);
        assert_eq!(DriveCommand::FaultReset.apply(0x0006), 0x0086);
    }

    #[test]
    fn commands_keep_motion_bits() {
        let cw = control_bits::NEW_SETPOINT | control_bits::CHANGE_IMMEDIATELY;
        assert_eq!(DriveCommand::EnableOperation.apply(cw), cw | 0x000F);
        assert_eq!(DriveCommand::Shutdown.apply(cw | 0x0080), cw | 0x0006);
    }

    #[test]
    fn operation_mode_codes() {
        assert_eq!(OperationMode::from_i8(1), OperationMode::ProfilePosition);
        assert_eq!(OperationMode::from_i8(6), OperationMode::Homing);
        assert_eq!(OperationMode::from_i8(-3), OperationMode::NoValidMode);
        assert_eq!(OperationMode::Homing.as_i8(), 6);
        assert_eq!(OperationMode::CyclicSyncTorque.as_i8(), 10);
    }
}
