//! Periodic process-data frames of one drive.
//!
//! Positions here are raw drive increments; scaling to user units happens
//! in the controller through the family profile.

use static_assertions::{assert_impl_all, const_assert_eq};

/// One drive's slice of the cyclic input image (TxPDO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct InputFrame {
    pub actual_position: i32,
    pub actual_velocity: i32,
    /// Manufacturer status register (limit switches, brake on ACCELNET).
    pub manufacturer_status: u32,
    pub status_word: u16,
    pub error_code: u16,
    pub digital_inputs: u16,
    pub digital_outputs: u16,
    pub actual_torque: i16,
    pub mode_display: i8,
    pub error_register: u8,
}

const_assert_eq!(core::mem::size_of::<InputFrame>(), 24);

/// One drive's slice of the cyclic output image (RxPDO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct OutputFrame {
    pub target_position: i32,
    pub profile_velocity: i32,
    pub profile_acceleration: i32,
    pub profile_deceleration: i32,
    pub home_offset: i32,
    pub homing_velocity_fast: i32,
    pub homing_velocity_slow: i32,
    pub homing_method: i16,
    pub control_word: u16,
    pub mode_of_operation: i8,
}

const_assert_eq!(core::mem::size_of::<OutputFrame>(), 36);

assert_impl_all!(InputFrame: Copy, Send, Sync);
assert_impl_all!(OutputFrame: Copy, Send, Sync);
