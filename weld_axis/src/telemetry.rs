//! Lock-free axis telemetry.
//!
//! Hot scalars are written only by the ingest path (fieldbus I/O thread)
//! and read by the cyclic thread and callers. Positions are stored in user
//! units, already converted through the family profile.

use std::sync::atomic::{AtomicI8, AtomicI16, AtomicI32, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};
use weld_common::axis::status::AxisStatusBits;
use weld_common::drive::cia402::{DriveState, OperationMode};
use weld_common::drive::family::FamilyProfile;
use weld_common::drive::frame::InputFrame;

/// Latest telemetry of one axis.
#[derive(Debug, Default)]
pub struct AxisTelemetry {
    status_word: AtomicU16,
    mode_display: AtomicI8,
    error_register: AtomicU8,
    error_code: AtomicU16,
    manufacturer_status: AtomicU32,
    position: AtomicI32,
    velocity: AtomicI32,
    torque: AtomicI16,
    digital_inputs: AtomicU16,
    digital_outputs: AtomicU16,
    frames: AtomicU64,
}

impl AxisTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one input frame. Returns the normalised status word.
    pub fn store(&self, profile: &FamilyProfile, frame: &InputFrame) -> u16 {
        let status_word = profile.normalize_status_word(frame.status_word);
        self.status_word.store(status_word, Ordering::Release);
        self.mode_display.store(frame.mode_display, Ordering::Relaxed);
        self.error_register.store(frame.error_register, Ordering::Relaxed);
        self.error_code.store(frame.error_code, Ordering::Relaxed);
        self.manufacturer_status
            .store(frame.manufacturer_status, Ordering::Relaxed);
        self.position
            .store(profile.raw_to_user(frame.actual_position), Ordering::Release);
        self.velocity.store(frame.actual_velocity, Ordering::Relaxed);
        self.torque.store(frame.actual_torque, Ordering::Relaxed);
        self.digital_inputs.store(frame.digital_inputs, Ordering::Relaxed);
        self.digital_outputs.store(frame.digital_outputs, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Release);
        status_word
    }

    #[inline]
    pub fn status_word(&self) -> u16 {
        self.status_word.load(Ordering::Acquire)
    }

    /// Device state derived from the latest status word.
    #[inline]
    pub fn drive_state(&self) -> DriveState {
        DriveState::from_status_word(self.status_word())
    }

    #[inline]
    pub fn mode_display(&self) -> i8 {
        self.mode_display.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn operation_mode(&self) -> OperationMode {
        OperationMode::from_i8(self.mode_display())
    }

    pub fn error_register(&self) -> u8 {
        self.error_register.load(Ordering::Relaxed)
    }

    pub fn error_code(&self) -> u16 {
        self.error_code.load(Ordering::Relaxed)
    }

    pub fn manufacturer_status(&self) -> u32 {
        self.manufacturer_status.load(Ordering::Relaxed)
    }

    /// Actual position in user units.
    #[inline]
    pub fn position(&self) -> i32 {
        self.position.load(Ordering::Acquire)
    }

    pub fn velocity(&self) -> i32 {
        self.velocity.load(Ordering::Relaxed)
    }

    pub fn torque(&self) -> i16 {
        self.torque.load(Ordering::Relaxed)
    }

    pub fn digital_inputs(&self) -> u16 {
        self.digital_inputs.load(Ordering::Relaxed)
    }

    pub fn digital_outputs(&self) -> u16 {
        self.digital_outputs.load(Ordering::Relaxed)
    }

    /// Number of frames ingested so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

/// Derived status flags shared between ingest, cyclic thread and callers.
#[derive(Debug)]
pub struct StatusFlags(AtomicU16);

impl Default for StatusFlags {
    fn default() -> Self {
        Self(AtomicU16::new(AxisStatusBits::default().bits()))
    }
}

impl StatusFlags {
    pub fn get(&self) -> AxisStatusBits {
        AxisStatusBits::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn contains(&self, flags: AxisStatusBits) -> bool {
        self.get().contains(flags)
    }

    pub fn insert(&self, flags: AxisStatusBits) {
        self.0.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn remove(&self, flags: AxisStatusBits) {
        self.0.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn set(&self, flags: AxisStatusBits, on: bool) {
        if on {
            self.insert(flags);
        } else {
            self.remove(flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld_common::drive::family::DriveFamily;

    #[test]
    fn store_scales_and_normalises() {
        let t = AxisTelemetry::new();
        let frame = InputFrame {
            actual_position: 4114,
            status_word: 0x4237,
            mode_display: 1,
            ..InputFrame::default()
        };
        let sw = t.store(DriveFamily::Accelnet.profile(), &frame);
        assert_eq!(t.position(), 1000);
        assert_eq!(sw, 0x0337);
        assert_eq!(t.drive_state(), DriveState::OperationEnabled);
        assert_eq!(t.operation_mode(), OperationMode::ProfilePosition);
        assert_eq!(t.frames(), 1);
    }

    #[test]
    fn status_flags_ops() {
        let f = StatusFlags::default();
        assert!(f.contains(AxisStatusBits::HOME_POS_NOT_OK));
        f.insert(AxisStatusBits::GEN_FAULT | AxisStatusBits::HW_LIMIT_NEG);
        f.remove(AxisStatusBits::FAULT_RESET_CLEARS);
        assert!(!f.contains(AxisStatusBits::GEN_FAULT));
        f.set(AxisStatusBits::OUT_OF_RANGE, true);
        assert!(f.contains(AxisStatusBits::OUT_OF_RANGE));
        f.set(AxisStatusBits::OUT_OF_RANGE, false);
        assert_eq!(f.get(), AxisStatusBits::HOME_POS_NOT_OK);
    }
}
