//! Timing and tolerance constants shared by both controller variants.
//!
//! Tick counts assume the nominal 1 ms dispatch period.

use std::time::Duration;

/// Dispatch period in microseconds (1 kHz).
pub const CYCLE_TIME_US: u64 = 1000;

/// Timeout for a single state-machine handshake step (1 s).
pub const HANDSHAKE_TIMEOUT_TICKS: u32 = 1_000;

/// Timeout for the homing start window (device must clear its flags).
pub const HOMING_START_TIMEOUT_TICKS: u32 = 2_000;

/// Timeout for a complete move or homing run (20 s).
pub const MOVE_TIMEOUT_TICKS: u32 = 20_000;

/// Ticks the FaultReset bit is held high before it is released.
pub const FAULT_RESET_PULSE_TICKS: u32 = 5;

/// FaultReset pulse of the legacy enter-operational sequence.
pub const LEGACY_FAULT_RESET_PULSE_TICKS: u32 = 2;

/// Ticks between the two control-word writes of a legacy set-point.
pub const SETPOINT_LATCH_DELAY_TICKS: u32 = 2;

/// Out-of-range / already-at-target tolerance of the cyclic variant (user units).
pub const CYCLIC_POSITION_TOLERANCE: i32 = 3;

/// Out-of-range tolerance of the legacy variant (user units).
pub const LEGACY_POSITION_TOLERANCE: i32 = 2;

/// Upper bound for a blocking facade call.
pub const FACADE_WAIT: Duration = Duration::from_secs(20);

/// Capacity of the legacy variant's request mailbox.
pub const MAILBOX_CAPACITY: usize = 8;

/// Default delay before the cyclic thread starts ticking.
pub const DEFAULT_STARTUP_DELAY_MS: u64 = 2_000;

/// Default SCHED_FIFO priority of the cyclic thread.
pub const DEFAULT_RT_PRIORITY: i32 = 80;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_ordered() {
        assert!(FAULT_RESET_PULSE_TICKS < HANDSHAKE_TIMEOUT_TICKS);
        assert!(HANDSHAKE_TIMEOUT_TICKS < HOMING_START_TIMEOUT_TICKS);
        assert!(HOMING_START_TIMEOUT_TICKS < MOVE_TIMEOUT_TICKS);
    }

    #[test]
    fn facade_wait_covers_a_full_move() {
        let move_budget = Duration::from_micros(CYCLE_TIME_US * u64::from(MOVE_TIMEOUT_TICKS));
        assert!(FACADE_WAIT >= move_budget);
    }
}
