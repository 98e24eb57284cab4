//! Step procedures run by the cyclic thread.
//!
//! Each procedure is a numbered step machine with a per-step cycle counter.
//! Step state is owned by the cyclic thread only; requests reach it through
//! [`RequestFlags`] and outcomes leave it through completion events and the
//! observer callbacks.
//!
//! # Tick order
//!
//! Enable → Disable → Position → Homing. Within one tick a later procedure
//! sees the control-word and request effects of an earlier one.

pub mod disable;
pub mod enable;
pub mod homing;
pub mod position;

use std::fmt;
use tracing::debug;
use weld_common::axis::config::AxisConfig;
use weld_common::axis::status::AxisStatusBits;
use weld_common::consts::FAULT_RESET_PULSE_TICKS;
use weld_common::drive::cia402::{DriveCommand, DriveState, OperationMode, control_bits};
use weld_common::drive::family::FamilyProfile;
use weld_common::drive::frame::OutputFrame;

use crate::controller::requests::RequestFlags;
use crate::controller::shared::AxisShared;
use crate::event::{CompletionEvent, EventTicket};
use crate::telemetry::StatusFlags;

pub use disable::DisableProcedure;
pub use enable::EnableProcedure;
pub use homing::HomingProcedure;
pub use position::PositionProcedure;

// ─── Sequence Tracker ───────────────────────────────────────────────

/// Current step of a procedure plus cycles spent in it.
#[derive(Debug, Clone, Copy)]
pub struct SequenceTracker<S> {
    pub step: S,
    pub step_cycles: u32,
}

impl<S: Copy + PartialEq> SequenceTracker<S> {
    pub const fn new(step: S) -> Self {
        Self {
            step,
            step_cycles: 0,
        }
    }

    /// Jump to `step`, resetting the timer.
    pub fn goto(&mut self, step: S) {
        self.step = step;
        self.step_cycles = 0;
    }

    /// Tick one cycle.
    pub fn tick(&mut self) {
        self.step_cycles = self.step_cycles.saturating_add(1);
    }

    /// Check if current step has exceeded the given timeout (in cycles).
    pub const fn timed_out(&self, timeout_cycles: u32) -> bool {
        timeout_cycles > 0 && self.step_cycles >= timeout_cycles
    }

    pub fn is(&self, step: S) -> bool {
        self.step == step
    }
}

// ─── Tick Context ───────────────────────────────────────────────────

/// Telemetry captured once at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    pub state: DriveState,
    pub status_word: u16,
    pub mode: OperationMode,
    /// Actual position in user units.
    pub position: i32,
}

impl TickContext {
    pub fn capture(shared: &AxisShared) -> Self {
        let status_word = shared.telemetry.status_word();
        Self {
            state: DriveState::from_status_word(status_word),
            status_word,
            mode: shared.telemetry.operation_mode(),
            position: shared.telemetry.position(),
        }
    }

    #[inline]
    pub const fn has(&self, bits: u16) -> bool {
        self.status_word & bits == bits
    }

    #[inline]
    pub const fn is_fault(&self) -> bool {
        self.state.is_fault()
    }
}

// ─── Drive Channel ──────────────────────────────────────────────────

/// Requested output values, turned into one output frame per tick.
#[derive(Debug, Clone, Default)]
pub struct DriveChannel {
    control_word: u16,
    mode: OperationMode,
    /// Clamped absolute target in user units.
    target: i32,
    fault_reset_ticks: u32,
}

impl DriveChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control_word(&self) -> u16 {
        self.control_word
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    /// Apply a state-machine command.
    ///
    /// `FaultReset` raises bit 7 for a short pulse; [`advance`](Self::advance)
    /// releases it and clears the locally tracked fault flags.
    pub fn command(&mut self, command: DriveCommand) {
        self.control_word = command.apply(self.control_word);
        if command == DriveCommand::FaultReset {
            self.fault_reset_ticks = FAULT_RESET_PULSE_TICKS;
        }
    }

    pub fn set_bits(&mut self, bits: u16) {
        self.control_word |= bits;
    }

    pub fn clear_bits(&mut self, bits: u16) {
        self.control_word &= !bits;
    }

    /// Overwrite the whole control word.
    pub fn set_control_word(&mut self, control_word: u16) {
        self.control_word = control_word;
        if control_word & control_bits::FAULT_RESET == 0 {
            self.fault_reset_ticks = 0;
        }
    }

    pub fn set_mode(&mut self, mode: OperationMode) {
        self.mode = mode;
    }

    pub fn set_target(&mut self, target: i32) {
        self.target = target;
    }

    pub fn fault_reset_pending(&self) -> bool {
        self.fault_reset_ticks > 0
    }

    /// Per-tick housekeeping: finish a running fault-reset pulse.
    pub fn advance(&mut self, flags: &StatusFlags) {
        if self.fault_reset_ticks == 0 {
            return;
        }
        self.fault_reset_ticks -= 1;
        if self.fault_reset_ticks == 0 {
            self.control_word &= !control_bits::FAULT_RESET;
            flags.remove(AxisStatusBits::FAULT_RESET_CLEARS);
        }
    }

    /// Output frame for the current requests.
    pub fn frame(&self, profile: &FamilyProfile, config: &AxisConfig) -> OutputFrame {
        OutputFrame {
            target_position: profile.user_to_raw(self.target),
            profile_velocity: config.velocity,
            profile_acceleration: config.acceleration,
            profile_deceleration: config.deceleration,
            home_offset: profile.user_to_raw(config.home_offset),
            homing_velocity_fast: profile.homing_velocity_fast,
            homing_velocity_slow: profile.homing_velocity_slow,
            homing_method: config.homing_method,
            control_word: self.control_word,
            mode_of_operation: self.mode.as_i8(),
        }
    }
}

// ─── Procedure Environment ──────────────────────────────────────────

/// Everything a procedure may touch during one tick.
pub struct ProcedureEnv<'a> {
    pub ctx: TickContext,
    pub channel: &'a mut DriveChannel,
    pub shared: &'a AxisShared,
    pub requests: &'a RequestFlags,
}

impl ProcedureEnv<'_> {
    /// Move `tracker` to `step`, with a DEBUG line when debug info is on.
    pub fn goto<S>(&self, tracker: &mut SequenceTracker<S>, procedure: &'static str, step: S)
    where
        S: Copy + PartialEq + fmt::Debug,
    {
        if self.shared.debug_info() {
            debug!(axis = %self.shared.tag(), procedure, ?step, "goto");
        }
        tracker.goto(step);
    }
}

/// Signal `ticket` on `event`, ignoring a missing or stale ticket.
pub(crate) fn complete(event: &CompletionEvent, ticket: Option<EventTicket>, outcome: bool) {
    if let Some(ticket) = ticket {
        event.signal(ticket, outcome);
    }
}
