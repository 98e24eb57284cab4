//! Point-to-point move in profile-position mode.
//!
//! Ensures ProfilePosition mode and OperationEnabled, then hands the target
//! to the drive with the two-phase set-point handshake: latch NEW_SETPOINT,
//! wait for the acknowledge, release the latch, wait for the acknowledge to
//! drop, then wait for target reached. A new request restarts the procedure
//! with the new target.

use std::time::Instant;
use tracing::{debug, error, warn};
use weld_common::axis::types::HeadMode;
use weld_common::consts::{HANDSHAKE_TIMEOUT_TICKS, MOVE_TIMEOUT_TICKS};
use weld_common::drive::cia402::{DriveState, OperationMode, control_bits, status_bits};

use super::{ProcedureEnv, SequenceTracker, complete};
use crate::event::EventTicket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PositionStep {
    Idle = 0,
    CheckMode = 1,
    SetMode = 2,
    WaitMode = 3,
    CheckEnabled = 5,
    RequestEnable = 6,
    WaitEnabled = 7,
    NewSetpoint = 10,
    WaitAckHigh = 11,
    ClearSetpoint = 12,
    WaitAckLow = 13,
    WaitTargetReached = 14,
}

impl PositionStep {
    const fn waiting_for(self) -> &'static str {
        match self {
            Self::WaitMode => "Profile Position Mode",
            Self::WaitEnabled => "operation enabled state",
            Self::WaitAckHigh => "setpoint acknowledge high",
            Self::WaitAckLow => "setpoint acknowledge low",
            Self::WaitTargetReached => "target reached",
            _ => "step",
        }
    }

    /// Steps that only make sense while the drive stays OperationEnabled.
    const fn needs_enabled(self) -> bool {
        matches!(
            self,
            Self::NewSetpoint | Self::WaitAckHigh | Self::ClearSetpoint | Self::WaitAckLow | Self::WaitTargetReached
        )
    }
}

const NAME: &str = "position";
const SETPOINT_BITS: u16 = control_bits::NEW_SETPOINT | control_bits::CHANGE_IMMEDIATELY;

pub struct PositionProcedure {
    tracker: SequenceTracker<PositionStep>,
    ticket: Option<EventTicket>,
    started: Option<Instant>,
    moves_started: u32,
    last_outcome: Option<bool>,
}

impl Default for PositionProcedure {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionProcedure {
    pub const fn new() -> Self {
        Self {
            tracker: SequenceTracker::new(PositionStep::Idle),
            ticket: None,
            started: None,
            moves_started: 0,
            last_outcome: None,
        }
    }

    pub fn step(&self) -> PositionStep {
        self.tracker.step
    }

    pub fn is_busy(&self) -> bool {
        !self.tracker.is(PositionStep::Idle)
    }

    /// Number of moves started so far (wrapping).
    pub fn moves_started(&self) -> u32 {
        self.moves_started
    }

    /// Outcome of the last finished move, `None` while one runs.
    pub fn last_outcome(&self) -> Option<bool> {
        self.last_outcome
    }

    pub fn tick(&mut self, env: &mut ProcedureEnv<'_>) {
        if let Some(ticket) = env.requests.drive.take() {
            if self.is_busy() {
                debug!(axis = %env.shared.tag(), step = ?self.tracker.step, "new target, restarting move");
                complete(&env.shared.position_event, self.ticket.take(), false);
            }
            self.start(env, ticket);
            return;
        }
        if self.is_busy() && env.ctx.is_fault() {
            self.fail(env, "the drive reported a fault");
            return;
        }
        if self.tracker.step.needs_enabled() && env.ctx.state != DriveState::OperationEnabled {
            self.fail(env, "the drive left operation enabled during the move");
            return;
        }

        match self.tracker.step {
            PositionStep::Idle => {}
            PositionStep::CheckMode => {
                let next = if env.ctx.mode == OperationMode::ProfilePosition {
                    PositionStep::CheckEnabled
                } else {
                    PositionStep::SetMode
                };
                env.goto(&mut self.tracker, NAME, next);
            }
            PositionStep::SetMode => {
                env.channel.set_mode(OperationMode::ProfilePosition);
                env.goto(&mut self.tracker, NAME, PositionStep::WaitMode);
            }
            PositionStep::WaitMode => {
                if env.ctx.mode == OperationMode::ProfilePosition {
                    env.goto(&mut self.tracker, NAME, PositionStep::CheckEnabled);
                } else {
                    self.wait(env, HANDSHAKE_TIMEOUT_TICKS);
                }
            }
            PositionStep::CheckEnabled => {
                let next = if env.ctx.state == DriveState::OperationEnabled {
                    PositionStep::NewSetpoint
                } else {
                    PositionStep::RequestEnable
                };
                env.goto(&mut self.tracker, NAME, next);
            }
            PositionStep::RequestEnable => {
                env.requests.enable.post(None);
                env.goto(&mut self.tracker, NAME, PositionStep::WaitEnabled);
            }
            PositionStep::WaitEnabled => {
                if env.ctx.state == DriveState::OperationEnabled {
                    env.goto(&mut self.tracker, NAME, PositionStep::NewSetpoint);
                } else {
                    self.wait(env, HANDSHAKE_TIMEOUT_TICKS);
                }
            }
            PositionStep::NewSetpoint => {
                env.channel.set_target(env.requests.target());
                env.channel.clear_bits(control_bits::RELATIVE);
                env.channel.set_bits(SETPOINT_BITS);
                env.goto(&mut self.tracker, NAME, PositionStep::WaitAckHigh);
            }
            PositionStep::WaitAckHigh => {
                if env.ctx.has(status_bits::SETPOINT_ACK) {
                    env.goto(&mut self.tracker, NAME, PositionStep::ClearSetpoint);
                } else {
                    self.wait(env, HANDSHAKE_TIMEOUT_TICKS);
                }
            }
            PositionStep::ClearSetpoint => {
                env.channel.clear_bits(SETPOINT_BITS);
                env.goto(&mut self.tracker, NAME, PositionStep::WaitAckLow);
            }
            PositionStep::WaitAckLow => {
                if !env.ctx.has(status_bits::SETPOINT_ACK) {
                    env.goto(&mut self.tracker, NAME, PositionStep::WaitTargetReached);
                } else {
                    self.wait(env, HANDSHAKE_TIMEOUT_TICKS);
                }
            }
            PositionStep::WaitTargetReached => {
                if env.ctx.has(status_bits::TARGET_REACHED) {
                    self.succeed(env);
                } else {
                    self.wait(env, MOVE_TIMEOUT_TICKS);
                }
            }
        }
    }

    /// Fail a running move, e.g. because the axis is being disabled.
    pub fn abort(&mut self, env: &mut ProcedureEnv<'_>, reason: &str) {
        if self.is_busy() {
            self.fail(env, reason);
        }
    }

    fn start(&mut self, env: &mut ProcedureEnv<'_>, ticket: Option<EventTicket>) {
        self.ticket = ticket;
        self.last_outcome = None;
        if env.ctx.is_fault() {
            error!(axis = %env.shared.tag(), "Cannot drive axis, axis is in error state");
            self.last_outcome = Some(false);
            complete(&env.shared.position_event, self.ticket.take(), false);
            env.goto(&mut self.tracker, NAME, PositionStep::Idle);
            return;
        }
        self.moves_started = self.moves_started.wrapping_add(1);
        self.started = Some(Instant::now());
        // a stale latch would hide the rising edge of the next set-point
        env.channel.clear_bits(SETPOINT_BITS);
        env.goto(&mut self.tracker, NAME, PositionStep::CheckMode);
    }

    fn wait(&mut self, env: &mut ProcedureEnv<'_>, timeout: u32) {
        self.tracker.tick();
        if self.tracker.timed_out(timeout) {
            warn!(axis = %env.shared.tag(), "Timeout while waiting for {}", self.tracker.step.waiting_for());
            self.fail(env, "There is a timeout while driving the axis");
        }
    }

    fn fail(&mut self, env: &mut ProcedureEnv<'_>, reason: &str) {
        let axis = env.shared.tag();
        error!(%axis, step = ?self.tracker.step, "Axis {axis}: {reason}");
        self.last_outcome = Some(false);
        self.started = None;
        env.channel.clear_bits(SETPOINT_BITS);
        complete(&env.shared.position_event, self.ticket.take(), false);
        env.goto(&mut self.tracker, NAME, PositionStep::Idle);
    }

    fn succeed(&mut self, env: &mut ProcedureEnv<'_>) {
        let shared = env.shared;
        shared
            .observer
            .on_value_reached(shared.tag(), HeadMode::Position, env.ctx.position);
        self.last_outcome = Some(true);
        complete(&shared.position_event, self.ticket.take(), true);
        if let Some(started) = self.started.take() {
            debug!(axis = %shared.tag(), drive_ms = started.elapsed().as_millis() as u64, "drive time");
        }
        env.goto(&mut self.tracker, NAME, PositionStep::Idle);
    }
}
