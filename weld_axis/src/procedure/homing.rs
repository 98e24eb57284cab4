//! Homing run.
//!
//! Switches to homing mode, ensures OperationEnabled, latches START_HOMING
//! and waits for the drive to report homing attained. Afterwards the drive
//! returns to profile-position mode and, if armed, moves to the position
//! requested for after homing. HomePosNotOK is cleared only on success.

use std::time::Instant;
use tracing::{debug, error, warn};
use weld_common::axis::status::AxisStatusBits;
use weld_common::axis::types::PostureStatus;
use weld_common::consts::{HANDSHAKE_TIMEOUT_TICKS, HOMING_START_TIMEOUT_TICKS, MOVE_TIMEOUT_TICKS};
use weld_common::drive::cia402::{DriveState, OperationMode, control_bits, status_bits};

use super::position::PositionProcedure;
use super::{ProcedureEnv, SequenceTracker, complete};
use crate::event::EventTicket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HomingStep {
    Idle = 0,
    SetMode = 1,
    WaitMode = 2,
    CheckEnabled = 5,
    RequestEnable = 6,
    WaitEnabled = 7,
    StartHoming = 10,
    /// Wait until attained, error and target reached are all low.
    WaitStarted = 11,
    WaitAttained = 12,
    SetProfileMode = 13,
    WaitProfileMode = 14,
    DriveAfterHoming = 15,
    WaitMoveStarted = 16,
    WaitMoveFinished = 17,
}

impl HomingStep {
    const fn waiting_for(self) -> &'static str {
        match self {
            Self::WaitMode => "homing mode",
            Self::WaitEnabled => "operation enabled",
            Self::WaitStarted => "homing procedure started",
            Self::WaitAttained => "homing procedure finished",
            Self::WaitProfileMode => "profile position mode",
            Self::WaitMoveStarted => "movement started",
            Self::WaitMoveFinished => "movement finished",
            _ => "step",
        }
    }

    const fn timeout(self) -> u32 {
        match self {
            Self::WaitStarted => HOMING_START_TIMEOUT_TICKS,
            Self::WaitAttained | Self::WaitMoveFinished => MOVE_TIMEOUT_TICKS,
            _ => HANDSHAKE_TIMEOUT_TICKS,
        }
    }

    const fn needs_enabled(self) -> bool {
        matches!(self, Self::StartHoming | Self::WaitStarted | Self::WaitAttained)
    }
}

const NAME: &str = "homing";
const HOMING_DONE_BITS: u16 =
    status_bits::HOMING_ATTAINED | status_bits::HOMING_ERROR | status_bits::TARGET_REACHED;

pub struct HomingProcedure {
    tracker: SequenceTracker<HomingStep>,
    ticket: Option<EventTicket>,
    started: Option<Instant>,
    /// Move counter of the position procedure when the follow-up move was posted.
    move_mark: u32,
}

impl Default for HomingProcedure {
    fn default() -> Self {
        Self::new()
    }
}

impl HomingProcedure {
    pub const fn new() -> Self {
        Self {
            tracker: SequenceTracker::new(HomingStep::Idle),
            ticket: None,
            started: None,
            move_mark: 0,
        }
    }

    pub fn step(&self) -> HomingStep {
        self.tracker.step
    }

    pub fn is_busy(&self) -> bool {
        !self.tracker.is(HomingStep::Idle)
    }

    pub fn tick(&mut self, env: &mut ProcedureEnv<'_>, position: &PositionProcedure) {
        if self.is_busy() && env.ctx.is_fault() {
            self.fail(env, "the drive reported a fault while homing");
            return;
        }
        if self.tracker.step.needs_enabled() && env.ctx.state != DriveState::OperationEnabled {
            self.fail(env, "the drive left operation enabled while homing");
            return;
        }

        match self.tracker.step {
            HomingStep::Idle => {
                let Some(ticket) = env.requests.homing.take() else {
                    return;
                };
                self.ticket = ticket;
                self.started = Some(Instant::now());
                env.shared.set_homing_active(true);
                let next = if env.ctx.mode == OperationMode::Homing {
                    HomingStep::CheckEnabled
                } else {
                    HomingStep::SetMode
                };
                env.goto(&mut self.tracker, NAME, next);
            }
            HomingStep::SetMode => {
                env.channel.set_mode(OperationMode::Homing);
                env.goto(&mut self.tracker, NAME, HomingStep::WaitMode);
            }
            HomingStep::WaitMode => {
                if env.ctx.mode == OperationMode::Homing {
                    env.goto(&mut self.tracker, NAME, HomingStep::CheckEnabled);
                } else {
                    self.wait(env);
                }
            }
            HomingStep::CheckEnabled => {
                let next = if env.ctx.state == DriveState::OperationEnabled {
                    HomingStep::StartHoming
                } else {
                    HomingStep::RequestEnable
                };
                env.goto(&mut self.tracker, NAME, next);
            }
            HomingStep::RequestEnable => {
                env.requests.enable.post(None);
                env.goto(&mut self.tracker, NAME, HomingStep::WaitEnabled);
            }
            HomingStep::WaitEnabled => {
                if env.ctx.state == DriveState::OperationEnabled {
                    env.goto(&mut self.tracker, NAME, HomingStep::StartHoming);
                } else {
                    self.wait(env);
                }
            }
            HomingStep::StartHoming => {
                env.channel.set_bits(control_bits::START_HOMING);
                env.goto(&mut self.tracker, NAME, HomingStep::WaitStarted);
            }
            HomingStep::WaitStarted => {
                if env.ctx.status_word & HOMING_DONE_BITS == 0 {
                    env.goto(&mut self.tracker, NAME, HomingStep::WaitAttained);
                } else {
                    self.wait(env);
                }
            }
            HomingStep::WaitAttained => {
                if env.ctx.has(status_bits::HOMING_ERROR) {
                    self.fail(env, "the drive reported a homing error");
                } else if env.ctx.has(status_bits::HOMING_ATTAINED) {
                    env.channel.clear_bits(control_bits::START_HOMING);
                    env.goto(&mut self.tracker, NAME, HomingStep::SetProfileMode);
                } else {
                    self.wait(env);
                }
            }
            HomingStep::SetProfileMode => {
                env.channel.set_mode(OperationMode::ProfilePosition);
                env.goto(&mut self.tracker, NAME, HomingStep::WaitProfileMode);
            }
            HomingStep::WaitProfileMode => {
                if env.ctx.mode == OperationMode::ProfilePosition {
                    env.goto(&mut self.tracker, NAME, HomingStep::DriveAfterHoming);
                } else {
                    self.wait(env);
                }
            }
            HomingStep::DriveAfterHoming => match env.requests.take_drive_after_homing() {
                Some(target) => {
                    debug!(axis = %env.shared.tag(), target, "drive after homing");
                    env.requests.target.store(target, std::sync::atomic::Ordering::Release);
                    env.requests.drive.post(None);
                    self.move_mark = position.moves_started();
                    env.goto(&mut self.tracker, NAME, HomingStep::WaitMoveStarted);
                }
                None => self.succeed(env),
            },
            HomingStep::WaitMoveStarted => {
                if position.moves_started() != self.move_mark {
                    env.goto(&mut self.tracker, NAME, HomingStep::WaitMoveFinished);
                } else {
                    self.wait(env);
                }
            }
            HomingStep::WaitMoveFinished => {
                if position.is_busy() {
                    self.wait(env);
                } else if position.last_outcome() == Some(true) {
                    self.succeed(env);
                } else {
                    self.fail(env, "the move after homing failed");
                }
            }
        }
    }

    /// Fail a running homing run; HomePosNotOK stays set.
    pub fn abort(&mut self, env: &mut ProcedureEnv<'_>, reason: &str) {
        if self.is_busy() {
            self.fail(env, reason);
        }
    }

    fn wait(&mut self, env: &mut ProcedureEnv<'_>) {
        self.tracker.tick();
        let step = self.tracker.step;
        if self.tracker.timed_out(step.timeout()) {
            warn!(axis = %env.shared.tag(), "Timeout while waiting for {}", step.waiting_for());
            self.fail(env, "There is a timeout while homing the axis");
        }
    }

    fn fail(&mut self, env: &mut ProcedureEnv<'_>, reason: &str) {
        let shared = env.shared;
        let axis = shared.tag();
        error!(%axis, step = ?self.tracker.step, "Axis {axis}: {reason}");
        shared.flags.insert(AxisStatusBits::HOME_POS_NOT_OK);
        shared.set_homing_active(false);
        env.requests.disarm_drive_after_homing();
        // bit 4 doubles as NEW_SETPOINT once back in profile-position mode
        env.channel.clear_bits(control_bits::START_HOMING);
        self.started = None;
        complete(&shared.mode_event, self.ticket.take(), false);
        env.goto(&mut self.tracker, NAME, HomingStep::Idle);
    }

    fn succeed(&mut self, env: &mut ProcedureEnv<'_>) {
        let shared = env.shared;
        shared.flags.remove(AxisStatusBits::HOME_POS_NOT_OK);
        shared.set_homing_active(false);
        shared.set_posture(PostureStatus::Position);
        if let Some(started) = self.started.take() {
            debug!(axis = %shared.tag(), drive_ms = started.elapsed().as_millis() as u64, "homing time");
        }
        complete(&shared.mode_event, self.ticket.take(), true);
        env.goto(&mut self.tracker, NAME, HomingStep::Idle);
    }
}
