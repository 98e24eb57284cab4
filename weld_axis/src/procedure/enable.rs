//! Enable procedure: bring the drive to OperationEnabled.
//!
//! Shutdown → wait ReadyToSwitchOn → SwitchOn → wait SwitchedOn →
//! EnableOperation → wait OperationEnabled. A drive in Fault is first reset,
//! then the sequence restarts from the state the drive settles in.

use tracing::{error, warn};
use weld_common::axis::types::{HeadMode, PostureStatus};
use weld_common::consts::HANDSHAKE_TIMEOUT_TICKS;
use weld_common::drive::cia402::{DriveCommand, DriveState};

use super::{ProcedureEnv, SequenceTracker, complete};
use crate::event::EventTicket;

/// Steps of the enable sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnableStep {
    Idle = 0,
    /// Pulse fault reset.
    FaultReset = 4,
    /// Wait until the drive leaves Fault.
    WaitFaultCleared = 5,
    Shutdown = 10,
    WaitReadyToSwitchOn = 11,
    SwitchOn = 12,
    WaitSwitchedOn = 13,
    EnableOperation = 14,
    WaitOperationEnabled = 15,
}

impl EnableStep {
    const fn waiting_for(self) -> &'static str {
        match self {
            Self::WaitFaultCleared => "reset fault",
            Self::WaitReadyToSwitchOn => "command shutdown",
            Self::WaitSwitchedOn => "command switch on",
            Self::WaitOperationEnabled => "command enable operation",
            _ => "step",
        }
    }
}

const NAME: &str = "enable";

pub struct EnableProcedure {
    tracker: SequenceTracker<EnableStep>,
    ticket: Option<EventTicket>,
}

impl Default for EnableProcedure {
    fn default() -> Self {
        Self::new()
    }
}

impl EnableProcedure {
    pub const fn new() -> Self {
        Self {
            tracker: SequenceTracker::new(EnableStep::Idle),
            ticket: None,
        }
    }

    pub fn step(&self) -> EnableStep {
        self.tracker.step
    }

    pub fn is_idle(&self) -> bool {
        self.tracker.is(EnableStep::Idle)
    }

    pub fn tick(&mut self, env: &mut ProcedureEnv<'_>) {
        if self.is_handshake_wait() && env.ctx.state == DriveState::Fault {
            warn!(axis = %env.shared.tag(), step = ?self.tracker.step, "drive faulted while enabling, resetting");
            env.goto(&mut self.tracker, NAME, EnableStep::FaultReset);
            return;
        }

        match self.tracker.step {
            EnableStep::Idle => {
                if let Some(ticket) = env.requests.enable.take() {
                    self.ticket = ticket;
                    self.evaluate(env);
                }
            }
            EnableStep::FaultReset => {
                env.channel.command(DriveCommand::FaultReset);
                env.goto(&mut self.tracker, NAME, EnableStep::WaitFaultCleared);
            }
            EnableStep::WaitFaultCleared => {
                if env.ctx.state != DriveState::Fault {
                    self.evaluate(env);
                } else {
                    self.wait(env);
                }
            }
            EnableStep::Shutdown => {
                env.channel.command(DriveCommand::Shutdown);
                env.goto(&mut self.tracker, NAME, EnableStep::WaitReadyToSwitchOn);
            }
            EnableStep::WaitReadyToSwitchOn => {
                if env.ctx.state == DriveState::ReadyToSwitchOn {
                    env.goto(&mut self.tracker, NAME, EnableStep::SwitchOn);
                } else {
                    self.wait(env);
                }
            }
            EnableStep::SwitchOn => {
                env.channel.command(DriveCommand::SwitchOn);
                env.goto(&mut self.tracker, NAME, EnableStep::WaitSwitchedOn);
            }
            EnableStep::WaitSwitchedOn => {
                if env.ctx.state == DriveState::SwitchedOn {
                    env.goto(&mut self.tracker, NAME, EnableStep::EnableOperation);
                } else {
                    self.wait(env);
                }
            }
            EnableStep::EnableOperation => {
                env.channel.command(DriveCommand::EnableOperation);
                env.goto(&mut self.tracker, NAME, EnableStep::WaitOperationEnabled);
            }
            EnableStep::WaitOperationEnabled => {
                if env.ctx.state == DriveState::OperationEnabled {
                    self.finish(env);
                } else {
                    self.wait(env);
                }
            }
        }
    }

    /// Stop a running enable sequence and fail its caller.
    pub fn abort(&mut self, env: &mut ProcedureEnv<'_>, reason: &str) {
        if self.is_idle() {
            return;
        }
        let axis = env.shared.tag();
        warn!(%axis, step = ?self.tracker.step, "Axis {axis}: {reason}");
        complete(&env.shared.mode_event, self.ticket.take(), false);
        env.goto(&mut self.tracker, NAME, EnableStep::Idle);
    }

    fn is_handshake_wait(&self) -> bool {
        matches!(
            self.tracker.step,
            EnableStep::WaitReadyToSwitchOn | EnableStep::WaitSwitchedOn | EnableStep::WaitOperationEnabled
        )
    }

    /// Pick the entry step for the current drive state.
    fn evaluate(&mut self, env: &mut ProcedureEnv<'_>) {
        let next = match env.ctx.state {
            DriveState::OperationEnabled => {
                self.finish(env);
                return;
            }
            DriveState::Fault => EnableStep::FaultReset,
            DriveState::ReadyToSwitchOn => EnableStep::SwitchOn,
            DriveState::SwitchedOn => EnableStep::EnableOperation,
            DriveState::SwitchOnDisabled
            | DriveState::NotReadyToSwitchOn
            | DriveState::QuickStopActive
            | DriveState::FaultReactionActive => EnableStep::Shutdown,
        };
        env.goto(&mut self.tracker, NAME, next);
    }

    fn wait(&mut self, env: &mut ProcedureEnv<'_>) {
        self.tracker.tick();
        if self.tracker.timed_out(HANDSHAKE_TIMEOUT_TICKS) {
            let axis = env.shared.tag();
            warn!(%axis, "Timeout while waiting for {}", self.tracker.step.waiting_for());
            error!(%axis, "Axis {axis}: There is a timeout while initializing the axis");
            complete(&env.shared.mode_event, self.ticket.take(), false);
            env.goto(&mut self.tracker, NAME, EnableStep::Idle);
        }
    }

    fn finish(&mut self, env: &mut ProcedureEnv<'_>) {
        let shared = env.shared;
        shared.set_posture(PostureStatus::Position);
        shared.observer.on_ready(shared.tag(), HeadMode::Position);
        complete(&shared.mode_event, self.ticket.take(), true);
        env.goto(&mut self.tracker, NAME, EnableStep::Idle);
    }
}
