//! Disable procedure: take the drive out of OperationEnabled.

use tracing::{error, warn};
use weld_common::axis::types::{HeadMode, PostureStatus};
use weld_common::consts::HANDSHAKE_TIMEOUT_TICKS;
use weld_common::drive::cia402::{DriveCommand, DriveState};

use super::{ProcedureEnv, SequenceTracker, complete};
use crate::event::EventTicket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisableStep {
    Idle = 0,
    Shutdown = 10,
    /// Wait until the drive leaves OperationEnabled.
    WaitDisabled = 11,
}

const NAME: &str = "disable";

pub struct DisableProcedure {
    tracker: SequenceTracker<DisableStep>,
    ticket: Option<EventTicket>,
}

impl Default for DisableProcedure {
    fn default() -> Self {
        Self::new()
    }
}

impl DisableProcedure {
    pub const fn new() -> Self {
        Self {
            tracker: SequenceTracker::new(DisableStep::Idle),
            ticket: None,
        }
    }

    pub fn step(&self) -> DisableStep {
        self.tracker.step
    }

    pub fn tick(&mut self, env: &mut ProcedureEnv<'_>) {
        match self.tracker.step {
            DisableStep::Idle => {
                let Some(ticket) = env.requests.disable.take() else {
                    return;
                };
                if env.ctx.state == DriveState::OperationEnabled {
                    self.ticket = ticket;
                    env.goto(&mut self.tracker, NAME, DisableStep::Shutdown);
                } else {
                    // nothing to wait for
                    env.channel.command(DriveCommand::Shutdown);
                    self.ticket = ticket;
                    self.finish(env);
                }
            }
            DisableStep::Shutdown => {
                env.channel.command(DriveCommand::Shutdown);
                env.goto(&mut self.tracker, NAME, DisableStep::WaitDisabled);
            }
            DisableStep::WaitDisabled => {
                let shared = env.shared;
                if env.ctx.state != DriveState::OperationEnabled {
                    self.finish(env);
                    return;
                }
                self.tracker.tick();
                if self.tracker.timed_out(HANDSHAKE_TIMEOUT_TICKS) {
                    let axis = shared.tag();
                    warn!(%axis, "Timeout while waiting for command disable operation");
                    error!(%axis, "Axis {axis}: There is a timeout while switching off axis");
                    complete(&shared.mode_event, self.ticket.take(), false);
                    env.goto(&mut self.tracker, NAME, DisableStep::Idle);
                }
            }
        }
    }

    fn finish(&mut self, env: &mut ProcedureEnv<'_>) {
        let shared = env.shared;
        shared.set_posture(PostureStatus::Offline);
        shared.observer.on_ready(shared.tag(), HeadMode::Offline);
        complete(&shared.mode_event, self.ticket.take(), true);
        env.goto(&mut self.tracker, NAME, DisableStep::Idle);
    }
}
