//! Per-tick dispatcher of the cyclic controller variant.
//!
//! One [`Dispatcher::tick`] runs in three phases:
//!
//! 1. **Read**: capture telemetry once and report fault, error-code and
//!    error-register transitions.
//! 2. **Process**: finish a running fault-reset pulse, apply a pending
//!    service command, cancel motion when a disable is pending, then tick
//!    Enable → Disable → Position → Homing.
//! 3. **Write**: build exactly one output frame and hand it to the sink.
//!
//! The dispatcher owns all procedure state and is only ever touched by the
//! cyclic thread.

use std::sync::Arc;
use tracing::{error, info, warn};
use weld_common::axis::status::{AxisStatusBits, DriveDiagnosis, ErrorRegister};
use weld_common::axis::types::PostureStatus;
use weld_common::bus::FrameSink;
use weld_common::drive::cia402::{DriveState, status_bits};
use weld_common::drive::frame::OutputFrame;

use crate::controller::requests::RequestFlags;
use crate::controller::shared::AxisShared;
use crate::procedure::{
    DisableProcedure, DriveChannel, EnableProcedure, HomingProcedure, PositionProcedure,
    ProcedureEnv, TickContext, complete,
};

// ─── Transition Monitor ─────────────────────────────────────────────

/// Previous-tick values for transition reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionMonitor {
    prev_state: DriveState,
    prev_error_code: u16,
    prev_error_register: u8,
}

impl TransitionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report what changed since the previous tick. Logs once per change.
    pub fn observe(&mut self, shared: &AxisShared, ctx: &TickContext) {
        let axis = shared.tag();

        if ctx.state == DriveState::Fault && self.prev_state != DriveState::Fault {
            let cause = fault_cause(ctx.status_word);
            shared.set_posture(PostureStatus::Offline);
            shared.flags.insert(AxisStatusBits::GEN_FAULT);
            error!(%axis, fatal = true, "Axis {axis} reports a {cause}");
        }
        self.prev_state = ctx.state;

        let code = shared.telemetry.error_code();
        if code != self.prev_error_code {
            let diagnosis = DriveDiagnosis::classify(code);
            match diagnosis {
                DriveDiagnosis::Cleared => info!(%axis, "Axis {axis}: drive error cleared"),
                _ => error!(
                    %axis,
                    code = format_args!("{code:#06x}"),
                    "Axis {axis}: drive error: {diagnosis}"
                ),
            }
            if let Some(flag) = diagnosis.status_flag() {
                shared.flags.insert(flag);
            }
            self.prev_error_code = code;
        }

        let register = shared.telemetry.error_register();
        if register != self.prev_error_register {
            let raised = ErrorRegister::from_bits_truncate(register & !self.prev_error_register);
            for bit in raised.iter() {
                warn!(%axis, "Axis {axis}: error register: {}", ErrorRegister::describe(bit));
            }
            self.prev_error_register = register;
        }
    }
}

/// Fault class from the status word bits accompanying FAULT.
pub(crate) fn fault_cause(status_word: u16) -> &'static str {
    if status_word & status_bits::TRAJECTORY_ABORTED != 0 {
        "movement error"
    } else if status_word & status_bits::FOLLOWING_ERROR != 0 {
        "following error"
    } else {
        "general error"
    }
}

// ─── Frame Writer ───────────────────────────────────────────────────

/// Hands output frames to the sink, logging failures once per transition.
pub(crate) struct FrameWriter {
    sink: Arc<dyn FrameSink>,
    failed: bool,
}

impl FrameWriter {
    pub(crate) fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self { sink, failed: false }
    }

    pub(crate) fn write(&mut self, shared: &AxisShared, frame: &OutputFrame) {
        match self.sink.write_output(shared.identity.address, frame) {
            Ok(()) if self.failed => {
                info!(axis = %shared.tag(), "output frames delivered again");
                self.failed = false;
            }
            Ok(()) => {}
            Err(e) if !self.failed => {
                warn!(axis = %shared.tag(), "failed to write output frame: {e}");
                self.failed = true;
            }
            Err(_) => {}
        }
    }
}

// ─── Dispatcher ─────────────────────────────────────────────────────

pub struct Dispatcher {
    shared: Arc<AxisShared>,
    requests: Arc<RequestFlags>,
    writer: FrameWriter,
    channel: DriveChannel,
    enable: EnableProcedure,
    disable: DisableProcedure,
    position: PositionProcedure,
    homing: HomingProcedure,
    monitor: TransitionMonitor,
}

impl Dispatcher {
    pub fn new(shared: Arc<AxisShared>, requests: Arc<RequestFlags>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            shared,
            requests,
            writer: FrameWriter::new(sink),
            channel: DriveChannel::new(),
            enable: EnableProcedure::new(),
            disable: DisableProcedure::new(),
            position: PositionProcedure::new(),
            homing: HomingProcedure::new(),
            monitor: TransitionMonitor::new(),
        }
    }

    pub fn channel(&self) -> &DriveChannel {
        &self.channel
    }

    pub fn enable(&self) -> &EnableProcedure {
        &self.enable
    }

    pub fn position(&self) -> &PositionProcedure {
        &self.position
    }

    pub fn homing(&self) -> &HomingProcedure {
        &self.homing
    }

    /// Run one cycle and return the frame that was written.
    pub fn tick(&mut self) -> OutputFrame {
        let shared = &*self.shared;

        // ═══ READ PHASE ═══
        let ctx = TickContext::capture(shared);
        self.monitor.observe(shared, &ctx);

        // ═══ PROCESS PHASE ═══
        self.channel.advance(&shared.flags);
        if let Some(command) = self.requests.take_service() {
            info!(axis = %shared.tag(), ?command, "service command");
            self.channel.command(command.drive_command());
        }
        {
            let mut env = ProcedureEnv {
                ctx,
                channel: &mut self.channel,
                shared,
                requests: &self.requests,
            };
            if self.requests.disable.is_pending() {
                const REASON: &str = "cancelled by a disable request";
                self.enable.abort(&mut env, REASON);
                self.position.abort(&mut env, REASON);
                self.homing.abort(&mut env, REASON);
                cancel_queued_motion(&env);
            }
            self.enable.tick(&mut env);
            self.disable.tick(&mut env);
            self.position.tick(&mut env);
            self.homing.tick(&mut env, &self.position);
        }

        // ═══ WRITE PHASE ═══
        let frame = self.channel.frame(shared.profile, &shared.settings.snapshot());
        self.writer.write(shared, &frame);
        frame
    }
}

/// Fail motion requests that were posted but not yet taken.
fn cancel_queued_motion(env: &ProcedureEnv<'_>) {
    let requests = env.requests;
    let shared = env.shared;
    if let Some(ticket) = requests.enable.take() {
        complete(&shared.mode_event, ticket, false);
    }
    if let Some(ticket) = requests.homing.take() {
        complete(&shared.mode_event, ticket, false);
    }
    if let Some(ticket) = requests.drive.take() {
        complete(&shared.position_event, ticket, false);
    }
    requests.disarm_drive_after_homing();
}
