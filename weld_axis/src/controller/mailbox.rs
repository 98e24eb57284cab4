//! Mailbox controller variant (ACCELNET).
//!
//! Facade calls post a [`MailboxEntry`] into a bounded mailbox and block on
//! the matching completion event. The [`LegacySequencer`] on the cyclic
//! thread takes at most one entry per tick and walks the drive through the
//! enter-operational sequence, the optional homing run and set-point moves.
//!
//! # Postures
//!
//! ```text
//! Offline ──Enter──► Pending ──(enable, homing, enable in PP)──► Position
//!    ▲                                                              │
//!    └──────────────────────── Leave / fault ◄──────────────────────┘
//! ```

use heapless::Deque;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use weld_common::axis::status::AxisStatusBits;
use weld_common::axis::types::{AxisErrorCode, HeadMode, PositionKind, PostureStatus};
use weld_common::bus::{FrameSink, InputHandler};
use weld_common::consts::{
    FACADE_WAIT, HANDSHAKE_TIMEOUT_TICKS, LEGACY_FAULT_RESET_PULSE_TICKS, LEGACY_POSITION_TOLERANCE,
    MAILBOX_CAPACITY, MOVE_TIMEOUT_TICKS, SETPOINT_LATCH_DELAY_TICKS,
};
use weld_common::drive::cia402::{DriveCommand, DriveState, OperationMode, control_bits, status_bits};
use weld_common::drive::family::ControllerVariant;
use weld_common::drive::frame::OutputFrame;

use super::requests::ServiceCommand;
use super::shared::AxisShared;
use super::{AxisController, after_homing_target};
use crate::config::CycleSettings;
use crate::cycle::CyclicTask;
use crate::dispatch::FrameWriter;
use crate::error::AxisError;
use crate::event::{CompletionEvent, EventTicket};
use crate::ingest::{AxisIngest, IngestEdges};
use crate::limits::{LimitCheck, SoftLimitPolicy};
use crate::procedure::{DriveChannel, SequenceTracker, TickContext, complete};

const SHUTDOWN: u16 = DriveCommand::Shutdown.apply(0);
const SWITCH_ON: u16 = DriveCommand::SwitchOn.apply(0);
const ENABLE_OPERATION: u16 = DriveCommand::EnableOperation.apply(0);

// ─── Mailbox ────────────────────────────────────────────────────────

/// One request handed from a caller to the cyclic thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxEntry {
    Enter {
        home: bool,
        after_homing: Option<i32>,
        ticket: EventTicket,
    },
    Leave {
        ticket: EventTicket,
    },
    /// Clamped absolute target.
    Drive {
        target: i32,
        ticket: EventTicket,
    },
    Service(ServiceCommand),
}

/// Bounded FIFO of pending requests.
#[derive(Debug, Default)]
pub struct Mailbox {
    queue: Mutex<Deque<MailboxEntry, MAILBOX_CAPACITY>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `entry`; gives it back when the mailbox is full.
    pub fn post(&self, entry: MailboxEntry) -> Result<(), MailboxEntry> {
        self.queue.lock().push_back(entry)
    }

    pub fn take(&self) -> Option<MailboxEntry> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

// ─── Sequencer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LegacyStep {
    Offline = 0,
    WriteMode = 1,
    PulseReset = 2,
    WaitReady = 3,
    WaitSwitchedOn = 4,
    WaitEnabled = 5,
    StartHoming = 10,
    /// Wait for TARGET_REACHED to drop after START_HOMING.
    WaitHomingStarted = 11,
    WaitHomingDone = 12,
    WaitProfileMode = 13,
    /// Position posture, no move running.
    Ready = 20,
    /// EnableOperation|CHANGE_IMMEDIATELY written, NEW_SETPOINT follows.
    Latch = 21,
    WaitReached = 22,
}

impl LegacyStep {
    const fn waiting_for(self) -> &'static str {
        match self {
            Self::WaitReady => "ready to switch on",
            Self::WaitSwitchedOn => "switched on",
            Self::WaitEnabled => "operation enabled",
            Self::WaitHomingStarted => "homing procedure started",
            Self::WaitHomingDone => "homing procedure finished",
            Self::WaitProfileMode => "profile position mode",
            Self::WaitReached => "target reached",
            _ => "step",
        }
    }

    const fn timeout(self) -> u32 {
        match self {
            Self::WaitHomingStarted | Self::WaitHomingDone | Self::WaitReached => MOVE_TIMEOUT_TICKS,
            _ => HANDSHAKE_TIMEOUT_TICKS,
        }
    }

    /// Steps in which a drive fault aborts the sequence. Earlier steps
    /// reset the fault themselves.
    const fn aborts_on_fault(self) -> bool {
        (self as u8) >= (Self::WaitEnabled as u8)
    }
}

pub struct LegacySequencer {
    shared: Arc<AxisShared>,
    mailbox: Arc<Mailbox>,
    edges: Arc<IngestEdges>,
    writer: FrameWriter,
    channel: DriveChannel,
    tracker: SequenceTracker<LegacyStep>,
    target_mode: OperationMode,
    home_pending: bool,
    after_homing: Option<i32>,
    mode_ticket: Option<EventTicket>,
    position_ticket: Option<EventTicket>,
    written_target: Option<i32>,
    /// TARGET_REACHED seen low since the current set-point.
    target_low_seen: bool,
    started: Option<Instant>,
}

impl LegacySequencer {
    pub fn new(
        shared: Arc<AxisShared>,
        mailbox: Arc<Mailbox>,
        edges: Arc<IngestEdges>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            shared,
            mailbox,
            edges,
            writer: FrameWriter::new(sink),
            channel: DriveChannel::new(),
            tracker: SequenceTracker::new(LegacyStep::Offline),
            target_mode: OperationMode::ProfilePosition,
            home_pending: false,
            after_homing: None,
            mode_ticket: None,
            position_ticket: None,
            written_target: None,
            target_low_seen: false,
            started: None,
        }
    }

    pub fn step(&self) -> LegacyStep {
        self.tracker.step
    }

    pub fn channel(&self) -> &DriveChannel {
        &self.channel
    }

    /// Run one cycle and return the frame that was written.
    pub fn tick(&mut self) -> OutputFrame {
        // ═══ READ PHASE ═══
        let ctx = TickContext::capture(&self.shared);

        // ═══ PROCESS PHASE ═══
        self.channel.advance(&self.shared.flags);
        if let Some(entry) = self.mailbox.take() {
            self.accept(entry, &ctx);
        }
        self.run(&ctx);

        // ═══ WRITE PHASE ═══
        let shared = &*self.shared;
        let frame = self.channel.frame(shared.profile, &shared.settings.snapshot());
        self.writer.write(shared, &frame);
        frame
    }

    fn goto(&mut self, step: LegacyStep) {
        if self.shared.debug_info() {
            debug!(axis = %self.shared.tag(), procedure = "legacy", ?step, "goto");
        }
        self.tracker.goto(step);
    }

    fn accept(&mut self, entry: MailboxEntry, ctx: &TickContext) {
        let shared = Arc::clone(&self.shared);
        let axis = shared.tag();
        match entry {
            MailboxEntry::Service(command) => {
                info!(%axis, ?command, "service command");
                self.channel.command(command.drive_command());
            }
            MailboxEntry::Leave { ticket } => {
                self.abort_pending();
                self.channel.set_mode(OperationMode::NoValidMode);
                self.channel.set_control_word(0);
                shared.set_homing_active(false);
                shared.set_posture(PostureStatus::Offline);
                self.written_target = None;
                shared.observer.on_ready(axis, HeadMode::Offline);
                shared.mode_event.signal(ticket, true);
                self.goto(LegacyStep::Offline);
            }
            MailboxEntry::Enter {
                home,
                after_homing,
                ticket,
            } => {
                self.abort_pending();
                self.mode_ticket = Some(ticket);
                self.home_pending = home;
                self.after_homing = after_homing;
                self.target_mode = if home {
                    OperationMode::Homing
                } else {
                    OperationMode::ProfilePosition
                };
                self.written_target = None;
                self.started = Some(Instant::now());
                shared.set_posture(PostureStatus::Pending);
                self.goto(LegacyStep::WriteMode);
            }
            MailboxEntry::Drive { target, ticket } => {
                let positioning = matches!(
                    self.tracker.step,
                    LegacyStep::Ready | LegacyStep::Latch | LegacyStep::WaitReached
                );
                if !positioning || shared.posture() != PostureStatus::Position {
                    error!(%axis, "Axis {axis}: The axis is not in positioning mode");
                    shared.position_event.signal(ticket, false);
                    return;
                }
                if self.position_ticket.is_some() {
                    debug!(%axis, step = ?self.tracker.step, "new target, superseding move");
                }
                complete(&shared.position_event, self.position_ticket.take(), false);
                if self.written_target == Some(target) {
                    self.repeat_target(ticket, ctx);
                } else {
                    self.start_move(target, Some(ticket));
                }
            }
        }
    }

    /// Same absolute target again: report it or wait for it, without a new set-point.
    fn repeat_target(&mut self, ticket: EventTicket, ctx: &TickContext) {
        self.position_ticket = Some(ticket);
        match self.tracker.step {
            LegacyStep::Ready if ctx.has(status_bits::TARGET_REACHED) => self.reached(ctx),
            LegacyStep::Ready => {
                self.target_low_seen = true;
                self.goto(LegacyStep::WaitReached);
            }
            _ => {}
        }
    }

    fn start_move(&mut self, target: i32, ticket: Option<EventTicket>) {
        self.position_ticket = ticket;
        self.written_target = Some(target);
        self.channel.set_target(target);
        self.channel
            .set_control_word(ENABLE_OPERATION | control_bits::CHANGE_IMMEDIATELY);
        self.edges.clear_target_reached_fell();
        self.target_low_seen = false;
        self.started = Some(Instant::now());
        self.goto(LegacyStep::Latch);
    }

    fn run(&mut self, ctx: &TickContext) {
        if ctx.is_fault() && self.tracker.step.aborts_on_fault() {
            self.fault_abort();
            return;
        }

        match self.tracker.step {
            LegacyStep::Offline | LegacyStep::Ready => {}
            LegacyStep::WriteMode => {
                self.channel.set_mode(self.target_mode);
                self.channel.set_control_word(SHUTDOWN);
                self.goto(LegacyStep::PulseReset);
            }
            LegacyStep::PulseReset => {
                if self.tracker.step_cycles < LEGACY_FAULT_RESET_PULSE_TICKS {
                    self.channel.set_control_word(SHUTDOWN | control_bits::FAULT_RESET);
                    self.tracker.tick();
                } else {
                    self.channel.set_control_word(SHUTDOWN);
                    self.goto(LegacyStep::WaitReady);
                }
            }
            LegacyStep::WaitReady => {
                if ctx.state == DriveState::ReadyToSwitchOn {
                    self.channel.set_control_word(SWITCH_ON);
                    self.goto(LegacyStep::WaitSwitchedOn);
                } else {
                    self.wait();
                }
            }
            LegacyStep::WaitSwitchedOn => {
                if ctx.state == DriveState::SwitchedOn {
                    self.channel.set_control_word(ENABLE_OPERATION);
                    self.goto(LegacyStep::WaitEnabled);
                } else {
                    self.wait();
                }
            }
            LegacyStep::WaitEnabled => {
                if ctx.state != DriveState::OperationEnabled {
                    self.wait();
                } else if self.home_pending {
                    self.goto(LegacyStep::StartHoming);
                } else {
                    self.goto(LegacyStep::WaitProfileMode);
                }
            }
            LegacyStep::StartHoming => {
                self.shared.set_homing_active(true);
                self.edges.clear_target_reached_fell();
                self.channel.set_bits(control_bits::START_HOMING);
                self.goto(LegacyStep::WaitHomingStarted);
            }
            LegacyStep::WaitHomingStarted => {
                if self.edges.take_target_reached_fell() || !ctx.has(status_bits::TARGET_REACHED) {
                    self.goto(LegacyStep::WaitHomingDone);
                } else {
                    self.wait();
                }
            }
            LegacyStep::WaitHomingDone => {
                if ctx.has(status_bits::HOMING_ERROR) {
                    self.fail_enter("the drive reported a homing error");
                } else if ctx.has(status_bits::TARGET_REACHED | status_bits::HOMING_ATTAINED) {
                    self.homing_done();
                } else {
                    self.wait();
                }
            }
            LegacyStep::WaitProfileMode => {
                if ctx.mode == OperationMode::ProfilePosition {
                    self.enter_position();
                } else {
                    self.wait();
                }
            }
            LegacyStep::Latch => {
                if self.tracker.step_cycles >= SETPOINT_LATCH_DELAY_TICKS {
                    self.channel.set_bits(control_bits::NEW_SETPOINT);
                    self.goto(LegacyStep::WaitReached);
                } else {
                    self.tracker.tick();
                }
            }
            LegacyStep::WaitReached => {
                if self.edges.take_target_reached_fell() || !ctx.has(status_bits::TARGET_REACHED) {
                    self.target_low_seen = true;
                }
                if self.target_low_seen && ctx.has(status_bits::TARGET_REACHED) {
                    self.reached(ctx);
                } else {
                    self.wait();
                }
            }
        }
    }

    fn wait(&mut self) {
        self.tracker.tick();
        let step = self.tracker.step;
        if !self.tracker.timed_out(step.timeout()) {
            return;
        }
        warn!(axis = %self.shared.tag(), "Timeout while waiting for {}", step.waiting_for());
        match step {
            LegacyStep::WaitReached => {
                let axis = self.shared.tag();
                error!(%axis, "Axis {axis}: There is a timeout while driving the axis");
                self.started = None;
                complete(&self.shared.position_event, self.position_ticket.take(), false);
                self.goto(LegacyStep::Ready);
            }
            LegacyStep::WaitHomingStarted | LegacyStep::WaitHomingDone => {
                self.fail_enter("There is a timeout while homing the axis");
            }
            _ => self.fail_enter("There is a timeout while enabling the axis"),
        }
    }

    fn homing_done(&mut self) {
        let shared = &self.shared;
        info!(axis = %shared.tag(), "homing attained");
        self.channel.clear_bits(control_bits::START_HOMING);
        shared.flags.remove(AxisStatusBits::HOME_POS_NOT_OK);
        shared.set_homing_active(false);
        self.home_pending = false;
        self.target_mode = OperationMode::ProfilePosition;
        self.goto(LegacyStep::WriteMode);
    }

    fn enter_position(&mut self) {
        let shared = Arc::clone(&self.shared);
        let axis = shared.tag();
        shared.set_posture(PostureStatus::Position);
        if let Some(started) = self.started.take() {
            debug!(%axis, enable_ms = started.elapsed().as_millis() as u64, "positioning mode active");
        }
        shared.observer.on_ready(axis, HeadMode::Position);
        complete(&shared.mode_event, self.mode_ticket.take(), true);
        self.goto(LegacyStep::Ready);
        if let Some(target) = self.after_homing.take() {
            debug!(%axis, target, "drive after homing");
            self.start_move(target, None);
        }
    }

    fn reached(&mut self, ctx: &TickContext) {
        let shared = Arc::clone(&self.shared);
        shared
            .observer
            .on_value_reached(shared.tag(), HeadMode::Position, ctx.position);
        complete(&shared.position_event, self.position_ticket.take(), true);
        if let Some(started) = self.started.take() {
            debug!(axis = %shared.tag(), drive_ms = started.elapsed().as_millis() as u64, "drive time");
        }
        self.goto(LegacyStep::Ready);
    }

    fn fail_enter(&mut self, reason: &str) {
        let shared = Arc::clone(&self.shared);
        let axis = shared.tag();
        error!(%axis, step = ?self.tracker.step, "Axis {axis}: {reason}");
        if self.home_pending || shared.homing_active() {
            shared.flags.insert(AxisStatusBits::HOME_POS_NOT_OK);
        }
        shared.set_homing_active(false);
        self.channel.clear_bits(control_bits::START_HOMING);
        self.home_pending = false;
        self.after_homing = None;
        self.started = None;
        shared.set_posture(PostureStatus::Offline);
        complete(&shared.mode_event, self.mode_ticket.take(), false);
        self.goto(LegacyStep::Offline);
    }

    fn fault_abort(&mut self) {
        let shared = Arc::clone(&self.shared);
        error!(axis = %shared.tag(), step = ?self.tracker.step, "Axis {}: sequence aborted by a drive fault", shared.tag());
        if self.home_pending {
            shared.flags.insert(AxisStatusBits::HOME_POS_NOT_OK);
        }
        shared.set_homing_active(false);
        self.channel.clear_bits(control_bits::START_HOMING | control_bits::NEW_SETPOINT);
        self.home_pending = false;
        self.after_homing = None;
        self.written_target = None;
        self.started = None;
        shared.set_posture(PostureStatus::Offline);
        self.abort_pending();
        self.goto(LegacyStep::Offline);
    }

    /// Fail whatever a caller is still waiting for.
    fn abort_pending(&mut self) {
        complete(&self.shared.mode_event, self.mode_ticket.take(), false);
        complete(&self.shared.position_event, self.position_ticket.take(), false);
    }
}

// ─── Controller ─────────────────────────────────────────────────────

pub struct MailboxController {
    shared: Arc<AxisShared>,
    mailbox: Arc<Mailbox>,
    ingest: Arc<AxisIngest>,
    task: Mutex<Option<CyclicTask>>,
}

impl MailboxController {
    /// Build the controller and start its cyclic thread.
    pub fn start(
        shared: Arc<AxisShared>,
        cycle: &CycleSettings,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self, AxisError> {
        let mailbox = Arc::new(Mailbox::new());
        let edges = Arc::new(IngestEdges::new());
        let ingest = Arc::new(AxisIngest::new(
            Arc::clone(&shared),
            ControllerVariant::Mailbox,
            Arc::clone(&edges),
        ));
        let mut sequencer = LegacySequencer::new(Arc::clone(&shared), Arc::clone(&mailbox), edges, sink);
        let name = format!("axis-{}", shared.tag());
        let task = CyclicTask::spawn(&name, cycle, move |_| {
            sequencer.tick();
        })?;
        Ok(Self {
            shared,
            mailbox,
            ingest,
            task: Mutex::new(Some(task)),
        })
    }

    fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(CyclicTask::is_running)
    }

    fn post(&self, entry: MailboxEntry) -> bool {
        match self.mailbox.post(entry) {
            Ok(()) => true,
            Err(entry) => {
                let axis = self.shared.tag();
                error!(%axis, ?entry, "Axis {axis}: request mailbox is full");
                false
            }
        }
    }

    fn await_outcome(&self, event: &CompletionEvent, ticket: EventTicket, what: &str) -> bool {
        let axis = self.shared.tag();
        let outcome = event.wait(ticket, FACADE_WAIT);
        let faulted = self.shared.telemetry.status_word() & status_bits::FAULT != 0;
        match outcome {
            None => {
                error!(%axis, "Axis {axis}: no completion of the {what} request within {FACADE_WAIT:?}");
                false
            }
            Some(ok) => ok && !faulted,
        }
    }
}

impl AxisController for MailboxController {
    fn shared(&self) -> &AxisShared {
        &self.shared
    }

    fn variant(&self) -> ControllerVariant {
        ControllerVariant::Mailbox
    }

    fn input_handler(&self) -> Arc<dyn InputHandler> {
        self.ingest.clone()
    }

    fn request_mode(&self, mode: HeadMode, home: bool, go_to_soft_lower_limit: bool) -> bool {
        let shared = &*self.shared;
        let axis = shared.tag();
        if shared.debug_info() {
            debug!(%axis, ?mode, home, go_to_soft_lower_limit, "request mode");
        }
        if !self.is_running() {
            error!(%axis, "Axis {axis}: cyclic task is not running");
            return false;
        }

        let ticket = shared.mode_event.reset();
        let entry = match mode {
            HeadMode::Offline => MailboxEntry::Leave { ticket },
            HeadMode::Position => {
                if home && !shared.identity.homeable {
                    warn!(%axis, "Axis {axis}: axis cannot be homed, enabling only");
                }
                let home = home && shared.identity.homeable;
                let after_homing = if home {
                    shared.flags.insert(AxisStatusBits::HOME_POS_NOT_OK);
                    after_homing_target(shared, go_to_soft_lower_limit)
                } else {
                    None
                };
                MailboxEntry::Enter {
                    home,
                    after_homing,
                    ticket,
                }
            }
        };
        if !self.post(entry) {
            return false;
        }
        self.await_outcome(&shared.mode_event, ticket, "mode")
    }

    fn request_position(&self, value: i32, kind: PositionKind) -> bool {
        let shared = &*self.shared;
        let axis = shared.tag();
        let mode = shared.telemetry.mode_display();
        if shared.debug_info() {
            debug!(%axis, value, ?kind, mode, posture = ?shared.posture(), "request position");
        }
        if !self.is_running() {
            error!(%axis, "Axis {axis}: cyclic task is not running");
            return false;
        }
        if shared.telemetry.operation_mode() != OperationMode::ProfilePosition
            || shared.posture() != PostureStatus::Position
        {
            shared.report_error(AxisErrorCode::NotInRequestedMode, i32::from(mode));
            error!(%axis, "Axis {axis}: The axis is not in positioning mode");
            return false;
        }

        let current = shared.telemetry.position();
        let policy = shared.settings.soft_limit_policy(LEGACY_POSITION_TOLERANCE);
        if policy.out_of_range(current) {
            shared.report_error(AxisErrorCode::LowerLimit, SoftLimitPolicy::resolve(current, value, kind));
            shared.flags.insert(AxisStatusBits::OUT_OF_RANGE);
            error!(%axis, "Axis {axis}: The actual position is out of the software position limits");
            error!(%axis, "Axis {axis}: Please correct software position limits or do homing");
            return false;
        }
        shared.flags.remove(AxisStatusBits::OUT_OF_RANGE);

        let check = policy.clamp(SoftLimitPolicy::resolve(current, value, kind));
        match check {
            LimitCheck::ClampedLower(target) => {
                shared.report_error(AxisErrorCode::LowerLimit, target);
                error!(%axis, "Axis {axis}: The new position is limited to the lower software position limit");
            }
            LimitCheck::ClampedUpper(target) => {
                shared.report_error(AxisErrorCode::UpperLimit, target);
                error!(%axis, "Axis {axis}: The new position is limited to the upper software position limit");
            }
            LimitCheck::Within(_) => {}
        }
        shared
            .flags
            .set(AxisStatusBits::SW_LIMIT_NEG, matches!(check, LimitCheck::ClampedLower(_)));
        shared
            .flags
            .set(AxisStatusBits::SW_LIMIT_POS, matches!(check, LimitCheck::ClampedUpper(_)));

        let ticket = shared.position_event.reset();
        if !self.post(MailboxEntry::Drive {
            target: check.target(),
            ticket,
        }) {
            return false;
        }
        self.await_outcome(&shared.position_event, ticket, "position")
    }

    /// Error register; the legacy drives report no error code.
    fn error_code(&self) -> u16 {
        u16::from(self.shared.telemetry.error_register())
    }

    fn test_fault_reset(&self) {
        self.post(MailboxEntry::Service(ServiceCommand::FaultReset));
    }

    fn test_enable_operation(&self) {
        self.post(MailboxEntry::Service(ServiceCommand::EnableOperation));
    }

    fn test_disable_operation(&self) {
        self.post(MailboxEntry::Service(ServiceCommand::DisableOperation));
    }

    fn shutdown(&self) {
        if let Some(mut task) = self.task.lock().take() {
            task.stop();
        }
    }
}

impl Drop for MailboxController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{AxisEvent, RecordingObserver};
    use crate::sampling::NullSampleSink;
    use std::time::Duration;
    use weld_common::axis::config::AxisConfig;
    use weld_common::axis::types::{AxisIdentity, AxisTag};
    use weld_common::bus::DeviceAddress;
    use weld_common::drive::family::{PRODUCT_ACCELNET, VENDOR_COPLEY};
    use weld_hal::simulation::{FaultCause, SimBus, SimDrive, SimDriveConfig};

    const ADDR: DeviceAddress = DeviceAddress::new(VENDOR_COPLEY, PRODUCT_ACCELNET, 0);

    struct Rig {
        bus: Arc<SimBus>,
        shared: Arc<AxisShared>,
        mailbox: Arc<Mailbox>,
        observer: Arc<RecordingObserver>,
        sequencer: LegacySequencer,
    }

    impl Rig {
        fn new() -> Self {
            let bus = Arc::new(SimBus::new());
            bus.attach(SimDrive::new(SimDriveConfig::new(ADDR)));

            let observer = Arc::new(RecordingObserver::new());
            let identity = AxisIdentity::new(AxisTag::Y, ADDR, true);
            let shared = Arc::new(AxisShared::new(
                identity,
                AxisConfig::default(),
                observer.clone(),
                Arc::new(NullSampleSink),
                true,
            ));
            let edges = Arc::new(IngestEdges::new());
            let ingest = AxisIngest::new(shared.clone(), ControllerVariant::Mailbox, edges.clone());
            bus.subscribe(ADDR, Arc::new(ingest)).unwrap();
            let mailbox = Arc::new(Mailbox::new());
            let sequencer = LegacySequencer::new(shared.clone(), mailbox.clone(), edges, bus.clone());
            Self {
                bus,
                shared,
                mailbox,
                observer,
                sequencer,
            }
        }

        fn cycle(&mut self) {
            self.sequencer.tick();
            self.bus.tick();
        }

        fn run_until(&mut self, max: usize, mut done: impl FnMut(&Self) -> bool) -> bool {
            for _ in 0..max {
                self.cycle();
                if done(self) {
                    return true;
                }
            }
            false
        }

        fn enter(&mut self, home: bool, after_homing: Option<i32>) -> Option<bool> {
            let ticket = self.shared.mode_event.reset();
            self.mailbox
                .post(MailboxEntry::Enter {
                    home,
                    after_homing,
                    ticket,
                })
                .unwrap();
            self.run_until(500, |r| r.shared.mode_event.is_signaled(ticket));
            self.shared.mode_event.wait(ticket, Duration::ZERO)
        }

        fn drive_to(&mut self, target: i32) -> Option<bool> {
            let ticket = self.shared.position_event.reset();
            self.mailbox.post(MailboxEntry::Drive { target, ticket }).unwrap();
            self.run_until(500, |r| r.shared.position_event.is_signaled(ticket));
            self.shared.position_event.wait(ticket, Duration::ZERO)
        }
    }

    #[test]
    fn mailbox_is_bounded_fifo() {
        let mailbox = Mailbox::new();
        let event = CompletionEvent::new();
        for _ in 0..MAILBOX_CAPACITY {
            let ticket = event.reset();
            mailbox.post(MailboxEntry::Leave { ticket }).unwrap();
        }
        let overflow = MailboxEntry::Service(ServiceCommand::FaultReset);
        assert_eq!(mailbox.post(overflow), Err(overflow));
        assert_eq!(mailbox.len(), MAILBOX_CAPACITY);
        assert!(matches!(mailbox.take(), Some(MailboxEntry::Leave { .. })));
        assert!(mailbox.post(overflow).is_ok());
    }

    #[test]
    fn enter_reaches_position_posture() {
        let mut rig = Rig::new();
        assert_eq!(rig.enter(false, None), Some(true));
        assert_eq!(rig.sequencer.step(), LegacyStep::Ready);
        assert_eq!(rig.shared.posture(), PostureStatus::Position);
        assert_eq!(rig.bus.with_drive(ADDR, |d| d.state()), Some(DriveState::OperationEnabled));
        assert!(
            rig.observer
                .events()
                .contains(&AxisEvent::Ready(AxisTag::Y, HeadMode::Position))
        );
    }

    #[test]
    fn setpoint_written_in_two_phases() {
        let mut rig = Rig::new();
        rig.enter(false, None);
        let ticket = rig.shared.position_event.reset();
        rig.mailbox
            .post(MailboxEntry::Drive { target: 500, ticket })
            .unwrap();

        let first = rig.sequencer.tick();
        rig.bus.tick();
        assert_eq!(first.control_word, ENABLE_OPERATION | control_bits::CHANGE_IMMEDIATELY);
        let second = rig.sequencer.tick();
        rig.bus.tick();
        assert_eq!(second.control_word & control_bits::NEW_SETPOINT, 0);
        let third = rig.sequencer.tick();
        assert_ne!(third.control_word & control_bits::NEW_SETPOINT, 0);
        assert_eq!(rig.sequencer.step(), LegacyStep::WaitReached);
    }

    #[test]
    fn move_reports_value_reached() {
        let mut rig = Rig::new();
        rig.enter(false, None);
        assert_eq!(rig.drive_to(500), Some(true));
        assert_eq!(rig.sequencer.step(), LegacyStep::Ready);
        let reached = rig
            .observer
            .events()
            .into_iter()
            .any(|e| matches!(e, AxisEvent::ValueReached(AxisTag::Y, HeadMode::Position, _)));
        assert!(reached);
    }

    #[test]
    fn repeated_target_reports_immediately() {
        let mut rig = Rig::new();
        rig.enter(false, None);
        assert_eq!(rig.drive_to(500), Some(true));
        rig.observer.clear();

        let ticket = rig.shared.position_event.reset();
        rig.mailbox.post(MailboxEntry::Drive { target: 500, ticket }).unwrap();
        let frame = rig.sequencer.tick();
        assert_eq!(rig.shared.position_event.wait(ticket, Duration::ZERO), Some(true));
        assert_eq!(frame.control_word & control_bits::NEW_SETPOINT, control_bits::NEW_SETPOINT);
        assert_eq!(rig.observer.events().len(), 1);
    }

    #[test]
    fn drive_outside_position_posture_fails() {
        let mut rig = Rig::new();
        assert_eq!(rig.drive_to(500), Some(false));
        assert_eq!(rig.sequencer.step(), LegacyStep::Offline);
    }

    #[test]
    fn homing_then_drive_after_homing() {
        let mut rig = Rig::new();
        rig.shared.flags.insert(AxisStatusBits::HOME_POS_NOT_OK);
        assert_eq!(rig.enter(true, Some(200)), Some(true));
        assert!(!rig.shared.flags.contains(AxisStatusBits::HOME_POS_NOT_OK));
        assert!(!rig.shared.homing_active());
        assert!(rig.run_until(500, |r| r.sequencer.step() == LegacyStep::Ready));
        assert_eq!(rig.sequencer.channel().target(), 200);
    }

    #[test]
    fn homing_error_fails_enter() {
        let mut rig = Rig::new();
        rig.shared.flags.insert(AxisStatusBits::HOME_POS_NOT_OK);
        rig.bus.with_drive(ADDR, |d| d.fail_next_homing());
        assert_eq!(rig.enter(true, None), Some(false));
        assert!(rig.shared.flags.contains(AxisStatusBits::HOME_POS_NOT_OK));
        assert_eq!(rig.shared.posture(), PostureStatus::Offline);
    }

    #[test]
    fn fault_during_move_aborts() {
        let mut rig = Rig::new();
        rig.enter(false, None);
        let ticket = rig.shared.position_event.reset();
        rig.mailbox
            .post(MailboxEntry::Drive { target: 5000, ticket })
            .unwrap();
        for _ in 0..5 {
            rig.cycle();
        }
        rig.bus
            .with_drive(ADDR, |d| d.inject_fault(0, FaultCause::TrajectoryAborted));
        assert!(rig.run_until(10, |r| r.shared.position_event.is_signaled(ticket)));
        assert_eq!(rig.shared.position_event.wait(ticket, Duration::ZERO), Some(false));
        assert_eq!(rig.shared.posture(), PostureStatus::Offline);
        assert!(rig.shared.flags.contains(AxisStatusBits::GEN_FAULT));
    }

    #[test]
    fn enter_recovers_from_fault() {
        let mut rig = Rig::new();
        rig.cycle();
        rig.bus.with_drive(ADDR, |d| d.inject_fault(0, FaultCause::General));
        rig.cycle();
        assert_eq!(rig.enter(false, None), Some(true));
        assert!(!rig.shared.flags.contains(AxisStatusBits::GEN_FAULT));
    }

    #[test]
    fn leave_writes_mode_zero() {
        let mut rig = Rig::new();
        rig.enter(false, None);
        let ticket = rig.shared.mode_event.reset();
        rig.mailbox.post(MailboxEntry::Leave { ticket }).unwrap();
        let frame = rig.sequencer.tick();
        assert_eq!(frame.control_word, 0);
        assert_eq!(frame.mode_of_operation, 0);
        assert_eq!(rig.shared.mode_event.wait(ticket, Duration::ZERO), Some(true));
        assert_eq!(rig.shared.posture(), PostureStatus::Offline);
    }
}
