//! Cyclic controller variant (EPOS4 and unknown families).
//!
//! Facade calls validate, post a request flag carrying their completion
//! ticket and block on the matching event. The [`Dispatcher`] running on the
//! cyclic thread consumes the flags and signals the outcome.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};
use weld_common::axis::status::AxisStatusBits;
use weld_common::axis::types::{AxisErrorCode, HeadMode, PositionKind};
use weld_common::bus::{FrameSink, InputHandler};
use weld_common::consts::{CYCLIC_POSITION_TOLERANCE, FACADE_WAIT};
use weld_common::drive::cia402::status_bits;
use weld_common::drive::family::ControllerVariant;

use super::requests::{RequestFlags, ServiceCommand};
use super::shared::AxisShared;
use super::{AxisController, after_homing_target};
use crate::config::CycleSettings;
use crate::cycle::CyclicTask;
use crate::dispatch::Dispatcher;
use crate::error::AxisError;
use crate::event::{CompletionEvent, EventTicket};
use crate::ingest::{AxisIngest, IngestEdges};
use crate::limits::{LimitCheck, SoftLimitPolicy};

pub struct CyclicController {
    shared: Arc<AxisShared>,
    requests: Arc<RequestFlags>,
    ingest: Arc<AxisIngest>,
    task: Mutex<Option<CyclicTask>>,
}

impl CyclicController {
    /// Build the controller and start its cyclic thread.
    pub fn start(
        shared: Arc<AxisShared>,
        cycle: &CycleSettings,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self, AxisError> {
        let requests = Arc::new(RequestFlags::new());
        let ingest = Arc::new(AxisIngest::new(
            Arc::clone(&shared),
            ControllerVariant::Cyclic,
            Arc::new(IngestEdges::new()),
        ));
        let mut dispatcher = Dispatcher::new(Arc::clone(&shared), Arc::clone(&requests), sink);
        let name = format!("axis-{}", shared.tag());
        let task = CyclicTask::spawn(&name, cycle, move |_| {
            dispatcher.tick();
        })?;
        Ok(Self {
            shared,
            requests,
            ingest,
            task: Mutex::new(Some(task)),
        })
    }

    fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(CyclicTask::is_running)
    }

    /// Block on `ticket` and fold in the fault state at return time.
    fn await_outcome(&self, event: &CompletionEvent, ticket: EventTicket, what: &str) -> bool {
        let axis = self.shared.tag();
        let outcome = event.wait(ticket, FACADE_WAIT);
        let faulted = self.shared.telemetry.status_word() & status_bits::FAULT != 0;
        match outcome {
            None => {
                error!(%axis, "Axis {axis}: no completion of the {what} request within {FACADE_WAIT:?}");
                false
            }
            Some(ok) => {
                if ok && faulted {
                    warn!(%axis, "Axis {axis}: {what} request completed but the drive reports a fault");
                }
                ok && !faulted
            }
        }
    }

    /// Resolve and clamp a requested target, reporting violated bounds.
    fn checked_target(&self, policy: &SoftLimitPolicy, current: i32, value: i32, kind: PositionKind) -> i32 {
        let shared = &*self.shared;
        let axis = shared.tag();
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
        check.target()
    }
}

impl AxisController for CyclicController {
    fn shared(&self) -> &AxisShared {
        &self.shared
    }

    fn variant(&self) -> ControllerVariant {
        ControllerVariant::Cyclic
    }

    fn input_handler(&self) -> Arc<dyn InputHandler> {
        self.ingest.clone()
    }

    fn request_mode(&self, mode: HeadMode, home: bool, go_to_soft_lower_limit: bool) -> bool {
        let shared = &*self.shared;
        let axis = shared.tag();
        if shared.debug_info() {
            debug!(%axis, ?mode, home, go_to_soft_lower_limit, state = ?shared.telemetry.drive_state(), "request mode");
        }
        if !self.is_running() {
            error!(%axis, "Axis {axis}: cyclic task is not running");
            return false;
        }

        let ticket = shared.mode_event.reset();
        match mode {
            HeadMode::Offline => self.requests.disable.post(Some(ticket)),
            HeadMode::Position if home && shared.identity.homeable => {
                shared.flags.insert(AxisStatusBits::HOME_POS_NOT_OK);
                match after_homing_target(shared, go_to_soft_lower_limit) {
                    Some(target) => self.requests.arm_drive_after_homing(target),
                    None => self.requests.disarm_drive_after_homing(),
                }
                self.requests.homing.post(Some(ticket));
            }
            HeadMode::Position => {
                if home {
                    warn!(%axis, "Axis {axis}: axis cannot be homed, enabling only");
                }
                self.requests.enable.post(Some(ticket));
            }
        }
        self.await_outcome(&shared.mode_event, ticket, "mode")
    }

    fn request_position(&self, value: i32, kind: PositionKind) -> bool {
        let shared = &*self.shared;
        let axis = shared.tag();
        if shared.debug_info() {
            debug!(
                %axis,
                value,
                ?kind,
                mode = shared.telemetry.mode_display(),
                state = ?shared.telemetry.drive_state(),
                "request position"
            );
        }
        if !self.is_running() {
            error!(%axis, "Axis {axis}: cyclic task is not running");
            return false;
        }
        if shared.telemetry.drive_state().is_fault() || shared.flags.contains(AxisStatusBits::GEN_FAULT) {
            error!(%axis, "Axis {axis}: Cannot drive axis, axis is in error state");
            return false;
        }

        let current = shared.telemetry.position();
        let policy = shared.settings.soft_limit_policy(CYCLIC_POSITION_TOLERANCE);
        if policy.out_of_range(current) {
            shared.report_error(AxisErrorCode::LowerLimit, SoftLimitPolicy::resolve(current, value, kind));
            shared.flags.insert(AxisStatusBits::OUT_OF_RANGE);
            error!(%axis, "Axis {axis}: The actual position is out of the software position limits");
            error!(%axis, "Axis {axis}: Please correct software position limits or do homing");
            return false;
        }
        shared.flags.remove(AxisStatusBits::OUT_OF_RANGE);

        let target = self.checked_target(&policy, current, value, kind);
        if policy.already_at(current, target) {
            debug!(%axis, current, target, "already at target");
            shared.observer.on_value_reached(axis, HeadMode::Position, target);
            return true;
        }

        let ticket = shared.position_event.reset();
        self.requests.target.store(target, Ordering::Release);
        self.requests.drive.post(Some(ticket));
        self.await_outcome(&shared.position_event, ticket, "position")
    }

    fn error_code(&self) -> u16 {
        self.shared.telemetry.error_code()
    }

    fn test_fault_reset(&self) {
        self.requests.post_service(ServiceCommand::FaultReset);
    }

    fn test_enable_operation(&self) {
        self.requests.post_service(ServiceCommand::EnableOperation);
    }

    fn test_disable_operation(&self) {
        self.requests.post_service(ServiceCommand::DisableOperation);
    }

    fn shutdown(&self) {
        if let Some(mut task) = self.task.lock().take() {
            task.stop();
        }
    }
}

impl Drop for CyclicController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
