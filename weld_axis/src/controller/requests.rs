//! Request flags posted by the facade and consumed by the cyclic thread.
//!
//! Each slot carries the completion ticket of the caller that posted it so
//! the procedure that consumes the request can signal that exact caller.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU64, Ordering};
use weld_common::drive::cia402::DriveCommand;

use crate::event::EventTicket;

/// One pending request plus the ticket to signal on completion.
#[derive(Debug, Default)]
pub struct RequestSlot {
    pending: AtomicBool,
    ticket: AtomicU64,
}

impl RequestSlot {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            ticket: AtomicU64::new(0),
        }
    }

    /// Post a request. A newer post replaces an unconsumed older one.
    pub fn post(&self, ticket: Option<EventTicket>) {
        self.ticket
            .store(ticket.map_or(0, EventTicket::raw), Ordering::Release);
        self.pending.store(true, Ordering::Release);
    }

    /// Consume the pending request, if any.
    ///
    /// The outer `Option` is the request, the inner one its ticket.
    pub fn take(&self) -> Option<Option<EventTicket>> {
        if self.pending.swap(false, Ordering::AcqRel) {
            Some(EventTicket::from_raw(self.ticket.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Drive command issued directly by a service hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceCommand {
    FaultReset = 1,
    EnableOperation = 2,
    DisableOperation = 3,
}

impl ServiceCommand {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::FaultReset),
            2 => Some(Self::EnableOperation),
            3 => Some(Self::DisableOperation),
            _ => None,
        }
    }

    pub const fn drive_command(self) -> DriveCommand {
        match self {
            Self::FaultReset => DriveCommand::FaultReset,
            Self::EnableOperation => DriveCommand::EnableOperation,
            Self::DisableOperation => DriveCommand::DisableOperation,
        }
    }
}

/// All request slots of one cyclic controller.
#[derive(Debug, Default)]
pub struct RequestFlags {
    pub enable: RequestSlot,
    pub disable: RequestSlot,
    pub homing: RequestSlot,
    pub drive: RequestSlot,
    /// Clamped absolute target of the pending or running move.
    pub target: AtomicI32,
    drive_after_homing: AtomicBool,
    drive_after_homing_target: AtomicI32,
    service: AtomicU8,
}

impl RequestFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> i32 {
        self.target.load(Ordering::Acquire)
    }

    /// Arm a move that runs once homing succeeded.
    pub fn arm_drive_after_homing(&self, target: i32) {
        self.drive_after_homing_target
            .store(target, Ordering::Release);
        self.drive_after_homing.store(true, Ordering::Release);
    }

    pub fn disarm_drive_after_homing(&self) {
        self.drive_after_homing.store(false, Ordering::Release);
    }

    pub fn post_service(&self, command: ServiceCommand) {
        self.service.store(command as u8, Ordering::Release);
    }

    pub fn take_service(&self) -> Option<ServiceCommand> {
        ServiceCommand::from_u8(self.service.swap(0, Ordering::AcqRel))
    }

    /// Consume the armed after-homing target.
    pub fn take_drive_after_homing(&self) -> Option<i32> {
        self.drive_after_homing
            .swap(false, Ordering::AcqRel)
            .then(|| self.drive_after_homing_target.load(Ordering::Acquire))
    }
}
