//! Periodic input ingestion.
//!
//! Runs on the fieldbus I/O thread. Frames addressed to another device are
//! dropped silently. Derived flags are logged once per transition, never on
//! every frame the condition persists.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use tracing::{error, info, trace};
use weld_common::axis::status::AxisStatusBits;
use weld_common::bus::{DeviceAddress, InputHandler};
use weld_common::drive::cia402::status_bits;
use weld_common::drive::family::ControllerVariant;
use weld_common::drive::frame::InputFrame;

use crate::controller::shared::AxisShared;

/// Manufacturer status bits reported by mailbox-variant drives.
pub mod manufacturer_bits {
    pub const LIMIT_POS: u32 = 0x0200;
    pub const LIMIT_NEG: u32 = 0x0400;
    pub const BRAKE_ACTIVE: u32 = 0x4000;
}

/// Digital output bit that reports a closed brake (cyclic variant).
pub const DIGITAL_OUT_BRAKE_CLOSED: u16 = 0x0001;

/// Edge state kept between frames.
#[derive(Debug, Default)]
pub struct IngestEdges {
    prev_status: AtomicU16,
    /// Latched on a falling TARGET_REACHED, cleared by the consumer.
    target_reached_fell: AtomicBool,
}

impl IngestEdges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the falling-edge latch.
    pub fn take_target_reached_fell(&self) -> bool {
        self.target_reached_fell.swap(false, Ordering::AcqRel)
    }

    /// Forget a stale falling edge before a new set-point.
    pub fn clear_target_reached_fell(&self) {
        self.target_reached_fell.store(false, Ordering::Release);
    }
}

pub struct AxisIngest {
    shared: Arc<AxisShared>,
    variant: ControllerVariant,
    edges: Arc<IngestEdges>,
}

impl AxisIngest {
    pub fn new(shared: Arc<AxisShared>, variant: ControllerVariant, edges: Arc<IngestEdges>) -> Self {
        Self {
            shared,
            variant,
            edges,
        }
    }

    /// Ingest one frame addressed to this axis.
    pub fn ingest(&self, frame: &InputFrame) {
        let shared = &self.shared;
        let status = shared.telemetry.store(shared.profile, frame);
        let prev = self.edges.prev_status.swap(status, Ordering::AcqRel);
        trace!(axis = %shared.tag(), status = format_args!("{status:#06x}"), "input frame");

        match self.variant {
            ControllerVariant::Cyclic => {
                let brake_open = frame.digital_outputs & DIGITAL_OUT_BRAKE_CLOSED == 0;
                self.update_flag(AxisStatusBits::BRAKE_OPEN, brake_open, "brake open");
            }
            ControllerVariant::Mailbox => {
                let manu = frame.manufacturer_status;
                let neg = manu & manufacturer_bits::LIMIT_NEG != 0 && !shared.homing_active();
                self.update_flag(AxisStatusBits::HW_LIMIT_NEG, neg, "negative hardware limit switch");
                self.update_flag(
                    AxisStatusBits::HW_LIMIT_POS,
                    manu & manufacturer_bits::LIMIT_POS != 0,
                    "positive hardware limit switch",
                );
                self.update_flag(
                    AxisStatusBits::BRAKE_OPEN,
                    manu & manufacturer_bits::BRAKE_ACTIVE != 0,
                    "brake open",
                );
                self.fault_edges(prev, status);
                if prev & status_bits::TARGET_REACHED != 0 && status & status_bits::TARGET_REACHED == 0 {
                    self.edges.target_reached_fell.store(true, Ordering::Release);
                }
            }
        }
    }

    fn update_flag(&self, flag: AxisStatusBits, on: bool, what: &str) {
        let flags = &self.shared.flags;
        if flags.contains(flag) == on {
            return;
        }
        flags.set(flag, on);
        let axis = self.shared.tag();
        if flag.intersects(AxisStatusBits::HW_LIMIT_NEG | AxisStatusBits::HW_LIMIT_POS) {
            if on {
                error!(%axis, fatal = true, "Axis {axis}: {what} is active");
            } else {
                info!(%axis, "Axis {axis}: {what} released");
            }
        } else {
            info!(%axis, on, "Axis {axis}: {what}");
        }
    }

    fn fault_edges(&self, prev: u16, status: u16) {
        let was = prev & status_bits::FAULT != 0;
        let is = status & status_bits::FAULT != 0;
        let axis = self.shared.tag();
        if is && !was {
            let cause = if status & status_bits::TRAJECTORY_ABORTED != 0 {
                "movement error"
            } else if status & status_bits::FOLLOWING_ERROR != 0 {
                "following error"
            } else {
                "general error"
            };
            self.shared.flags.insert(AxisStatusBits::GEN_FAULT);
            error!(%axis, fatal = true, "Axis {axis} reports a {cause}");
        } else if was && !is {
            self.shared.flags.remove(AxisStatusBits::GEN_FAULT);
            info!(%axis, "Axis {axis}: fault cleared");
        }
    }
}

impl InputHandler for AxisIngest {
    fn on_periodic_input(&self, address: DeviceAddress, frame: &InputFrame) {
        if !self.shared.identity.address.matches(&address) {
            return;
        }
        self.ingest(frame);
    }
}
