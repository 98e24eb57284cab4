//! Prelude module for common re-exports.
//!
//! ```rust
//! use weld_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{CYCLE_TIME_US, FACADE_WAIT, HANDSHAKE_TIMEOUT_TICKS, MOVE_TIMEOUT_TICKS};

// ─── Axis vocabulary ────────────────────────────────────────────────
pub use crate::axis::config::{AxisConfig, HomingDirection};
pub use crate::axis::status::{AxisStatusBits, ErrorRegister};
pub use crate::axis::types::{
    AxisErrorCode, AxisHeadInfo, AxisIdentity, AxisTag, HeadMode, MotionRequest, PositionKind,
    PostureStatus,
};

// ─── Drive ──────────────────────────────────────────────────────────
pub use crate::drive::cia402::{DriveCommand, DriveState, OperationMode};
pub use crate::drive::family::{ControllerVariant, DriveFamily, FamilyProfile};
pub use crate::drive::frame::{InputFrame, OutputFrame};

// ─── Fieldbus ───────────────────────────────────────────────────────
pub use crate::bus::{BusError, DeviceAddress, FrameSink, InputHandler};
