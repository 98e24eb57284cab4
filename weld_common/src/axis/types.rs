//! Axis identity, modes and request types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::axis::status::AxisStatusBits;
use crate::bus::DeviceAddress;
use crate::drive::family::DriveFamily;

/// Which axis of the weld head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AxisTag {
    X,
    Y,
    Z,
}

impl AxisTag {
    pub const ALL: [AxisTag; 3] = [AxisTag::X, AxisTag::Y, AxisTag::Z];

    pub const fn as_char(self) -> char {
        match self {
            Self::X => 'X',
            Self::Y => 'Y',
            Self::Z => 'Z',
        }
    }

    /// Config-store key for a motion-profile value, e.g. `X_Axis_Velocity`.
    pub fn profile_key(self, name: &str) -> String {
        format!("{}_Axis_{name}", self.as_char())
    }

    /// Config-store key for an axis setting, e.g. `AxisX_SoftLowerLimit`.
    pub fn setting_key(self, name: &str) -> String {
        format!("Axis{}_{name}", self.as_char())
    }

    /// Sensor id under which sampled positions of this axis are reported.
    pub const fn position_sensor(self) -> u32 {
        match self {
            Self::X => 0x0201,
            Self::Y => 0x0202,
            Self::Z => 0x0203,
        }
    }
}

impl fmt::Display for AxisTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Immutable identity of one axis controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisIdentity {
    pub tag: AxisTag,
    pub address: DeviceAddress,
    pub family: DriveFamily,
    /// Axis has a reference switch and may be homed.
    pub homeable: bool,
}

impl AxisIdentity {
    /// Build an identity, detecting the family from the device address.
    pub const fn new(tag: AxisTag, address: DeviceAddress, homeable: bool) -> Self {
        Self {
            tag,
            address,
            family: DriveFamily::detect(address.vendor_id, address.product_code),
            homeable,
        }
    }
}

/// Head mode as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HeadMode {
    #[default]
    Offline,
    Position,
}

/// Controller posture reported in the status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PostureStatus {
    #[default]
    Offline = 0,
    Home = 1,
    Position = 2,
    /// A mode change is in progress.
    Pending = 3,
}

impl PostureStatus {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Home,
            2 => Self::Position,
            3 => Self::Pending,
            _ => Self::Offline,
        }
    }
}

/// How a requested position value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PositionKind {
    #[default]
    Absolute,
    Relative,
}

/// A motion request handed from a caller to the cyclic side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionRequest {
    EnterOperational {
        home: bool,
        go_to_soft_lower_limit: bool,
    },
    LeaveOperational,
    DriveTo { value: i32, kind: PositionKind },
}

/// Recoverable control-level errors reported through `on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisErrorCode {
    LowerLimit,
    UpperLimit,
    NotInRequestedMode,
}

impl fmt::Display for AxisErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LowerLimit => "lower limit",
            Self::UpperLimit => "upper limit",
            Self::NotInRequestedMode => "not in requested mode",
        };
        f.write_str(text)
    }
}

/// Point-in-time status snapshot of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisHeadInfo {
    pub tag: AxisTag,
    pub posture: PostureStatus,
    pub status_word: u16,
    pub mode_display: i8,
    /// Drive error code (cyclic variant) or error register (mailbox variant).
    pub error_code: u16,
    pub position: i32,
    pub velocity: i32,
    pub torque: i16,
    pub homing_direction_positive: bool,
    pub soft_limits_active: bool,
    pub soft_lower_limit: i32,
    pub soft_upper_limit: i32,
    #[serde(skip)]
    pub status_bits: AxisStatusBits,
}
