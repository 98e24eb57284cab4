//! Drive-family strategy table.
//!
//! The two supported drive families disagree on where some status bits live,
//! on the raw encoding of profile velocity/acceleration and on which
//! controller variant drives them. The constants below are measured hardware
//! values and are kept verbatim. State-machine logic only ever sees
//! normalised status words and user-unit positions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::drive::cia402::status_bits;

/// Copley Controls vendor id.
pub const VENDOR_COPLEY: u32 = 0x0000_00AB;
/// Copley ACCELNET product code.
pub const PRODUCT_ACCELNET: u32 = 0x0000_0380;
/// Maxon Motor vendor id.
pub const VENDOR_MAXON: u32 = 0x0000_00FB;
/// Maxon EPOS4 product code.
pub const PRODUCT_EPOS4: u32 = 0x6350_0000;

/// Raw encoder increments per user unit.
pub const POSITION_SCALE: f64 = 4.114;

// Raw ACCELNET status bits that are relocated during normalisation.
const ACCELNET_RAW_ABORTED: u16 = 0x0100;
const ACCELNET_RAW_MOVING: u16 = 0x4000;

/// Known drive families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveFamily {
    Accelnet,
    Epos4,
    Unknown,
}

impl DriveFamily {
    /// Detect the family from fieldbus identity.
    pub const fn detect(vendor_id: u32, product_code: u32) -> Self {
        match (vendor_id, product_code) {
            (VENDOR_COPLEY, PRODUCT_ACCELNET) => Self::Accelnet,
            (VENDOR_MAXON, PRODUCT_EPOS4) => Self::Epos4,
            _ => Self::Unknown,
        }
    }

    /// Strategy table entry for this family.
    pub const fn profile(self) -> &'static FamilyProfile {
        match self {
            Self::Accelnet => &ACCELNET,
            Self::Epos4 => &EPOS4,
            Self::Unknown => &UNKNOWN,
        }
    }
}

impl fmt::Display for DriveFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accelnet => "ACCELNET",
            Self::Epos4 => "EPOS4",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Which controller implementation drives a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerVariant {
    /// Single cyclic thread consuming a request mailbox.
    Mailbox,
    /// Dedicated cyclic thread running four step procedures.
    Cyclic,
}

/// Linear percent → raw mapping: `raw = factor * percent + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentMap {
    pub factor: i32,
    pub offset: i32,
}

impl PercentMap {
    pub const fn to_raw(&self, percent: i32) -> i32 {
        if self.factor == 0 {
            return 0;
        }
        let p = if percent < 1 {
            1
        } else if percent > 100 {
            100
        } else {
            percent
        };
        self.factor * p + self.offset
    }

    pub const fn to_percent(&self, raw: i32) -> i32 {
        if self.factor == 0 {
            return 0;
        }
        (raw - self.offset) / self.factor
    }
}

/// Per-family constants and conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyProfile {
    pub family: DriveFamily,
    /// `None` passes positions through unscaled.
    pub position_scale: Option<f64>,
    pub velocity: PercentMap,
    /// Used for acceleration and deceleration alike.
    pub acceleration: PercentMap,
    pub default_velocity: i32,
    pub default_acceleration: i32,
    pub default_deceleration: i32,
    pub homing_velocity_fast: i32,
    pub homing_velocity_slow: i32,
    pub variant: ControllerVariant,
}

pub static ACCELNET: FamilyProfile = FamilyProfile {
    family: DriveFamily::Accelnet,
    position_scale: Some(POSITION_SCALE),
    velocity: PercentMap {
        factor: 16_000,
        offset: 100_000,
    },
    acceleration: PercentMap {
        factor: 5_000,
        offset: 100_000,
    },
    default_velocity: 1_700_000,
    default_acceleration: 600_000,
    default_deceleration: 600_000,
    homing_velocity_fast: 200_000,
    homing_velocity_slow: 83_333,
    variant: ControllerVariant::Mailbox,
};

pub static EPOS4: FamilyProfile = FamilyProfile {
    family: DriveFamily::Epos4,
    position_scale: Some(POSITION_SCALE),
    velocity: PercentMap {
        factor: 52,
        offset: 200,
    },
    acceleration: PercentMap {
        factor: 1_700,
        offset: 10_000,
    },
    default_velocity: 5_400,
    default_acceleration: 180_000,
    default_deceleration: 180_000,
    homing_velocity_fast: 500,
    homing_velocity_slow: 100,
    variant: ControllerVariant::Cyclic,
};

pub static UNKNOWN: FamilyProfile = FamilyProfile {
    family: DriveFamily::Unknown,
    position_scale: None,
    velocity: PercentMap { factor: 0, offset: 0 },
    acceleration: PercentMap { factor: 0, offset: 0 },
    default_velocity: 0,
    default_acceleration: 0,
    default_deceleration: 0,
    homing_velocity_fast: 200_000,
    homing_velocity_slow: 83_333,
    variant: ControllerVariant::Cyclic,
};

impl FamilyProfile {
    /// Raw drive increments → user units.
    #[inline]
    pub fn raw_to_user(&self, raw: i32) -> i32 {
        match self.position_scale {
            Some(scale) => (f64::from(raw as f32) / scale) as i32,
            None => raw,
        }
    }

    /// User units → raw drive increments.
    #[inline]
    pub fn user_to_raw(&self, user: i32) -> i32 {
        match self.position_scale {
            Some(scale) => (f64::from(user as f32) * scale) as i32,
            None => user,
        }
    }

    /// Move family-specific status bits to their normalised positions.
    pub const fn normalize_status_word(&self, raw: u16) -> u16 {
        match self.family {
            DriveFamily::Accelnet => {
                let mut sw =
                    raw & !(ACCELNET_RAW_ABORTED | ACCELNET_RAW_MOVING | status_bits::TRAJECTORY_ABORTED);
                if raw & ACCELNET_RAW_ABORTED != 0 {
                    sw |= status_bits::TRAJECTORY_ABORTED;
                }
                if raw & ACCELNET_RAW_MOVING != 0 {
                    sw |= status_bits::MOVING;
                }
                sw
            }
            DriveFamily::Epos4 => raw & !status_bits::TRAJECTORY_ABORTED,
            DriveFamily::Unknown => raw,
        }
    }

    /// Inverse of [`normalize_status_word`](Self::normalize_status_word),
    /// used by drive simulators.
    pub const fn encode_status_word(&self, normalized: u16) -> u16 {
        match self.family {
            DriveFamily::Accelnet => {
                let mut raw = normalized
                    & !(status_bits::MOVING | status_bits::TRAJECTORY_ABORTED | ACCELNET_RAW_MOVING);
                if normalized & status_bits::TRAJECTORY_ABORTED != 0 {
                    raw |= ACCELNET_RAW_ABORTED;
                }
                if normalized & status_bits::MOVING != 0 {
                    raw |= ACCELNET_RAW_MOVING;
                }
                raw
            }
            DriveFamily::Epos4 => normalized & !status_bits::TRAJECTORY_ABORTED,
            DriveFamily::Unknown => normalized,
        }
    }

    pub const fn velocity_raw(&self, percent: i32) -> i32 {
        self.velocity.to_raw(percent)
    }

    pub const fn velocity_percent(&self, raw: i32) -> i32 {
        self.velocity.to_percent(raw)
    }

    pub const fn acceleration_raw(&self, percent: i32) -> i32 {
        self.acceleration.to_raw(percent)
    }

    pub const fn acceleration_percent(&self, raw: i32) -> i32 {
        self.acceleration.to_percent(raw)
    }
}
