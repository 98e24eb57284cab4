//! Derived axis status flags and drive error diagnostics.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Status flags derived by the ingest path from raw telemetry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AxisStatusBits: u16 {
        /// Drive reported a fault.
        const GEN_FAULT        = 0x0001;
        /// Negative hardware limit switch engaged.
        const HW_LIMIT_NEG     = 0x0002;
        /// Positive hardware limit switch engaged.
        const HW_LIMIT_POS     = 0x0004;
        /// Last target was clamped to the soft lower limit.
        const SW_LIMIT_NEG     = 0x0008;
        /// Last target was clamped to the soft upper limit.
        const SW_LIMIT_POS     = 0x0010;
        const BRAKE_OPEN       = 0x0020;
        /// Home position not established (or lost).
        const HOME_POS_NOT_OK  = 0x0040;
        /// Actual position lies outside the soft limits.
        const OUT_OF_RANGE     = 0x0080;
    }
}

impl AxisStatusBits {
    /// Flags cleared by a fault reset.
    pub const FAULT_RESET_CLEARS: Self = Self::from_bits_truncate(
        Self::GEN_FAULT.bits() | Self::HW_LIMIT_NEG.bits() | Self::HW_LIMIT_POS.bits(),
    );
}

impl Default for AxisStatusBits {
    fn default() -> Self {
        Self::HOME_POS_NOT_OK
    }
}

bitflags! {
    /// CiA 301 error register (object 0x1001).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ErrorRegister: u8 {
        const GENERIC        = 0x01;
        const CURRENT        = 0x02;
        const VOLTAGE        = 0x04;
        const TEMPERATURE    = 0x08;
        const COMMUNICATION  = 0x10;
        const DEVICE_PROFILE = 0x20;
        const MOTION         = 0x80;
    }
}

impl ErrorRegister {
    /// Human-readable meaning of a single register bit.
    pub fn describe(bit: ErrorRegister) -> &'static str {
        match bit {
            b if b == Self::MOTION => "motion error",
            b if b == Self::DEVICE_PROFILE => "device profile specific error",
            b if b == Self::COMMUNICATION => "communication error",
            b if b == Self::TEMPERATURE => "temperature error",
            b if b == Self::VOLTAGE => "voltage error",
            b if b == Self::CURRENT => "current error",
            b if b == Self::GENERIC => "generic error",
            _ => "reserved",
        }
    }
}

/// Classified drive error code (object 0x603F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveDiagnosis {
    Cleared,
    FollowingError,
    NegativeLimitSwitch,
    PositiveLimitSwitch,
    SoftwarePositionLimit,
    SafeTorqueOff,
    Overcurrent,
    Overvoltage,
    Undervoltage,
    Thermal,
    LogicSupplyTooLow,
    Encoder,
    Communication,
    Unspecified,
}

impl DriveDiagnosis {
    pub const fn classify(error_code: u16) -> Self {
        match error_code {
            0x0000 => Self::Cleared,
            0x8611 => Self::FollowingError,
            0x8A80 => Self::NegativeLimitSwitch,
            0x8A81 => Self::PositiveLimitSwitch,
            0x8A82 => Self::SoftwarePositionLimit,
            0x8A88 => Self::SafeTorqueOff,
            0x2310 => Self::Overcurrent,
            0x3210 => Self::Overvoltage,
            0x3220 => Self::Undervoltage,
            0x4210 => Self::Thermal,
            0x5113 => Self::LogicSupplyTooLow,
            0x7300..=0x73FF => Self::Encoder,
            0x8100..=0x82FF => Self::Communication,
            _ => Self::Unspecified,
        }
    }

    /// Status flag that the diagnosis raises, if any.
    pub const fn status_flag(self) -> Option<AxisStatusBits> {
        match self {
            Self::NegativeLimitSwitch => Some(AxisStatusBits::HW_LIMIT_NEG),
            Self::PositiveLimitSwitch => Some(AxisStatusBits::HW_LIMIT_POS),
            _ => None,
        }
    }
}

impl fmt::Display for DriveDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Cleared => "error cleared",
            Self::FollowingError => "following error",
            Self::NegativeLimitSwitch => "negative limit switch",
            Self::PositiveLimitSwitch => "positive limit switch",
            Self::SoftwarePositionLimit => "software position limit",
            Self::SafeTorqueOff => "safe torque off",
            Self::Overcurrent => "overcurrent",
            Self::Overvoltage => "overvoltage",
            Self::Undervoltage => "undervoltage",
            Self::Thermal => "thermal overload",
            Self::LogicSupplyTooLow => "logic supply voltage too low",
            Self::Encoder => "encoder error",
            Self::Communication => "communication error",
            Self::Unspecified => "unspecified error",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_has_home_not_ok() {
        let bits = AxisStatusBits::default();
        assert!(bits.contains(AxisStatusBits::HOME_POS_NOT_OK));
        assert!(!bits.intersects(AxisStatusBits::FAULT_RESET_CLEARS));
    }

    #[test]
    fn classify_error_codes() {
        assert_eq!(DriveDiagnosis::classify(0), DriveDiagnosis::Cleared);
        assert_eq!(DriveDiagnosis::classify(0x8A80), DriveDiagnosis::NegativeLimitSwitch);
        assert_eq!(DriveDiagnosis::classify(0x7380), DriveDiagnosis::Encoder);
        assert_eq!(DriveDiagnosis::classify(0x8210), DriveDiagnosis::Communication);
        assert_eq!(DriveDiagnosis::classify(0xFF01), DriveDiagnosis::Unspecified);
    }

    #[test]
    fn limit_switch_codes_raise_flags() {
        assert_eq!(
            DriveDiagnosis::classify(0x8A81).status_flag(),
            Some(AxisStatusBits::HW_LIMIT_POS)
        );
        assert_eq!(DriveDiagnosis::classify(0x2310).status_flag(), None);
    }

    #[test]
    fn error_register_bits_described() {
        let reg = ErrorRegister::from_bits_truncate(0x82);
        let texts: Vec<_> = reg.iter().map(ErrorRegister::describe).collect();
        assert_eq!(texts, vec!["current error", "motion error"]);
    }
}
