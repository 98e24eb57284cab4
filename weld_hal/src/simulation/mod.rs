//! Simulated drive segment.
//!
//! - [`drive`] - CiA 402 servo drive model
//! - [`motion`] - profile-position and homing kinematics
//! - [`bus`] - 1 ms bus thread delivering input frames

pub mod bus;
pub mod drive;
pub mod motion;

pub use bus::SimBus;
pub use drive::{FaultCause, SimDrive, SimDriveConfig};
