//! Weld head hardware abstraction: simulated drives.
//!
//! The real fieldbus master is an external collaborator. This crate offers a
//! drop-in simulated segment so the controller can run without hardware:
//!
//! ```rust
//! use std::sync::Arc;
//! use weld_common::bus::DeviceAddress;
//! use weld_common::drive::family::{PRODUCT_EPOS4, VENDOR_MAXON};
//! use weld_hal::simulation::{SimBus, SimDrive, SimDriveConfig};
//!
//! let address = DeviceAddress::new(VENDOR_MAXON, PRODUCT_EPOS4, 0);
//! let bus = Arc::new(SimBus::new());
//! bus.attach(SimDrive::new(SimDriveConfig::new(address)));
//! bus.tick();
//! ```

pub mod simulation;
