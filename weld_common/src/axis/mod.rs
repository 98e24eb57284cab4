//! Axis-level vocabulary shared by controllers, simulators and callers.

pub mod config;
pub mod status;
pub mod types;
