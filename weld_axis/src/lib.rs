//! Weld head axis controller.
//!
//! One controller instance drives one servo axis (X, Y or Z) of the weld
//! head over a cyclic fieldbus. Callers use the blocking [`AxisController`]
//! contract; the controller runs its procedures on a dedicated 1 ms thread
//! and consumes input frames from the fieldbus I/O thread.
//!
//! # Module Structure
//!
//! - [`controller`] - `AxisController` contract, both variants, factory
//! - [`dispatch`] - per-tick dispatcher of the cyclic variant
//! - [`procedure`] - enable, disable, position and homing step machines
//! - [`ingest`] - input-frame consumer updating telemetry
//! - [`telemetry`] - lock-free telemetry and derived status flags
//! - [`event`] - completion events bridging callers and the cyclic thread
//! - [`limits`] - soft-limit policy
//! - [`cycle`] - RT setup and the absolute-time cyclic thread
//! - [`sampling`] - per-image position sampling
//! - [`observer`] - upstream callback contract
//! - [`config`] - daemon configuration and persistence seam
//! - [`error`] - error types
//!
//! [`AxisController`]: controller::AxisController

pub mod config;
pub mod controller;
pub mod cycle;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod ingest;
pub mod limits;
pub mod observer;
pub mod procedure;
pub mod sampling;
pub mod telemetry;
