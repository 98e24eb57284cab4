//! Weld head common library
//!
//! Shared vocabulary for the per-axis motion stack: axis identity, persisted
//! axis settings, derived status flags, CiA 402 encodings, the drive-family
//! strategy table and the fixed fieldbus frame layouts.
//!
//! # Module Structure
//!
//! - [`axis`] - Axis tags, modes, requests, status flags and settings
//! - [`drive`] - CiA 402 state machine, drive families, frame layouts
//! - [`bus`] - Fieldbus seams (`FrameSink`, `InputHandler`)
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Cycle time, tolerances and procedure timeouts
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use weld_common::prelude::*;
//!
//! let state = DriveState::from_status_word(0x0237);
//! assert_eq!(state, DriveState::OperationEnabled);
//! ```

pub mod axis;
pub mod bus;
pub mod config;
pub mod consts;
pub mod drive;
pub mod prelude;
