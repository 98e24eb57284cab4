//! Drive-side encodings.
//!
//! - [`cia402`] - device state derivation and control-word commands
//! - [`family`] - per-family scaling and status-word normalisation
//! - [`frame`] - periodic input/output frame layouts

pub mod cia402;
pub mod family;
pub mod frame;
