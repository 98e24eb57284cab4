//! Error types of the axis controller crate.

use thiserror::Error;
use weld_common::bus::BusError;
use weld_common::config::ConfigError;

use crate::cycle::CycleError;

/// Errors raised while building or running an axis controller.
#[derive(Debug, Error)]
pub enum AxisError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("fieldbus error: {0}")]
    Bus(#[from] BusError),

    #[error("failed to spawn cyclic thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("cyclic task error: {0}")]
    Cycle(#[from] CycleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_sources() {
        let err: AxisError = ConfigError::FileNotFound.into();
        assert!(err.to_string().contains("not found"));

        let err: AxisError = BusError::Closed.into();
        assert_eq!(err.to_string(), "fieldbus error: bus is shut down");
    }
}
