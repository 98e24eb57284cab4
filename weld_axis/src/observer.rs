//! Upstream callback contract.
//!
//! The orchestrating collaborator is notified through [`AxisObserver`].
//! Callbacks are invoked from the cyclic thread or from the calling thread
//! and must never block.

use parking_lot::Mutex;
use tracing::{info, warn};
use weld_common::axis::types::{AxisErrorCode, AxisTag, HeadMode};

/// Callbacks raised by an axis controller.
pub trait AxisObserver: Send + Sync {
    /// The axis settled in `mode`.
    fn on_ready(&self, axis: AxisTag, mode: HeadMode);

    /// A requested value was reached.
    fn on_value_reached(&self, axis: AxisTag, mode: HeadMode, value: i32);

    /// A recoverable control-level error occurred.
    fn on_error(&self, axis: AxisTag, code: AxisErrorCode, value: i32);
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl AxisObserver for LoggingObserver {
    fn on_ready(&self, axis: AxisTag, mode: HeadMode) {
        info!(%axis, ?mode, "axis ready");
    }

    fn on_value_reached(&self, axis: AxisTag, mode: HeadMode, value: i32) {
        info!(%axis, ?mode, value, "value reached");
    }

    fn on_error(&self, axis: AxisTag, code: AxisErrorCode, value: i32) {
        warn!(%axis, %code, value, "axis error");
    }
}

/// One recorded callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisEvent {
    Ready(AxisTag, HeadMode),
    ValueReached(AxisTag, HeadMode, i32),
    Error(AxisTag, AxisErrorCode, i32),
}

/// Observer that records every callback, for inspection in tests and tools.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<AxisEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AxisEvent> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<(AxisErrorCode, i32)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match *e {
                AxisEvent::Error(_, code, value) => Some((code, value)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AxisObserver for RecordingObserver {
    fn on_ready(&self, axis: AxisTag, mode: HeadMode) {
        self.events.lock().push(AxisEvent::Ready(axis, mode));
    }

    fn on_value_reached(&self, axis: AxisTag, mode: HeadMode, value: i32) {
        self.events.lock().push(AxisEvent::ValueReached(axis, mode, value));
    }

    fn on_error(&self, axis: AxisTag, code: AxisErrorCode, value: i32) {
        self.events.lock().push(AxisEvent::Error(axis, code, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_observer_filters_errors() {
        let obs = RecordingObserver::new();
        obs.on_ready(AxisTag::X, HeadMode::Position);
        obs.on_error(AxisTag::X, AxisErrorCode::UpperLimit, 1000);
        obs.on_value_reached(AxisTag::X, HeadMode::Position, 1000);

        assert_eq!(obs.events().len(), 3);
        assert_eq!(obs.errors(), vec![(AxisErrorCode::UpperLimit, 1000)]);
        obs.clear();
        assert!(obs.events().is_empty());
    }
}
