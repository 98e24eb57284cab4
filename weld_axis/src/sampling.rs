//! Position sampling per image trigger.
//!
//! An image-trigger source arms the sampler with a burst; every trigger it
//! then calls [`MotionSampler::incoming_motion_data`], which forwards the
//! current position tagged with the image number until the burst is used up.

use parking_lot::Mutex;
use std::sync::Arc;
use weld_common::axis::types::AxisTag;

/// Context of an image-trigger burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerContext {
    pub product: u32,
    pub seam: u32,
    pub image_number: u32,
}

/// Burst geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerInterval {
    pub trigger_distance_us: u32,
    pub triggers: u32,
}

/// One position sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionSample {
    pub sensor: u32,
    pub context: TriggerContext,
    pub value: i32,
}

/// Receiver of position samples.
pub trait SampleSink: Send + Sync {
    fn data(&self, sample: MotionSample);
}

/// Sink that discards samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSampleSink;

impl SampleSink for NullSampleSink {
    fn data(&self, _sample: MotionSample) {}
}

#[derive(Debug, Default)]
struct Burst {
    context: TriggerContext,
    interval: TriggerInterval,
    sent: u32,
}

/// Per-axis sampler.
pub struct MotionSampler {
    sensor: u32,
    burst: Mutex<Burst>,
    sink: Arc<dyn SampleSink>,
}

impl MotionSampler {
    pub fn new(axis: AxisTag, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            sensor: axis.position_sensor(),
            burst: Mutex::new(Burst::default()),
            sink,
        }
    }

    /// Arm for `interval.triggers` samples.
    pub fn burst(&self, context: TriggerContext, interval: TriggerInterval) {
        *self.burst.lock() = Burst {
            context,
            interval,
            sent: 0,
        };
    }

    pub fn cancel(&self) {
        *self.burst.lock() = Burst::default();
    }

    /// Emit one sample of `position` if the burst is not used up.
    pub fn incoming_motion_data(&self, position: i32) {
        let sample = {
            let mut burst = self.burst.lock();
            if burst.sent >= burst.interval.triggers {
                return;
            }
            let mut context = burst.context;
            context.image_number = burst.sent;
            burst.sent += 1;
            MotionSample {
                sensor: self.sensor,
                context,
                value: position,
            }
        };
        self.sink.data(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<MotionSample>>);

    impl SampleSink for Collect {
        fn data(&self, sample: MotionSample) {
            self.0.lock().push(sample);
        }
    }

    #[test]
    fn burst_limits_sample_count() {
        let sink = Arc::new(Collect::default());
        let sampler = MotionSampler::new(AxisTag::Y, sink.clone());

        sampler.incoming_motion_data(5);
        assert!(sink.0.lock().is_empty());

        sampler.burst(
            TriggerContext::default(),
            TriggerInterval {
                trigger_distance_us: 1000,
                triggers: 2,
            },
        );
        for pos in [10, 20, 30] {
            sampler.incoming_motion_data(pos);
        }
        let samples = sink.0.lock().clone();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value, 20);
        assert_eq!(samples[1].context.image_number, 1);
        assert_eq!(samples[0].sensor, AxisTag::Y.position_sensor());
    }

    #[test]
    fn cancel_disarms() {
        let sink = Arc::new(Collect::default());
        let sampler = MotionSampler::new(AxisTag::X, sink.clone());
        sampler.burst(
            TriggerContext::default(),
            TriggerInterval {
                trigger_distance_us: 1000,
                triggers: 10,
            },
        );
        sampler.cancel();
        sampler.incoming_motion_data(1);
        assert!(sink.0.lock().is_empty());
    }
}
