//! Dispatch benchmark: cost of one cyclic tick.
//!
//! The dispatcher must finish well inside the 1 ms period. Measures an idle
//! tick (no requests) and a tick while a move is running against the
//! simulated drive, which includes the drive model and input ingestion.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use weld_axis::controller::AxisShared;
use weld_axis::controller::requests::RequestFlags;
use weld_axis::dispatch::Dispatcher;
use weld_axis::ingest::{AxisIngest, IngestEdges};
use weld_axis::observer::LoggingObserver;
use weld_axis::sampling::NullSampleSink;
use weld_common::axis::config::AxisConfig;
use weld_common::axis::types::{AxisIdentity, AxisTag};
use weld_common::bus::{BusError, DeviceAddress, FrameSink};
use weld_common::drive::family::{ControllerVariant, PRODUCT_EPOS4, VENDOR_MAXON};
use weld_common::drive::frame::OutputFrame;
use weld_hal::simulation::{SimBus, SimDrive, SimDriveConfig};

const ADDR: DeviceAddress = DeviceAddress::new(VENDOR_MAXON, PRODUCT_EPOS4, 0);

/// Sink that drops every frame.
struct DiscardSink;

impl FrameSink for DiscardSink {
    fn write_output(&self, _address: DeviceAddress, _frame: &OutputFrame) -> Result<(), BusError> {
        Ok(())
    }
}

fn shared() -> Arc<AxisShared> {
    Arc::new(AxisShared::new(
        AxisIdentity::new(AxisTag::X, ADDR, true),
        AxisConfig::default(),
        Arc::new(LoggingObserver),
        Arc::new(NullSampleSink),
        false,
    ))
}

fn bench_idle_tick(c: &mut Criterion) {
    let requests = Arc::new(RequestFlags::new());
    let mut dispatcher = Dispatcher::new(shared(), requests, Arc::new(DiscardSink));

    c.bench_function("dispatch_idle_tick", |b| {
        b.iter(|| black_box(dispatcher.tick()));
    });
}

fn bench_moving_tick(c: &mut Criterion) {
    let bus = Arc::new(SimBus::new());
    let mut drive = SimDriveConfig::new(ADDR);
    drive.step_per_tick = 4;
    bus.attach(SimDrive::new(drive));

    let shared = shared();
    let ingest = AxisIngest::new(shared.clone(), ControllerVariant::Cyclic, Arc::new(IngestEdges::new()));
    if bus.subscribe(ADDR, Arc::new(ingest)).is_err() {
        return;
    }
    let requests = Arc::new(RequestFlags::new());
    let mut dispatcher = Dispatcher::new(shared, requests.clone(), bus.clone());

    let mut target = 0;
    c.bench_function("dispatch_moving_tick", |b| {
        b.iter(|| {
            if !dispatcher.position().is_busy() {
                // alternate between two far targets so a move is always running
                target = if target == 100_000 { -100_000 } else { 100_000 };
                requests.target.store(target, Ordering::Release);
                requests.drive.post(None);
            }
            black_box(dispatcher.tick());
            bus.tick();
        });
    });
}

criterion_group!(benches, bench_idle_tick, bench_moving_tick);
criterion_main!(benches);
