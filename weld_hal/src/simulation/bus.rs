//! Simulated fieldbus segment.
//!
//! `SimBus` stands in for the bus master: controllers write their output
//! frames into it through [`FrameSink`], and a 1 ms bus thread steps every
//! attached [`SimDrive`] with the latest output frame and delivers the
//! resulting input frame to the subscribed [`InputHandler`]s.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use weld_common::bus::{BusError, DeviceAddress, FrameSink, InputHandler};
use weld_common::drive::frame::{InputFrame, OutputFrame};

use super::drive::SimDrive;

struct Slot {
    drive: SimDrive,
    output: OutputFrame,
    handlers: Vec<Arc<dyn InputHandler>>,
}

struct BusInner {
    slots: Mutex<Vec<Slot>>,
    running: AtomicBool,
    cycles: AtomicU64,
    cycle_time: Duration,
}

impl BusInner {
    fn tick(&self) {
        let mut deliveries: Vec<(DeviceAddress, InputFrame, Vec<Arc<dyn InputHandler>>)> =
            Vec::new();
        {
            let mut slots = self.slots.lock();
            for slot in slots.iter_mut() {
                let input = slot.drive.step(&slot.output);
                deliveries.push((slot.drive.address(), input, slot.handlers.clone()));
            }
        }
        // handlers run without the bus lock held
        for (address, input, handlers) in &deliveries {
            for handler in handlers {
                handler.on_periodic_input(*address, input);
            }
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }
}

/// Simulated bus with its own cyclic thread.
pub struct SimBus {
    inner: Arc<BusInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimBus {
    /// Create a bus with the nominal 1 ms cycle.
    pub fn new() -> Self {
        Self::with_cycle_time(Duration::from_micros(weld_common::consts::CYCLE_TIME_US))
    }

    pub fn with_cycle_time(cycle_time: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                slots: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                cycles: AtomicU64::new(0),
                cycle_time,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Attach a drive. A second drive with the same address replaces the first.
    pub fn attach(&self, drive: SimDrive) {
        let mut slots = self.inner.slots.lock();
        let address = drive.address();
        info!(%address, "simulated drive attached");
        slots.retain(|s| s.drive.address() != address);
        slots.push(Slot {
            drive,
            output: OutputFrame::default(),
            handlers: Vec::new(),
        });
    }

    /// Deliver input frames of `address` to `handler`.
    pub fn subscribe(&self, address: DeviceAddress, handler: Arc<dyn InputHandler>) -> Result<(), BusError> {
        let mut slots = self.inner.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.drive.address() == address)
            .ok_or(BusError::UnknownDevice(address))?;
        slot.handlers.push(handler);
        Ok(())
    }

    /// Deliver input frames of every attached drive to `handler`.
    ///
    /// The handler is expected to filter by address itself.
    pub fn subscribe_all(&self, handler: Arc<dyn InputHandler>) {
        for slot in self.inner.slots.lock().iter_mut() {
            slot.handlers.push(Arc::clone(&handler));
        }
    }

    /// Run `f` against an attached drive (fault injection, inspection).
    pub fn with_drive<R>(&self, address: DeviceAddress, f: impl FnOnce(&mut SimDrive) -> R) -> Option<R> {
        let mut slots = self.inner.slots.lock();
        slots
            .iter_mut()
            .find(|s| s.drive.address() == address)
            .map(|s| f(&mut s.drive))
    }

    /// Step all drives once, synchronously.
    pub fn tick(&self) {
        self.inner.tick();
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the bus thread.
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("SimBusTask".into())
            .spawn(move || run_bus(&inner))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop and join the bus thread.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("simulated bus thread panicked");
            }
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimBus {
    fn drop(&mut self) {
        self.stop();
    }
}

impl FrameSink for SimBus {
    fn write_output(&self, address: DeviceAddress, frame: &OutputFrame) -> Result<(), BusError> {
        let mut slots = self.inner.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.drive.address() == address)
            .ok_or(BusError::UnknownDevice(address))?;
        slot.output = *frame;
        Ok(())
    }
}

fn run_bus(inner: &BusInner) {
    info!(cycle_us = inner.cycle_time.as_micros() as u64, "simulated bus running");
    let mut overruns: u64 = 0;

    while inner.running.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();
        inner.tick();

        let elapsed = cycle_start.elapsed();
        if elapsed < inner.cycle_time {
            std::thread::sleep(inner.cycle_time - elapsed);
        } else {
            overruns += 1;
            if overruns <= 10 || overruns % 1000 == 0 {
                warn!(
                    "bus cycle overrun #{}: {}us (target {}us)",
                    overruns,
                    elapsed.as_micros(),
                    inner.cycle_time.as_micros()
                );
            }
        }

        let cycles = inner.cycles.load(Ordering::Relaxed);
        if cycles % 10_000 == 0 {
            debug!("simulated bus: {} cycles, {} overruns", cycles, overruns);
        }
    }
    info!("simulated bus stopped");
}
