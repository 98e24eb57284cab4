//! Fixed-period cyclic thread.
//!
//! Each controller owns one `AxisCyclicTask` thread that sleeps to an
//! absolute `CLOCK_MONOTONIC` wake time advanced by the cycle period, so
//! pacing does not drift.
//!
//! ## RT Setup Sequence
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` (`rt` feature only).
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` to the configured core, if any.
//! 4. `sched_setscheduler(SCHED_FIFO, priority)`.
//!
//! Without the `rt` feature a failed step is logged and the thread keeps
//! running at normal priority; with it, the thread refuses to start.

use nix::sys::time::TimeSpec;
use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CycleSettings;
use crate::error::AxisError;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    pub cycle_count: u64,
    /// Last cycle body duration [ns].
    pub last_cycle_ns: i64,
    pub min_cycle_ns: i64,
    pub max_cycle_ns: i64,
    pub sum_cycle_ns: i64,
    /// Cycles whose body exceeded the period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns].
    pub max_latency_ns: i64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record one cycle. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns = self.sum_cycle_ns.saturating_add(duration_ns);
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Errors during RT setup or cycle execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("RT setup error: {0}")]
    RtSetup(String),

    #[error("clock error: {0}")]
    Clock(String),

    #[error("cyclic thread exited before it started ticking")]
    NotStarted,
}

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch stack pages so the loop does not fault them in.
fn prefault_stack() {
    let mut buf = [0u8; 64 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusively borrowed stack location.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

/// Perform the RT setup sequence for the calling thread.
pub fn rt_setup(cpu_core: Option<usize>, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    if let Some(cpu) = cpu_core {
        rt_set_affinity(cpu)?;
    }
    rt_set_scheduler(rt_priority)
}

// ─── Cyclic Task ────────────────────────────────────────────────────

/// Handle of a running cyclic thread. Dropping it stops and joins the thread.
pub struct CyclicTask {
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<CycleStats>>,
    handle: Option<JoinHandle<()>>,
}

impl CyclicTask {
    /// Spawn the cyclic thread running `body` once per period.
    ///
    /// `body` receives the tick counter. The call returns once the thread
    /// finished its RT setup.
    pub fn spawn<F>(name: &str, settings: &CycleSettings, body: F) -> Result<Self, AxisError>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(Mutex::new(CycleStats::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CycleError>>();

        let handle = {
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            let settings = settings.clone();
            let name = name.to_string();
            std::thread::Builder::new()
                .name("AxisCyclicTask".into())
                .spawn(move || {
                    let _exit = RunningGuard(&running);
                    if let Err(e) = run_cyclic(&name, &settings, &running, &stats, &ready_tx, body) {
                        warn!(task = %name, "cyclic loop ended: {e}");
                    }
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                stats,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = handle.join();
                Err(CycleError::NotStarted.into())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the timing statistics.
    pub fn stats(&self) -> CycleStats {
        self.stats.lock().clone()
    }

    /// Stop and join the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("cyclic thread panicked");
            }
        }
    }
}

/// Clears the running flag however the loop ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Drop for CyclicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn now(clock: ClockId) -> Result<TimeSpec, CycleError> {
    clock_gettime(clock).map_err(|e| CycleError::Clock(format!("clock_gettime: {e}")))
}

fn run_cyclic<F>(
    name: &str,
    settings: &CycleSettings,
    running: &AtomicBool,
    stats: &Mutex<CycleStats>,
    ready: &mpsc::Sender<Result<(), CycleError>>,
    mut body: F,
) -> Result<(), CycleError>
where
    F: FnMut(u64),
{
    if let Err(e) = rt_setup(settings.cpu_core, settings.rt_priority) {
        if cfg!(feature = "rt") {
            let _ = ready.send(Err(e.clone()));
            return Err(e);
        }
        warn!(task = %name, "running without RT scheduling: {e}");
    }
    let _ = ready.send(Ok(()));

    if settings.startup_delay_ms > 0 {
        std::thread::sleep(Duration::from_millis(settings.startup_delay_ms));
    }

    let clock = ClockId::CLOCK_MONOTONIC;
    let cycle_time_ns = (settings.cycle_time_us as i64).saturating_mul(1000).max(1);
    let start = now(clock)?;
    let mut next_wake = if settings.align_to_second {
        TimeSpec::new(start.tv_sec() + 1, 0)
    } else {
        start
    };
    info!(task = %name, cycle_us = settings.cycle_time_us, "cyclic task started");

    let mut tick: u64 = 0;
    while running.load(Ordering::SeqCst) {
        let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        let cycle_start = now(clock)?;
        let latency_ns = timespec_diff_ns(&cycle_start, &next_wake).abs();

        body(tick);
        tick += 1;

        let duration_ns = timespec_diff_ns(&now(clock)?, &cycle_start);
        let mut s = stats.lock();
        s.record(duration_ns, latency_ns);
        if duration_ns > cycle_time_ns {
            s.overruns += 1;
            if s.overruns <= 10 || s.overruns % 1000 == 0 {
                warn!(task = %name, "cycle overrun #{}: {}ns > {}ns", s.overruns, duration_ns, cycle_time_ns);
            }
        }
        if s.cycle_count % 60_000 == 0 {
            debug!(
                task = %name,
                "{} cycles, avg={}ns, max={}ns, max latency={}ns",
                s.cycle_count,
                s.avg_cycle_ns(),
                s.max_cycle_ns,
                s.max_latency_ns
            );
        }
        drop(s);

        next_wake = timespec_add_ns(next_wake, cycle_time_ns);
        // fell behind by more than a period: resynchronise instead of bursting
        let lag_ns = timespec_diff_ns(&now(clock)?, &next_wake);
        if lag_ns > cycle_time_ns {
            next_wake = timespec_add_ns(now(clock)?, cycle_time_ns);
        }
    }
    info!(task = %name, cycles = tick, "cyclic task stopped");
    Ok(())
}

// ─── Time Helpers ───────────────────────────────────────────────────

/// Add nanoseconds to a TimeSpec.
fn timespec_add_ns(ts: TimeSpec, ns: i64) -> TimeSpec {
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    while nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

/// Difference (a - b) in nanoseconds.
fn timespec_diff_ns(a: &TimeSpec, b: &TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn cycle_stats_basic() {
        let mut stats = CycleStats::new();
        assert_eq!(stats.avg_cycle_ns(), 0);

        stats.record(500_000, 1_000);
        stats.record(600_000, 500);
        assert_eq!(stats.cycle_count, 2);
        assert_eq!(stats.min_cycle_ns, 500_000);
        assert_eq!(stats.max_cycle_ns, 600_000);
        assert_eq!(stats.max_latency_ns, 1_000);
        assert_eq!(stats.avg_cycle_ns(), 550_000);
    }

    #[test]
    fn timespec_helpers() {
        let ts = TimeSpec::new(1, 999_999_500);
        let next = timespec_add_ns(ts, 1_000);
        assert_eq!(next.tv_sec(), 2);
        assert_eq!(next.tv_nsec(), 500);
        assert_eq!(timespec_diff_ns(&next, &ts), 1_000);
        assert_eq!(timespec_add_ns(next, -1_000), ts);
    }

    #[test]
    fn cycle_error_display() {
        let err = CycleError::RtSetup("denied".into());
        assert_eq!(err.to_string(), "RT setup error: denied");
    }

    #[cfg(not(feature = "rt"))]
    #[test]
    fn task_ticks_and_stops() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut task = {
            let ticks = Arc::clone(&ticks);
            CyclicTask::spawn("test", &CycleSettings::immediate(), move |_| {
                ticks.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap()
        };
        std::thread::sleep(Duration::from_millis(50));
        task.stop();
        assert!(!task.is_running());
        let n = ticks.load(Ordering::Relaxed);
        assert!(n >= 10, "only {n} ticks in 50 ms");
        assert_eq!(task.stats().cycle_count, n);
    }

    #[cfg(not(feature = "rt"))]
    #[test]
    fn loop_exit_clears_running() {
        let task = CyclicTask::spawn("test", &CycleSettings::immediate(), |tick| {
            if tick == 3 {
                panic!("cycle body failed");
            }
        })
        .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while task.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!task.is_running());
    }
}
