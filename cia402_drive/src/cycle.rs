//! Deterministic drive cycle: commands → service cycle → overrun check.
//!
//! One [`DriveRunner`] per drive, each on its own thread at a fixed period.
//! The fieldbus transport runs on a separate thread against the shared
//! process image (see [`spawn_transport`]).
//!
//! ## RT Setup Sequence
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity`: pin to a CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`: RT priority.
//!
//! ## Cycle Loop
//! With the `rt` feature: absolute-time sleep on `CLOCK_MONOTONIC` for
//! drift-free pacing. Otherwise `std::thread::sleep` for the remainder.
//! A cycle longer than its period escalates the drive through
//! [`NetworkDriveService::handle_overrun`].

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::CycleError;
use crate::pdo::SharedImage;
use crate::service::{DriveCommand, DriveStatus, NetworkDriveService};
use crate::sim::FieldbusTransport;

/// Capacity of each drive's command channel.
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
///
/// Updated every cycle with no allocation.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Number of overruns detected.
    pub overruns: u64,
    /// Maximum wake-up latency [ns] (time between expected and actual wake).
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

    /// Record a cycle duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average cycle time [ns] (returns 0 if no cycles).
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

/// Lock all current and future memory pages.
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

/// Touch 256 KiB of stack so the RT loop never faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
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

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Full RT setup for the calling thread.
///
/// Without the `rt` feature every system call is a no-op.
pub fn rt_setup(cpu_core: Option<usize>, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    if let Some(cpu) = cpu_core {
        rt_set_affinity(cpu)?;
    }
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Drive Handle ───────────────────────────────────────────────────

/// Control-side handle to a running drive.
#[derive(Debug, Clone)]
pub struct DriveHandle {
    slave: u16,
    commands: Sender<DriveCommand>,
    status: Arc<Mutex<Option<DriveStatus>>>,
}

impl DriveHandle {
    pub fn slave_id(&self) -> u16 {
        self.slave
    }

    /// Queue a command without blocking. Returns false if it was not queued.
    pub fn send(&self, command: DriveCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(slave = self.slave, ?command, "command queue full");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Status published by the last completed cycle.
    pub fn status(&self) -> Option<DriveStatus> {
        *self.status.lock()
    }
}

// ─── Drive Runner ───────────────────────────────────────────────────

/// Periodic task owning one drive service.
pub struct DriveRunner {
    service: NetworkDriveService,
    commands: Receiver<DriveCommand>,
    status: Arc<Mutex<Option<DriveStatus>>>,
    running: Arc<AtomicBool>,
    cycle_time_ns: i64,
    max_cycles: Option<u64>,
    epoch: Instant,
    /// Timing statistics.
    pub stats: CycleStats,
}

impl DriveRunner {
    pub fn new(
        service: NetworkDriveService,
        cycle_time: Duration,
        running: Arc<AtomicBool>,
    ) -> (Self, DriveHandle) {
        let (tx, rx) = crossbeam_channel::bounded(COMMAND_QUEUE_CAPACITY);
        let status = Arc::new(Mutex::new(None));
        let handle = DriveHandle {
            slave: service.slave_id(),
            commands: tx,
            status: Arc::clone(&status),
        };
        let runner = Self {
            service,
            commands: rx,
            status,
            running,
            cycle_time_ns: cycle_time.as_nanos() as i64,
            max_cycles: None,
            epoch: Instant::now(),
            stats: CycleStats::new(),
        };
        (runner, handle)
    }

    /// Stop after `n` cycles.
    pub fn with_max_cycles(mut self, n: Option<u64>) -> Self {
        self.max_cycles = n;
        self
    }

    pub fn service(&self) -> &NetworkDriveService {
        &self.service
    }

    fn should_stop(&self) -> bool {
        !self.running.load(Ordering::Relaxed)
            || self
                .max_cycles
                .is_some_and(|max| self.stats.cycle_count >= max)
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// One cycle body: drain commands, run the service, publish status.
    pub fn cycle_body(&mut self, now_ns: u64) {
        for command in self.commands.try_iter() {
            self.service.submit(command);
        }
        if let Err(e) = self.service.cycle(now_ns) {
            debug!(slave = self.service.slave_id(), error = %e, "cycle aborted");
        }
        *self.status.lock() = Some(self.service.status());
    }

    /// Record a cycle duration and escalate on overrun.
    ///
    /// Returns true if the cycle overran its period.
    pub fn finish_cycle(&mut self, duration_ns: i64, latency_ns: i64, now_ns: u64) -> bool {
        self.stats.record(duration_ns, latency_ns);
        if duration_ns <= self.cycle_time_ns {
            return false;
        }
        self.stats.overruns += 1;
        let overrun = CycleError::Overrun {
            actual_ns: duration_ns,
            budget_ns: self.cycle_time_ns,
        };
        debug!(
            slave = self.service.slave_id(),
            error = %overrun,
            count = self.stats.overruns,
            "runner overrun"
        );
        self.service
            .handle_overrun(duration_ns, self.cycle_time_ns, now_ns);
        true
    }

    /// Enter the cycle loop until stopped or `max_cycles` is reached.
    pub fn run(&mut self) -> Result<(), CycleError> {
        info!(
            slave = self.service.slave_id(),
            cycle_time_us = self.cycle_time_ns / 1000,
            "drive cycle starting"
        );

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop();
        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop();

        info!(
            slave = self.service.slave_id(),
            cycles = self.stats.cycle_count,
            overruns = self.stats.overruns,
            avg_ns = self.stats.avg_cycle_ns(),
            max_ns = self.stats.max_cycle_ns,
            "drive cycle stopped"
        );
        result
    }

    /// RT cycle loop using `clock_nanosleep(TIMER_ABSTIME)`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self) -> Result<(), CycleError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let now = || {
            clock_gettime(clock).map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))
        };
        let mut next_wake = now()?;

        while !self.should_stop() {
            next_wake = timespec_add_ns(next_wake, self.cycle_time_ns);

            let cycle_start = now()?;
            let now_ns = self.now_ns();
            self.cycle_body(now_ns);
            let cycle_end = now()?;

            let duration_ns = timespec_diff_ns(&cycle_end, &cycle_start);
            self.finish_cycle(duration_ns, 0, now_ns);

            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
            let woke = now()?;
            let latency = timespec_diff_ns(&woke, &next_wake).abs();
            self.stats.max_latency_ns = self.stats.max_latency_ns.max(latency);
        }
        Ok(())
    }

    /// Simulation cycle loop using `std::thread::sleep`.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self) -> Result<(), CycleError> {
        let period = Duration::from_nanos(self.cycle_time_ns as u64);

        while !self.should_stop() {
            let cycle_start = Instant::now();
            let now_ns = self.now_ns();
            self.cycle_body(now_ns);

            let elapsed = cycle_start.elapsed();
            self.finish_cycle(elapsed.as_nanos() as i64, 0, now_ns);

            if let Some(remaining) = period.checked_sub(elapsed) {
                thread::sleep(remaining);
            }
        }
        Ok(())
    }
}

/// Run a drive on a named thread with RT setup applied inside it.
pub fn spawn_drive(
    mut runner: DriveRunner,
    cpu_core: Option<usize>,
    rt_priority: i32,
) -> io::Result<JoinHandle<Result<CycleStats, CycleError>>> {
    let name = format!("drive-{}", runner.service.slave_id());
    thread::Builder::new().name(name).spawn(move || -> Result<CycleStats, CycleError> {
        rt_setup(cpu_core, rt_priority)?;
        runner.run()?;
        Ok(runner.stats)
    })
}

// ─── Transport ──────────────────────────────────────────────────────

/// Exchange frames on a thread at the cycle period.
pub fn spawn_transport<T: FieldbusTransport + 'static>(
    mut transport: T,
    image: SharedImage,
    cycle_time: Duration,
    running: Arc<AtomicBool>,
    max_cycles: Option<u64>,
) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("fieldbus".to_string())
        .spawn(move || {
            let mut frames = 0u64;
            while running.load(Ordering::Relaxed) && max_cycles.is_none_or(|max| frames < max) {
                let start = Instant::now();
                if let Err(e) = transport.exchange(&mut image.lock(), cycle_time) {
                    warn!(error = %e, "frame exchange failed");
                }
                frames += 1;
                if let Some(remaining) = cycle_time.checked_sub(start.elapsed()) {
                    thread::sleep(remaining);
                }
            }
            frames
        })
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

/// Difference (a - b) in nanoseconds.
#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────
