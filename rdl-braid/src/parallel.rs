//! Thread-per-kernel variant of [`crate::coordinator::BraidCoordinator`].
//!
//! Each torus runs its own OS thread and owns its `BraidedKernel`
//! exclusively; nothing outside that thread ever mutates it directly.
//! Projections cross thread boundaries through a lock-free published
//! slot (`arc_swap::ArcSwapOption`, the same mechanism used elsewhere
//! in this codebase for publishing a hot value without blocking a
//! reader on a writer). A four-party barrier (the three workers plus
//! the thread driving `run_for`) keeps every torus on the same
//! exchange boundary; failure-mark and reconstruction requests cross
//! back into a worker through a small mailbox guarded by the same
//! `parking_lot::Mutex` idiom used for event injection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use rdl_kernel::projection::{HealthStatus, Projection};

use crate::coordinator::{
    BraidMetrics, HEARTBEAT_TIMEOUT_MULTIPLIER, INTERVAL_CEILING, INTERVAL_FLOOR,
    LOW_VIOLATION_RATE, MIN_CYCLES_FOR_ADAPTATION, HIGH_VIOLATION_RATE,
};
use crate::error::BraidError;
use crate::wrapper::BraidedKernel;

/// Predecessor in the A→B→C→A exchange cycle: B applies A, C applies
/// B, A applies C.
const fn predecessor(id: usize) -> usize {
    (id + 2) % 3
}

struct Channel {
    published: ArcSwapOption<Projection>,
}

impl Channel {
    fn new() -> Self {
        Self {
            published: ArcSwapOption::empty(),
        }
    }

    fn publish(&self, p: Projection) {
        self.published.store(Some(Arc::new(p)));
    }

    fn read(&self) -> Option<Arc<Projection>> {
        self.published.load_full()
    }
}

/// Cross-thread control surface for one worker: a forced-failure latch
/// the coordinator side can set, and a one-shot mailbox carrying the
/// projection to restore from.
struct Control {
    force_failed: AtomicBool,
    restore: Mutex<Option<Projection>>,
}

impl Control {
    fn new() -> Self {
        Self {
            force_failed: AtomicBool::new(false),
            restore: Mutex::new(None),
        }
    }

    fn request_failure(&self) {
        self.force_failed.store(true, Ordering::Release);
    }

    fn take_failure_request(&self) -> bool {
        self.force_failed.swap(false, Ordering::AcqRel)
    }

    fn request_restore(&self, p: Projection) {
        *self.restore.lock() = Some(p);
    }

    fn take_restore_request(&self) -> Option<Projection> {
        self.restore.lock().take()
    }
}

#[derive(Default)]
struct SharedMetrics {
    braid_cycles: AtomicU64,
    projection_exchanges: AtomicU64,
    failures_detected: AtomicU64,
    reconstructions: AtomicU64,
    migrations: AtomicU64,
    boundary_violations: [AtomicU64; 3],
    global_violations: [AtomicU64; 3],
    corrective_events: [AtomicU64; 3],
}

impl SharedMetrics {
    fn snapshot(&self) -> BraidMetrics {
        BraidMetrics {
            braid_cycles: self.braid_cycles.load(Ordering::Relaxed),
            projection_exchanges: self.projection_exchanges.load(Ordering::Relaxed),
            failures_detected: self.failures_detected.load(Ordering::Relaxed),
            reconstructions: self.reconstructions.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            total_boundary_violations: self
                .boundary_violations
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .sum(),
            total_global_violations: self
                .global_violations
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .sum(),
            corrective_events: self
                .corrective_events
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .sum(),
        }
    }
}

fn worker_loop(
    id: usize,
    mut kernel: BraidedKernel,
    channels: Arc<[Channel; 3]>,
    controls: Arc<[Control; 3]>,
    metrics: Arc<SharedMetrics>,
    barrier: Arc<Barrier>,
    interval: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
) -> BraidedKernel {
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        if let Some(projection) = controls[id].take_restore_request() {
            kernel.restore_from_projection(&projection);
            metrics.reconstructions.fetch_add(1, Ordering::Relaxed);
            tracing::info!(torus_id = id, "reconstruction complete");
        }
        if controls[id].take_failure_request() {
            kernel.mark_failed();
            tracing::error!(torus_id = id, "heartbeat timeout: marked failed");
        }

        if kernel.health() != HealthStatus::Failed {
            let steps = interval.load(Ordering::Relaxed);
            for _ in 0..steps {
                kernel.kernel_mut().tick();
            }
        }

        channels[id].publish(kernel.extract_projection());
        barrier.wait();

        if let Some(peer) = channels[predecessor(id)].read() {
            if !kernel.apply_constraint(&peer) {
                tracing::warn!(torus_id = id, "apply_constraint failed against peer projection");
            }
        }
        kernel.update_heartbeat();

        metrics.boundary_violations[id].store(kernel.boundary_violations(), Ordering::Relaxed);
        metrics.global_violations[id].store(kernel.global_violations(), Ordering::Relaxed);
        metrics.corrective_events[id].store(kernel.corrective_events(), Ordering::Relaxed);

        barrier.wait();
    }
    kernel
}

/// Drives three `BraidedKernel`s on their own threads, exchanging
/// projections through lock-free channels at each barrier cycle
/// instead of a single coordinator owning all three in sequence.
/// Semantics match [`crate::coordinator::BraidCoordinator`]; the only
/// new contract is memory ordering at the projection boundary.
pub struct ParallelRunner {
    handles: Vec<JoinHandle<BraidedKernel>>,
    channels: Arc<[Channel; 3]>,
    controls: Arc<[Control; 3]>,
    metrics: Arc<SharedMetrics>,
    barrier: Arc<Barrier>,
    interval: Arc<AtomicU64>,
    heartbeat_timeout: AtomicU64,
    stop: Arc<AtomicBool>,
    last_projections: [Option<Projection>; 3],
    /// Whether `failures_detected` has already been counted for the
    /// kernel's current failure episode, so a sustained `Failed`
    /// projection isn't recounted every exchange. Cleared once the
    /// kernel is observed healthy again.
    failure_counted: [bool; 3],
    running: bool,
}

impl ParallelRunner {
    pub fn new(initial_interval: u64) -> Result<Self, BraidError> {
        if initial_interval == 0 {
            return Err(BraidError::ZeroInterval);
        }
        Ok(Self {
            handles: Vec::new(),
            channels: Arc::new([Channel::new(), Channel::new(), Channel::new()]),
            controls: Arc::new([Control::new(), Control::new(), Control::new()]),
            metrics: Arc::new(SharedMetrics::default()),
            barrier: Arc::new(Barrier::new(4)),
            interval: Arc::new(AtomicU64::new(initial_interval)),
            heartbeat_timeout: AtomicU64::new(HEARTBEAT_TIMEOUT_MULTIPLIER * initial_interval),
            stop: Arc::new(AtomicBool::new(false)),
            last_projections: [None, None, None],
            failure_counted: [false; 3],
            running: false,
        })
    }

    #[inline]
    pub fn braid_interval(&self) -> u64 {
        self.interval.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn metrics(&self) -> BraidMetrics {
        self.metrics.snapshot()
    }

    /// Spawn the three worker threads. Each starts from a fresh
    /// `BraidedKernel` with the given torus id.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.stop.store(false, Ordering::Release);
        for id in 0..3 {
            let kernel = BraidedKernel::new(id as u32);
            let channels = self.channels.clone();
            let controls = self.controls.clone();
            let metrics = self.metrics.clone();
            let barrier = self.barrier.clone();
            let interval = self.interval.clone();
            let stop = self.stop.clone();
            self.handles.push(thread::spawn(move || {
                worker_loop(id, kernel, channels, controls, metrics, barrier, interval, stop)
            }));
        }
        self.running = true;
    }

    /// Drive `exchanges` full barrier cycles, detecting and recovering
    /// failures and adapting the interval between them, just as the
    /// sequential coordinator does within `run`.
    pub fn run_for(&mut self, exchanges: u64) {
        assert!(self.running, "ParallelRunner::start must be called first");
        for _ in 0..exchanges {
            self.barrier.wait();

            for id in 0..3 {
                if let Some(p) = self.channels[id].read() {
                    self.last_projections[id] = Some((*p).clone());
                }
            }

            self.barrier.wait();

            self.detect_and_recover();
            self.metrics
                .projection_exchanges
                .fetch_add(3, Ordering::Relaxed);
            let cycles = self.metrics.braid_cycles.fetch_add(1, Ordering::Relaxed) + 1;
            self.adaptive_interval(cycles);
        }
    }

    fn detect_and_recover(&mut self) {
        let now = self
            .last_projections
            .iter()
            .filter_map(|p| p.as_ref())
            .map(|p| p.current_time)
            .max()
            .unwrap_or(0);
        let timeout = self.heartbeat_timeout.load(Ordering::Relaxed);

        for id in 0..3 {
            let Some(p) = &self.last_projections[id] else {
                continue;
            };
            let stale = now.saturating_sub(p.heartbeat) >= timeout;
            if p.health == HealthStatus::Failed || stale {
                if !self.failure_counted[id] {
                    self.controls[id].request_failure();
                    self.metrics.failures_detected.fetch_add(1, Ordering::Relaxed);
                    self.failure_counted[id] = true;
                }
            } else {
                self.failure_counted[id] = false;
            }
        }

        for id in 0..3 {
            let failed_here = self
                .last_projections[id]
                .as_ref()
                .is_some_and(|p| p.health == HealthStatus::Failed);
            if !failed_here {
                continue;
            }
            let alive = (0..3)
                .filter(|&i| i != id)
                .filter(|&i| {
                    self.last_projections[i]
                        .as_ref()
                        .is_some_and(|p| p.health != HealthStatus::Failed)
                })
                .count();
            if alive >= 2 {
                if let Some(projection) = self.last_projections[id].clone() {
                    self.controls[id].request_restore(projection);
                } else {
                    tracing::error!(torus_id = id, "no cached projection; cannot reconstruct");
                }
            } else {
                tracing::error!(torus_id = id, "2-of-3 precondition lost; reconstruction withheld");
            }
        }
    }

    fn adaptive_interval(&mut self, cycles: u64) {
        if cycles < MIN_CYCLES_FOR_ADAPTATION {
            return;
        }
        let m = self.metrics.snapshot();
        let violations = (m.total_boundary_violations + m.total_global_violations) as f64;
        let rate = violations / cycles as f64;

        let current = self.interval.load(Ordering::Relaxed);
        let updated = if rate > HIGH_VIOLATION_RATE {
            ((current * 8) / 10).max(INTERVAL_FLOOR)
        } else if rate < LOW_VIOLATION_RATE {
            ((current * 12) / 10).min(INTERVAL_CEILING)
        } else {
            current
        };
        if updated != current {
            self.interval.store(updated, Ordering::Relaxed);
            self.heartbeat_timeout
                .store(HEARTBEAT_TIMEOUT_MULTIPLIER * updated, Ordering::Relaxed);
        }
    }

    /// Signal every worker to stop, release them from their current
    /// barrier wait, and join all three threads.
    pub fn stop(&mut self) -> Vec<BraidedKernel> {
        if !self.running {
            return Vec::new();
        }
        self.stop.store(true, Ordering::Release);
        // Workers may be parked at either barrier.wait() in their loop;
        // two full cycles guarantee both are released regardless of
        // where each currently sits.
        self.barrier.wait();
        self.barrier.wait();
        self.running = false;
        self.handles
            .drain(..)
            .filter_map(|h| h.join().ok())
            .collect()
    }
}

impl Drop for ParallelRunner {
    fn drop(&mut self) {
        if self.running {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        assert!(ParallelRunner::new(0).is_err());
    }

    #[test]
    fn start_run_stop_advances_metrics() {
        let mut runner = ParallelRunner::new(10).unwrap();
        runner.start();
        runner.run_for(3);
        assert_eq!(runner.metrics().braid_cycles, 3);
        assert_eq!(runner.metrics().projection_exchanges, 9);
        let kernels = runner.stop();
        assert_eq!(kernels.len(), 3);
    }

    #[test]
    fn stop_is_idempotent_without_start() {
        let mut runner = ParallelRunner::new(10).unwrap();
        assert!(runner.stop().is_empty());
    }

    #[test]
    fn failure_request_is_observed_and_reconstructed_by_owning_worker() {
        let mut runner = ParallelRunner::new(5).unwrap();
        runner.start();
        runner.run_for(1);

        runner.controls[2].request_failure();
        runner.run_for(1);
        // One more cycle lets the owning worker pick up the failure
        // flag, publish a Failed projection, and have it observed.
        runner.run_for(1);

        assert!(runner.metrics().failures_detected >= 1);
        runner.stop();
    }
}
