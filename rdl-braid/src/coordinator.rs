//! Sequential braid coordinator: three kernels, cyclic projection
//! exchange, failure detection, 2-of-3 reconstruction, adaptive
//! interval.

use crate::error::BraidError;
use crate::wrapper::BraidedKernel;
use rdl_kernel::projection::{HealthStatus, Projection, EMPTY_CENSUS_PID};
use rdl_kernel::Cell;

pub const INTERVAL_FLOOR: u64 = 100;
pub const INTERVAL_CEILING: u64 = 10_000;
pub const HEARTBEAT_TIMEOUT_MULTIPLIER: u64 = 3;
pub const MIN_CYCLES_FOR_ADAPTATION: u64 = 10;
pub const HIGH_VIOLATION_RATE: f64 = 0.05;
pub const LOW_VIOLATION_RATE: f64 = 0.025;

/// The exchange phase a cycle is currently in. One full cycle visits
/// all three, ending back where it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AProjects,
    BProjects,
    CProjects,
}

impl Phase {
    fn next(self) -> Self {
        match self {
            Phase::AProjects => Phase::BProjects,
            Phase::BProjects => Phase::CProjects,
            Phase::CProjects => Phase::AProjects,
        }
    }
}

/// Cumulative braid-level counters, surfaced to embedders unchanged by
/// per-kernel reset or reconstruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct BraidMetrics {
    pub braid_cycles: u64,
    pub projection_exchanges: u64,
    pub failures_detected: u64,
    pub reconstructions: u64,
    pub migrations: u64,
    pub total_boundary_violations: u64,
    pub total_global_violations: u64,
    pub corrective_events: u64,
}

pub struct BraidCoordinator {
    kernels: [BraidedKernel; 3],
    phase: Phase,
    braid_interval: u64,
    heartbeat_timeout: u64,
    current_tick: u64,
    last_braid_tick: u64,
    last_projections: [Option<Projection>; 3],
    metrics: BraidMetrics,
}

impl BraidCoordinator {
    pub fn new(initial_interval: u64) -> Result<Self, BraidError> {
        if initial_interval == 0 {
            return Err(BraidError::ZeroInterval);
        }
        Ok(Self {
            kernels: [
                BraidedKernel::new(0),
                BraidedKernel::new(1),
                BraidedKernel::new(2),
            ],
            phase: Phase::AProjects,
            braid_interval: initial_interval,
            heartbeat_timeout: HEARTBEAT_TIMEOUT_MULTIPLIER * initial_interval,
            current_tick: 0,
            last_braid_tick: 0,
            last_projections: [None, None, None],
            metrics: BraidMetrics::default(),
        })
    }

    #[inline]
    pub fn kernel(&self, torus_id: usize) -> &BraidedKernel {
        &self.kernels[torus_id]
    }

    #[inline]
    pub fn kernel_mut(&mut self, torus_id: usize) -> &mut BraidedKernel {
        &mut self.kernels[torus_id]
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn braid_interval(&self) -> u64 {
        self.braid_interval
    }

    #[inline]
    pub fn heartbeat_timeout(&self) -> u64 {
        self.heartbeat_timeout
    }

    #[inline]
    pub fn metrics(&self) -> BraidMetrics {
        self.metrics
    }

    /// Advance `ticks` logical steps, running a braid exchange and
    /// failure-detection pass whenever `braid_interval` ticks have
    /// elapsed since the last one.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            for k in self.kernels.iter_mut() {
                if k.health() != HealthStatus::Failed {
                    k.kernel_mut().tick();
                }
            }
            self.current_tick += 1;

            if self.current_tick - self.last_braid_tick >= self.braid_interval {
                self.perform_braid_exchange();
                self.detect_and_recover();
                self.last_braid_tick = self.current_tick;
            }
        }
    }

    /// Extract all three projections, cache them for reconstruction,
    /// refresh heartbeats, then apply A→B, B→C, C→A in turn. A failed
    /// `apply_constraint` is logged and does not abort the exchange.
    pub fn perform_braid_exchange(&mut self) {
        let projections = [
            self.kernels[0].extract_projection(),
            self.kernels[1].extract_projection(),
            self.kernels[2].extract_projection(),
        ];
        for (slot, p) in self.last_projections.iter_mut().zip(projections.iter()) {
            *slot = Some(p.clone());
        }
        for k in self.kernels.iter_mut() {
            k.update_heartbeat();
        }

        self.phase = Phase::AProjects;
        if !self.kernels[1].apply_constraint(&projections[0]) {
            tracing::warn!(torus_id = 1, "apply_constraint failed against A's projection");
        }

        self.phase = Phase::BProjects;
        if !self.kernels[2].apply_constraint(&projections[1]) {
            tracing::warn!(torus_id = 2, "apply_constraint failed against B's projection");
        }

        self.phase = Phase::CProjects;
        if !self.kernels[0].apply_constraint(&projections[2]) {
            tracing::warn!(torus_id = 0, "apply_constraint failed against C's projection");
        }

        self.phase = Phase::AProjects;

        self.metrics.projection_exchanges += 3;
        self.metrics.braid_cycles += 1;
        self.metrics.total_boundary_violations =
            self.kernels.iter().map(|k| k.boundary_violations()).sum();
        self.metrics.total_global_violations =
            self.kernels.iter().map(|k| k.global_violations()).sum();
        self.metrics.corrective_events = self.kernels.iter().map(|k| k.corrective_events()).sum();

        tracing::info!(
            braid_cycles = self.metrics.braid_cycles,
            "braid exchange complete"
        );

        self.adaptive_interval();
    }

    /// Mark any kernel whose heartbeat has exceeded `heartbeat_timeout`
    /// as failed, then reconstruct it if at least two kernels remain
    /// alive.
    pub fn detect_and_recover(&mut self) {
        let now = self
            .kernels
            .iter()
            .map(|k| k.kernel().current_time())
            .max()
            .unwrap_or(0);

        for (i, k) in self.kernels.iter_mut().enumerate() {
            if k.health() != HealthStatus::Failed && !k.is_alive(now, self.heartbeat_timeout) {
                k.mark_failed();
                self.metrics.failures_detected += 1;
                tracing::error!(torus_id = i, "heartbeat timeout: marked failed");
            }
        }

        // Reconstruct every currently-failed kernel, not only ones just
        // detected this call: a kernel can also reach Failed via an
        // explicit `mark_failed` between calls.
        let failed: Vec<usize> = (0..3)
            .filter(|&i| self.kernels[i].health() == HealthStatus::Failed)
            .collect();
        for torus_id in failed {
            let alive = self
                .kernels
                .iter()
                .filter(|k| k.health() != HealthStatus::Failed)
                .count();
            if alive >= 2 {
                self.reconstruct(torus_id);
            } else {
                tracing::error!(
                    torus_id,
                    "2-of-3 precondition lost; reconstruction withheld"
                );
            }
        }
    }

    /// Rebuild `torus_id` from its last cached projection: migrate its
    /// census onto surviving kernels round-robin, reset its pools, then
    /// restore from the projection in place.
    fn reconstruct(&mut self, torus_id: usize) {
        let Some(projection) = self.last_projections[torus_id].clone() else {
            tracing::error!(torus_id, "no cached projection; cannot reconstruct");
            return;
        };

        let survivors: Vec<usize> = (0..3)
            .filter(|&i| i != torus_id && self.kernels[i].health() != HealthStatus::Failed)
            .collect();

        if !survivors.is_empty() {
            let entries = &projection.census[..projection.census_active_count as usize];
            let mut migrated = 0usize;
            for entry in entries {
                if entry.pid == EMPTY_CENSUS_PID {
                    continue;
                }
                let target = survivors[migrated % survivors.len()];
                let cell = Cell::from_node_id(entry.cell_node_id as usize);
                let (ok, pid) = self.kernels[target].kernel_mut().spawn_process(cell.x, cell.y, cell.z);
                if ok {
                    self.kernels[target].kernel_mut().set_process_state(pid, entry.state);
                    self.metrics.migrations += 1;
                }
                migrated += 1;
            }
        }

        self.kernels[torus_id].reset();
        self.kernels[torus_id].restore_from_projection(&projection);
        self.metrics.reconstructions += 1;
        tracing::info!(torus_id, "reconstruction complete");
    }

    /// Shrink the interval 20% (floor 100) if the recent violation rate
    /// is high, grow it 20% (ceiling 10000) if low, once at least 10
    /// cycles of history exist. Recomputes `heartbeat_timeout` whenever
    /// the interval changes.
    fn adaptive_interval(&mut self) {
        if self.metrics.braid_cycles < MIN_CYCLES_FOR_ADAPTATION {
            return;
        }
        let violations =
            (self.metrics.total_boundary_violations + self.metrics.total_global_violations) as f64;
        let rate = violations / self.metrics.braid_cycles as f64;

        if rate > HIGH_VIOLATION_RATE {
            self.braid_interval = ((self.braid_interval * 8) / 10).max(INTERVAL_FLOOR);
            self.heartbeat_timeout = HEARTBEAT_TIMEOUT_MULTIPLIER * self.braid_interval;
            tracing::info!(rate, interval = self.braid_interval, "shrinking braid interval");
        } else if rate < LOW_VIOLATION_RATE {
            self.braid_interval = ((self.braid_interval * 12) / 10).min(INTERVAL_CEILING);
            self.heartbeat_timeout = HEARTBEAT_TIMEOUT_MULTIPLIER * self.braid_interval;
            tracing::info!(rate, interval = self.braid_interval, "growing braid interval");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        assert!(BraidCoordinator::new(0).is_err());
    }

    #[test]
    fn exchange_updates_metrics_and_caches_projections() {
        let mut c = BraidCoordinator::new(100).unwrap();
        c.kernel_mut(0).kernel_mut().spawn_process(0, 0, 0);
        c.perform_braid_exchange();
        assert_eq!(c.metrics().braid_cycles, 1);
        assert_eq!(c.metrics().projection_exchanges, 3);
    }

    #[test]
    fn failure_is_detected_and_reconstructed_when_two_survive() {
        let mut c = BraidCoordinator::new(5).unwrap();
        for id in 0..3 {
            c.kernel_mut(id).kernel_mut().spawn_process(id as i32, 0, 0);
        }
        c.perform_braid_exchange();
        c.kernel_mut(2).mark_failed();

        c.detect_and_recover();

        assert_eq!(c.kernel(2).health(), HealthStatus::Healthy);
        assert_eq!(c.metrics().reconstructions, 1);
    }

    #[test]
    fn recovery_is_withheld_when_only_one_kernel_survives() {
        let mut c = BraidCoordinator::new(5).unwrap();
        c.perform_braid_exchange();
        c.kernel_mut(0).mark_failed();
        c.kernel_mut(1).mark_failed();
        c.kernel_mut(2).mark_failed();

        c.detect_and_recover();

        assert_eq!(c.kernel(0).health(), HealthStatus::Failed);
        assert_eq!(c.metrics().reconstructions, 0);
    }

    #[test]
    fn run_drives_exchanges_at_the_configured_interval() {
        let mut c = BraidCoordinator::new(3).unwrap();
        c.run(9);
        assert_eq!(c.metrics().braid_cycles, 3);
    }
}
