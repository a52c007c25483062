//! Per-torus facade: an `RdlKernel` plus the projection/heartbeat/health
//! bookkeeping a braid needs, but a single kernel does not.

use rdl_kernel::projection::{
    BoundaryConstraint, CensusEntry, GlobalConstraintKind, HealthStatus, Projection,
    BOUNDARY_LEN, CENSUS_CAP, EMPTY_CENSUS_PID,
};
use rdl_kernel::{Cell, RdlKernel};

/// Default tolerance stamped onto a freshly extracted projection's
/// boundary constraints.
pub const DEFAULT_BOUNDARY_TOLERANCE: u8 = 2;

/// A single application of `apply_constraint` reporting at least this
/// many boundary violations marks the wrapper degraded.
pub const BOUNDARY_VIOLATION_CRITICAL: u64 = 10;

/// As above, for global constraint deviations.
pub const GLOBAL_VIOLATION_CRITICAL: u64 = 2;

/// Wraps one `RdlKernel` with the identity, heartbeat, health, and
/// violation bookkeeping a braid member needs.
pub struct BraidedKernel {
    kernel: RdlKernel,
    torus_id: u32,
    heartbeat: u64,
    health: HealthStatus,
    boundary_violations: u64,
    global_violations: u64,
    corrective_events: u64,
}

impl BraidedKernel {
    pub fn new(torus_id: u32) -> Self {
        Self {
            kernel: RdlKernel::new(),
            torus_id,
            heartbeat: 0,
            health: HealthStatus::Healthy,
            boundary_violations: 0,
            global_violations: 0,
            corrective_events: 0,
        }
    }

    #[inline]
    pub fn torus_id(&self) -> u32 {
        self.torus_id
    }

    pub fn set_torus_id(&mut self, id: u32) {
        self.torus_id = id;
    }

    #[inline]
    pub fn kernel(&self) -> &RdlKernel {
        &self.kernel
    }

    #[inline]
    pub fn kernel_mut(&mut self) -> &mut RdlKernel {
        &mut self.kernel
    }

    #[inline]
    pub fn health(&self) -> HealthStatus {
        self.health
    }

    #[inline]
    pub fn heartbeat(&self) -> u64 {
        self.heartbeat
    }

    #[inline]
    pub fn boundary_violations(&self) -> u64 {
        self.boundary_violations
    }

    #[inline]
    pub fn global_violations(&self) -> u64 {
        self.global_violations
    }

    #[inline]
    pub fn corrective_events(&self) -> u64 {
        self.corrective_events
    }

    /// Snapshot this kernel's live state into a sealed, self-verifying
    /// projection.
    pub fn extract_projection(&self) -> Projection {
        let mut p = Projection::default();
        p.torus_id = self.torus_id;
        p.local_time = self.kernel.current_time();
        p.total_events_processed = self.kernel.events_processed();
        p.current_time = self.kernel.current_time();
        p.active_processes = self.kernel.process_count() as u32;
        p.pending_events = self.kernel.pending_events() as u32;
        p.edge_count = self.kernel.edge_count() as u32;

        self.kernel.fill_boundary_states(&mut p.boundary, BOUNDARY_LEN);
        p.initialize_boundary_constraints(DEFAULT_BOUNDARY_TOLERANCE);
        p.initialize_global_constraints();

        p.heartbeat = self.heartbeat;
        p.health = self.health;

        let census = self.kernel.census();
        p.census_active_count = census.len().min(CENSUS_CAP) as u32;
        for (slot, (pid, cell_node_id, state)) in p.census.iter_mut().zip(census.into_iter()) {
            *slot = CensusEntry {
                pid,
                cell_node_id,
                state,
            };
        }

        p.seal();
        p
    }

    /// Verify and apply a peer's projection as a boundary/global
    /// constraint, emitting corrective events on the local x=31 face for
    /// each violated boundary cell. Returns `false` (and marks this
    /// wrapper degraded) if the projection fails verification, its
    /// source is marked failed, or this single application crosses the
    /// critical violation thresholds.
    pub fn apply_constraint(&mut self, projection: &Projection) -> bool {
        if !projection.verify() {
            tracing::warn!(torus_id = self.torus_id, "rejected projection: integrity check failed");
            return false;
        }
        if projection.health == HealthStatus::Failed {
            tracing::warn!(
                torus_id = self.torus_id,
                source = projection.torus_id,
                "rejected projection: source marked failed"
            );
            return false;
        }

        let mut local_boundary = [0u8; BOUNDARY_LEN];
        self.kernel.fill_boundary_states(&mut local_boundary, BOUNDARY_LEN);

        let mut boundary_violations_now = 0u64;
        let constraints: &[BoundaryConstraint] =
            &projection.boundary_constraints[..projection.boundary_constraint_count as usize];
        for c in constraints {
            let actual = local_boundary[c.cell_index as usize];
            let delta = c.expected as i32 - actual as i32;
            if delta.unsigned_abs() > c.tolerance as u32 {
                boundary_violations_now += 1;
                let y = (c.cell_index as i32) % 32;
                let z = (c.cell_index as i32) / 32;
                // Corrective events are written unconditionally to the
                // local x=31 face, preserving the source asymmetry: the
                // x=31 face "wraps" to a neighbor's x=0 face, but this
                // kernel has no neighbor handle, only the delta to apply.
                self.kernel.inject_event((31, y, z), (31, y, z), delta);
                self.corrective_events += 1;
            }
        }

        let mut global_violations_now = 0u64;
        let global = &projection.global_constraints[..projection.global_constraint_count as usize];
        for c in global {
            if !c.active {
                continue;
            }
            let actual = match c.kind {
                GlobalConstraintKind::EventConservation => self.kernel.events_processed() as i64,
                GlobalConstraintKind::TimeSync => self.kernel.current_time() as i64,
                GlobalConstraintKind::LoadBalance => self.kernel.process_count() as i64,
            };
            if (c.expected - actual).abs() > c.tolerance {
                global_violations_now += 1;
                tracing::info!(
                    torus_id = self.torus_id,
                    kind = ?c.kind,
                    expected = c.expected,
                    actual,
                    "global constraint deviation (logged only, not corrected)"
                );
            }
        }

        self.boundary_violations += boundary_violations_now;
        self.global_violations += global_violations_now;

        if boundary_violations_now >= BOUNDARY_VIOLATION_CRITICAL
            || global_violations_now >= GLOBAL_VIOLATION_CRITICAL
        {
            self.health = HealthStatus::Degraded;
            tracing::warn!(
                torus_id = self.torus_id,
                boundary_violations_now,
                global_violations_now,
                "marked degraded: critical violation threshold crossed"
            );
            return false;
        }

        true
    }

    /// Stamp the heartbeat at this kernel's current virtual time and
    /// restore healthy status, unless already marked failed.
    pub fn update_heartbeat(&mut self) {
        self.heartbeat = self.kernel.current_time();
        if self.health != HealthStatus::Failed {
            self.health = HealthStatus::Healthy;
        }
    }

    pub fn is_alive(&self, now: u64, timeout: u64) -> bool {
        self.health != HealthStatus::Failed && now.saturating_sub(self.heartbeat) < timeout
    }

    pub fn mark_failed(&mut self) {
        self.health = HealthStatus::Failed;
    }

    pub fn mark_degraded(&mut self) {
        self.health = HealthStatus::Degraded;
    }

    /// Best-effort recovery: reset the underlying kernel, then re-spawn
    /// every active census entry at its recorded cell with its recorded
    /// state. Edges, pending events, and exact timing are not
    /// recoverable from a projection and are not restored.
    pub fn restore_from_projection(&mut self, projection: &Projection) {
        self.kernel.reset();
        let entries = &projection.census[..projection.census_active_count as usize];
        for entry in entries {
            if entry.pid == EMPTY_CENSUS_PID {
                continue;
            }
            let cell = Cell::from_node_id(entry.cell_node_id as usize);
            let (ok, pid) = self.kernel.spawn_process(cell.x, cell.y, cell.z);
            if ok {
                self.kernel.set_process_state(pid, entry.state);
            }
        }
        self.heartbeat = projection.heartbeat;
        self.health = HealthStatus::Healthy;
    }

    pub fn reset(&mut self) {
        self.kernel.reset();
        self.heartbeat = 0;
        self.health = HealthStatus::Healthy;
        self.boundary_violations = 0;
        self.global_violations = 0;
        self.corrective_events = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_wrapper_is_healthy() {
        let w = BraidedKernel::new(0);
        assert_eq!(w.health(), HealthStatus::Healthy);
        assert_eq!(w.torus_id(), 0);
    }

    #[test]
    fn matching_boundary_produces_zero_violations() {
        let mut a = BraidedKernel::new(0);
        let mut b = BraidedKernel::new(1);
        a.kernel_mut().spawn_process(0, 0, 0);
        b.kernel_mut().spawn_process(0, 0, 0);
        let p = a.extract_projection();
        assert!(b.apply_constraint(&p));
        assert_eq!(b.boundary_violations(), 0);
    }

    #[test]
    fn tampered_projection_is_rejected() {
        let a = BraidedKernel::new(0);
        let mut b = BraidedKernel::new(1);
        let mut p = a.extract_projection();
        p.boundary[0] ^= 0xFF;
        assert!(!b.apply_constraint(&p));
        assert_eq!(b.boundary_violations(), 0);
    }

    #[test]
    fn failed_source_projection_is_rejected() {
        let mut a = BraidedKernel::new(0);
        a.mark_failed();
        let p = a.extract_projection();
        let mut b = BraidedKernel::new(1);
        assert!(!b.apply_constraint(&p));
    }

    #[test]
    fn restore_reproduces_census_and_heartbeat() {
        let mut a = BraidedKernel::new(0);
        a.kernel_mut().spawn_process(1, 2, 3);
        a.kernel_mut().spawn_process(4, 5, 6);
        a.kernel_mut().inject_event((1, 2, 3), (1, 2, 3), 9);
        a.kernel_mut().run(10);
        a.update_heartbeat();

        let p = a.extract_projection();

        let mut restored = BraidedKernel::new(0);
        restored.restore_from_projection(&p);

        assert_eq!(restored.heartbeat(), a.heartbeat());
        assert_eq!(restored.health(), HealthStatus::Healthy);
        assert_eq!(
            restored.kernel().process_count(),
            a.kernel().process_count()
        );
        assert_eq!(restored.kernel().process_state(0), a.kernel().process_state(0));
    }

    #[test]
    fn heartbeat_does_not_clear_failed_status() {
        // Failed -> Healthy only happens via `restore_from_projection`;
        // `update_heartbeat` must leave a failed wrapper failed.
        let mut w = BraidedKernel::new(0);
        w.mark_failed();
        assert_eq!(w.health(), HealthStatus::Failed);
        w.update_heartbeat();
        assert_eq!(w.health(), HealthStatus::Failed);
    }

    #[test]
    fn restore_from_projection_recovers_from_failed() {
        let mut w = BraidedKernel::new(0);
        w.kernel_mut().spawn_process(0, 0, 0);
        let p = w.extract_projection();
        w.mark_failed();
        assert_eq!(w.health(), HealthStatus::Failed);
        w.restore_from_projection(&p);
        assert_eq!(w.health(), HealthStatus::Healthy);
    }

    #[test]
    fn is_alive_respects_timeout() {
        let mut w = BraidedKernel::new(0);
        w.kernel_mut().spawn_process(0, 0, 0);
        w.kernel_mut().inject_event((0, 0, 0), (0, 0, 0), 1);
        w.kernel_mut().run(10);
        w.update_heartbeat();
        let now = w.heartbeat() + 5;
        assert!(w.is_alive(now, 10));
        assert!(!w.is_alive(now, 5));
    }
}
