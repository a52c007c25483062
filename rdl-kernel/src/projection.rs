//! Fixed-layout projection: the summary a kernel exposes to its braid
//! peers. Little-endian, no padding, integrity-hashed with 64-bit
//! FNV-1a over an exact wire layout with every field accounted for.

use fnv::FnvHasher;
use std::hash::Hasher;

pub const BOUNDARY_LEN: usize = 1024;
pub const MAX_BOUNDARY_CONSTRAINTS: usize = 32;
pub const MAX_GLOBAL_CONSTRAINTS: usize = 4;
pub const CENSUS_CAP: usize = 64;
pub const LEGACY_CONSTRAINT_LEN: usize = 16;

/// Sentinel `torus_id` produced by `deserialize` on a size mismatch.
pub const INVALID_TORUS_ID: u32 = 0xFFFF_FFFF;

/// Sentinel pid marking an unused census slot.
pub const EMPTY_CENSUS_PID: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy = 0,
    Degraded = 1,
    Failed = 2,
}

impl HealthStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => HealthStatus::Degraded,
            2 => HealthStatus::Failed,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalConstraintKind {
    EventConservation = 0,
    TimeSync = 1,
    LoadBalance = 2,
}

impl GlobalConstraintKind {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => GlobalConstraintKind::TimeSync,
            2 => GlobalConstraintKind::LoadBalance,
            _ => GlobalConstraintKind::EventConservation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundaryConstraint {
    pub cell_index: u32,
    pub expected: u8,
    pub tolerance: u8,
}

impl Default for BoundaryConstraint {
    fn default() -> Self {
        Self {
            cell_index: 0,
            expected: 0,
            tolerance: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GlobalConstraint {
    pub kind: GlobalConstraintKind,
    pub active: bool,
    pub expected: i64,
    pub tolerance: i64,
}

impl Default for GlobalConstraint {
    fn default() -> Self {
        Self {
            kind: GlobalConstraintKind::EventConservation,
            active: false,
            expected: 0,
            tolerance: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CensusEntry {
    pub pid: u32,
    pub cell_node_id: u32,
    pub state: i32,
}

impl Default for CensusEntry {
    fn default() -> Self {
        Self {
            pid: EMPTY_CENSUS_PID,
            cell_node_id: 0,
            state: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub torus_id: u32,
    pub local_time: u64,

    pub total_events_processed: u64,
    pub current_time: u64,
    pub active_processes: u32,
    pub pending_events: u32,
    pub edge_count: u32,

    pub boundary: [u8; BOUNDARY_LEN],

    pub boundary_constraints: [BoundaryConstraint; MAX_BOUNDARY_CONSTRAINTS],
    pub boundary_constraint_count: u32,

    pub global_constraints: [GlobalConstraint; MAX_GLOBAL_CONSTRAINTS],
    pub global_constraint_count: u32,

    /// Legacy 16xint32 constraint vector carried for layout compatibility;
    /// unused by `apply_constraint`.
    pub legacy_constraint_vector: [i32; LEGACY_CONSTRAINT_LEN],

    pub heartbeat: u64,
    pub health: HealthStatus,

    pub census: [CensusEntry; CENSUS_CAP],
    pub census_active_count: u32,

    pub hash: u64,
}

/// Exact serialized size: identity + counters + boundary array +
/// constraint tables + legacy vector + heartbeat/health + census + hash.
pub const SERIALIZED_LEN: usize = 4 // torus_id
    + 8 // local_time
    + 8 + 8 + 4 + 4 + 4 // counters
    + BOUNDARY_LEN
    + 4 + MAX_BOUNDARY_CONSTRAINTS * (4 + 1 + 1)
    + 4 + MAX_GLOBAL_CONSTRAINTS * (1 + 1 + 8 + 8)
    + LEGACY_CONSTRAINT_LEN * 4
    + 8 + 1 // heartbeat + health
    + 4 + CENSUS_CAP * (4 + 4 + 4)
    + 8; // hash

impl Default for Projection {
    fn default() -> Self {
        Self {
            torus_id: 0,
            local_time: 0,
            total_events_processed: 0,
            current_time: 0,
            active_processes: 0,
            pending_events: 0,
            edge_count: 0,
            boundary: [0; BOUNDARY_LEN],
            boundary_constraints: [BoundaryConstraint::default(); MAX_BOUNDARY_CONSTRAINTS],
            boundary_constraint_count: 0,
            global_constraints: [GlobalConstraint::default(); MAX_GLOBAL_CONSTRAINTS],
            global_constraint_count: 0,
            legacy_constraint_vector: [0; LEGACY_CONSTRAINT_LEN],
            heartbeat: 0,
            health: HealthStatus::Healthy,
            census: [CensusEntry::default(); CENSUS_CAP],
            census_active_count: 0,
            hash: 0,
        }
    }
}

impl Projection {
    /// FNV-1a over every field but `hash` itself, in layout order. The
    /// boundary array is strided (every 8th cell) to bound hash cost to a
    /// few hundred bytes regardless of lattice size.
    pub fn compute_hash(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write_u32(self.torus_id);
        hasher.write_u64(self.local_time);
        hasher.write_u64(self.total_events_processed);
        hasher.write_u64(self.current_time);
        hasher.write_u32(self.active_processes);
        hasher.write_u32(self.pending_events);
        hasher.write_u32(self.edge_count);

        let mut i = 0;
        while i < BOUNDARY_LEN {
            hasher.write_u8(self.boundary[i]);
            i += 8;
        }

        hasher.write_u32(self.boundary_constraint_count);
        for c in &self.boundary_constraints {
            hasher.write_u32(c.cell_index);
            hasher.write_u8(c.expected);
            hasher.write_u8(c.tolerance);
        }

        hasher.write_u32(self.global_constraint_count);
        for c in &self.global_constraints {
            hasher.write_u8(c.kind as u8);
            hasher.write_u8(c.active as u8);
            hasher.write_i64(c.expected);
            hasher.write_i64(c.tolerance);
        }

        for v in &self.legacy_constraint_vector {
            hasher.write_i32(*v);
        }

        hasher.write_u64(self.heartbeat);
        hasher.write_u8(self.health as u8);

        hasher.write_u32(self.census_active_count);
        for entry in &self.census {
            hasher.write_u32(entry.pid);
            hasher.write_u32(entry.cell_node_id);
            hasher.write_i32(entry.state);
        }

        hasher.finish()
    }

    /// Set `hash` from `compute_hash`. The writer's side of the
    /// integrity contract.
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Recompute and compare. The reader's side of the integrity
    /// contract; `false` means reject, don't apply.
    pub fn verify(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// Sample 32 of the 1024 boundary cells at stride 32 as boundary
    /// constraints, with `expected` set to the current boundary value.
    pub fn initialize_boundary_constraints(&mut self, tolerance: u8) {
        self.boundary_constraint_count = 0;
        let mut i = 0;
        while i < BOUNDARY_LEN && (self.boundary_constraint_count as usize) < MAX_BOUNDARY_CONSTRAINTS {
            self.boundary_constraints[self.boundary_constraint_count as usize] = BoundaryConstraint {
                cell_index: i as u32,
                expected: self.boundary[i],
                tolerance,
            };
            self.boundary_constraint_count += 1;
            i += 32;
        }
    }

    /// Fill the three canonical global constraints from current counters
    /// with conservative default tolerances; the fourth slot stays
    /// inactive.
    pub fn initialize_global_constraints(&mut self) {
        self.global_constraints = [GlobalConstraint::default(); MAX_GLOBAL_CONSTRAINTS];
        self.global_constraints[0] = GlobalConstraint {
            kind: GlobalConstraintKind::EventConservation,
            active: true,
            expected: self.total_events_processed as i64,
            tolerance: 1000,
        };
        self.global_constraints[1] = GlobalConstraint {
            kind: GlobalConstraintKind::TimeSync,
            active: true,
            expected: self.current_time as i64,
            tolerance: 1000,
        };
        self.global_constraints[2] = GlobalConstraint {
            kind: GlobalConstraintKind::LoadBalance,
            active: true,
            expected: self.active_processes as i64,
            tolerance: 100,
        };
        // global_constraints[3] stays at its inactive default.
        self.global_constraint_count = 3;
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SERIALIZED_LEN);
        buf.extend_from_slice(&self.torus_id.to_le_bytes());
        buf.extend_from_slice(&self.local_time.to_le_bytes());
        buf.extend_from_slice(&self.total_events_processed.to_le_bytes());
        buf.extend_from_slice(&self.current_time.to_le_bytes());
        buf.extend_from_slice(&self.active_processes.to_le_bytes());
        buf.extend_from_slice(&self.pending_events.to_le_bytes());
        buf.extend_from_slice(&self.edge_count.to_le_bytes());
        buf.extend_from_slice(&self.boundary);
        buf.extend_from_slice(&self.boundary_constraint_count.to_le_bytes());
        for c in &self.boundary_constraints {
            buf.extend_from_slice(&c.cell_index.to_le_bytes());
            buf.push(c.expected);
            buf.push(c.tolerance);
        }
        buf.extend_from_slice(&self.global_constraint_count.to_le_bytes());
        for c in &self.global_constraints {
            buf.push(c.kind as u8);
            buf.push(c.active as u8);
            buf.extend_from_slice(&c.expected.to_le_bytes());
            buf.extend_from_slice(&c.tolerance.to_le_bytes());
        }
        for v in &self.legacy_constraint_vector {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&self.heartbeat.to_le_bytes());
        buf.push(self.health as u8);
        buf.extend_from_slice(&self.census_active_count.to_le_bytes());
        for entry in &self.census {
            buf.extend_from_slice(&entry.pid.to_le_bytes());
            buf.extend_from_slice(&entry.cell_node_id.to_le_bytes());
            buf.extend_from_slice(&entry.state.to_le_bytes());
        }
        buf.extend_from_slice(&self.hash.to_le_bytes());
        debug_assert_eq!(buf.len(), SERIALIZED_LEN);
        buf
    }

    /// Bit-for-bit parse. A mismatched buffer size produces a
    /// `Projection` with `torus_id = INVALID_TORUS_ID`, which consumers
    /// treat as invalid, instead of an `Option`/`Result` for this one
    /// case on the wire-decoding boundary.
    pub fn deserialize(buf: &[u8]) -> Self {
        if buf.len() != SERIALIZED_LEN {
            let mut invalid = Projection::default();
            invalid.torus_id = INVALID_TORUS_ID;
            return invalid;
        }

        let mut cursor = 0usize;
        macro_rules! take {
            ($n:expr) => {{
                let slice = &buf[cursor..cursor + $n];
                cursor += $n;
                slice
            }};
        }

        let torus_id = u32::from_le_bytes(take!(4).try_into().unwrap());
        let local_time = u64::from_le_bytes(take!(8).try_into().unwrap());
        let total_events_processed = u64::from_le_bytes(take!(8).try_into().unwrap());
        let current_time = u64::from_le_bytes(take!(8).try_into().unwrap());
        let active_processes = u32::from_le_bytes(take!(4).try_into().unwrap());
        let pending_events = u32::from_le_bytes(take!(4).try_into().unwrap());
        let edge_count = u32::from_le_bytes(take!(4).try_into().unwrap());

        let mut boundary = [0u8; BOUNDARY_LEN];
        boundary.copy_from_slice(take!(BOUNDARY_LEN));

        let boundary_constraint_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        let mut boundary_constraints = [BoundaryConstraint::default(); MAX_BOUNDARY_CONSTRAINTS];
        for c in boundary_constraints.iter_mut() {
            let cell_index = u32::from_le_bytes(take!(4).try_into().unwrap());
            let expected = take!(1)[0];
            let tolerance = take!(1)[0];
            *c = BoundaryConstraint {
                cell_index,
                expected,
                tolerance,
            };
        }

        let global_constraint_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        let mut global_constraints = [GlobalConstraint::default(); MAX_GLOBAL_CONSTRAINTS];
        for c in global_constraints.iter_mut() {
            let kind = GlobalConstraintKind::from_u8(take!(1)[0]);
            let active = take!(1)[0] != 0;
            let expected = i64::from_le_bytes(take!(8).try_into().unwrap());
            let tolerance = i64::from_le_bytes(take!(8).try_into().unwrap());
            *c = GlobalConstraint {
                kind,
                active,
                expected,
                tolerance,
            };
        }

        let mut legacy_constraint_vector = [0i32; LEGACY_CONSTRAINT_LEN];
        for v in legacy_constraint_vector.iter_mut() {
            *v = i32::from_le_bytes(take!(4).try_into().unwrap());
        }

        let heartbeat = u64::from_le_bytes(take!(8).try_into().unwrap());
        let health = HealthStatus::from_u8(take!(1)[0]);

        let census_active_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        let mut census = [CensusEntry::default(); CENSUS_CAP];
        for entry in census.iter_mut() {
            let pid = u32::from_le_bytes(take!(4).try_into().unwrap());
            let cell_node_id = u32::from_le_bytes(take!(4).try_into().unwrap());
            let state = i32::from_le_bytes(take!(4).try_into().unwrap());
            *entry = CensusEntry {
                pid,
                cell_node_id,
                state,
            };
        }

        let hash = u64::from_le_bytes(take!(8).try_into().unwrap());
        debug_assert_eq!(cursor, SERIALIZED_LEN);

        Projection {
            torus_id,
            local_time,
            total_events_processed,
            current_time,
            active_processes,
            pending_events,
            edge_count,
            boundary,
            boundary_constraints,
            boundary_constraint_count,
            global_constraints,
            global_constraint_count,
            legacy_constraint_vector,
            heartbeat,
            health,
            census,
            census_active_count,
            hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Projection {
        let mut p = Projection::default();
        p.torus_id = 1;
        p.total_events_processed = 42;
        p.current_time = 7;
        p.active_processes = 3;
        for i in 0..BOUNDARY_LEN {
            p.boundary[i] = (i % 7) as u8;
        }
        p.initialize_boundary_constraints(2);
        p.initialize_global_constraints();
        p.heartbeat = 7;
        p.seal();
        p
    }

    #[test]
    fn verify_true_when_untampered() {
        let p = sample();
        assert!(p.verify());
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let p = sample();
        let bytes = p.serialize();
        assert_eq!(bytes.len(), SERIALIZED_LEN);
        let back = Projection::deserialize(&bytes);
        assert_eq!(back.torus_id, p.torus_id);
        assert_eq!(back.total_events_processed, p.total_events_processed);
        assert_eq!(back.boundary, p.boundary);
        assert!(back.verify());
    }

    #[test]
    fn tampering_breaks_verification() {
        let p = sample();
        let mut bytes = p.serialize();
        bytes[0] ^= 0xFF;
        let tampered = Projection::deserialize(&bytes);
        assert!(!tampered.verify());
    }

    #[test]
    fn size_mismatch_yields_sentinel_torus_id() {
        let short = vec![0u8; 10];
        let p = Projection::deserialize(&short);
        assert_eq!(p.torus_id, INVALID_TORUS_ID);
    }

    #[test]
    fn boundary_constraints_on_matching_boundary_have_zero_violation_margin() {
        let p = sample();
        for c in &p.boundary_constraints[..p.boundary_constraint_count as usize] {
            assert_eq!(c.expected, p.boundary[c.cell_index as usize]);
        }
    }
}
