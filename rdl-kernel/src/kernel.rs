//! The RDL kernel: tick loop, pools, torus and event queue tied together
//! behind a thread-affine, total (bool/count-returning) API.

use crate::event::Event;
use crate::pool::{Pool, INVALID_INDEX};
use crate::process::{Edge, Process};
use crate::queue::EventQueue;
use crate::torus::{Cell, Torus, CELL_COUNT};
use arrayvec::ArrayVec;
use parking_lot::Mutex;

pub const MAX_PROCESSES: usize = 16_384;
pub const MAX_EDGES: usize = 32_768;
pub const MAX_EVENTS: usize = 65_536;
pub const STAGING_CAPACITY: usize = 256;

/// Telemetry exposed by the embedding API, fields in the stable order the
/// interface table specifies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Telemetry {
    pub events_processed: u64,
    pub current_time: u64,
    pub process_count: usize,
    pub memory_used: usize,
}

pub struct RdlKernel {
    processes: Pool<Process>,
    edges: Pool<Edge>,
    torus: Torus,
    queue: EventQueue,

    current_time: u64,
    sequence_counter: u64,
    events_processed: u64,
    next_process_id: u32,
    overflow_count: u64,

    staging: Mutex<ArrayVec<Event, STAGING_CAPACITY>>,
}

impl RdlKernel {
    pub fn new() -> Self {
        Self {
            processes: Pool::new(MAX_PROCESSES),
            edges: Pool::new(MAX_EDGES),
            torus: Torus::new(),
            queue: EventQueue::new(MAX_EVENTS),
            current_time: 0,
            sequence_counter: 0,
            events_processed: 0,
            next_process_id: 0,
            overflow_count: 0,
            staging: Mutex::new(ArrayVec::new()),
        }
    }

    /// Acquire a process slot, pin it to `(x, y, z)`, and add it to the
    /// cell's process list. Fails if either pool is full, or the cell's
    /// per-cell capacity is exceeded.
    pub fn spawn_process(&mut self, x: i32, y: i32, z: i32) -> (bool, u32) {
        if self.processes.occupied() >= self.processes.capacity() {
            return (false, INVALID_INDEX);
        }
        let cell = Cell::new(x, y, z);
        let pid = self.next_process_id;
        let process = Process {
            id: pid,
            cell,
            state: 0,
            out_edges_head: INVALID_INDEX,
            live: true,
        };
        let idx = self.processes.acquire(process);
        if idx == INVALID_INDEX {
            return (false, INVALID_INDEX);
        }
        if !self.torus.add_process(cell, idx) {
            self.processes.release(idx);
            return (false, INVALID_INDEX);
        }
        self.next_process_id += 1;
        (true, idx)
    }

    /// The deterministic "first by id" process in a cell. Process ids are
    /// assigned in pool-acquisition order and a process is never released
    /// individually (only a full kernel reset clears the pool), so a
    /// process's id and its pool index coincide for the kernel's entire
    /// lifetime; the minimum pool index is therefore the minimum id.
    fn first_process_in_cell(&self, cell: Cell) -> Option<u32> {
        self.torus.processes_in(cell).iter().copied().min()
    }

    /// Resolve source and destination processes by the deterministic
    /// "first by id" rule, acquire an edge slot, and link it into the
    /// source's out-list. Fails if the pool is full or either endpoint is
    /// absent.
    pub fn create_edge(
        &mut self,
        src_xyz: (i32, i32, i32),
        dst_xyz: (i32, i32, i32),
        delay: u64,
    ) -> bool {
        let src_cell = Cell::new(src_xyz.0, src_xyz.1, src_xyz.2);
        let dst_cell = Cell::new(dst_xyz.0, dst_xyz.1, dst_xyz.2);
        let Some(src_idx) = self.first_process_in_cell(src_cell) else {
            return false;
        };
        let Some(dst_idx) = self.first_process_in_cell(dst_cell) else {
            return false;
        };
        let (src_pid, dst_pid, current_head) = {
            let src = self.processes.get(src_idx).unwrap();
            let dst = self.processes.get(dst_idx).unwrap();
            (src.id, dst.id, src.out_edges_head)
        };
        let edge_idx = self.edges.acquire(Edge {
            src_pid,
            dst_pid,
            delay,
            next: current_head,
        });
        if edge_idx == INVALID_INDEX {
            return false;
        }
        self.processes.get_mut(src_idx).unwrap().out_edges_head = edge_idx;
        true
    }

    /// Stage an event for cross-thread injection. Does not suspend;
    /// takes the staging mutex only long enough to append. Returns `true`
    /// if staging had room.
    pub fn inject_event(
        &self,
        dst_xyz: (i32, i32, i32),
        src_xyz: (i32, i32, i32),
        payload: i32,
    ) -> bool {
        let dst_cell = Cell::new(dst_xyz.0, dst_xyz.1, dst_xyz.2);
        let src_cell = Cell::new(src_xyz.0, src_xyz.1, src_xyz.2);
        let mut staging = self.staging.lock();
        let event = Event {
            // timestamp/sequence are provisional; flush_pending_events
            // stamps the authoritative sequence at drain time so
            // ordering reflects flush order, not injection-call order,
            // across concurrent injectors.
            timestamp: self.current_time.wrapping_add(1),
            sequence: 0,
            dst_cell,
            src_cell,
            payload,
        };
        staging.try_push(event).is_ok()
    }

    /// Move all staged events into the main heap, stamping each with the
    /// next sequence number in drain order. Called at the start of every
    /// tick.
    pub fn flush_pending_events(&mut self) {
        let staged: Vec<Event> = {
            let mut staging = self.staging.lock();
            staging.drain(..).collect()
        };
        for mut event in staged {
            event.sequence = self.sequence_counter;
            self.sequence_counter += 1;
            let pushed = self.queue.push(event);
            assert!(
                pushed,
                "event queue overflow during flush: capacity {} exceeded",
                self.queue.capacity()
            );
        }
    }

    /// Flush staged events and drain the queue for one logical step,
    /// bounded only by the heap's own capacity. Equivalent to
    /// `run(MAX_EVENTS as u64)`; exposed separately because the braid
    /// layer drives kernels one `tick` at a time rather than with an
    /// explicit budget.
    pub fn tick(&mut self) -> u64 {
        self.run(MAX_EVENTS as u64)
    }

    /// Drain the queue (after flushing pending events), delivering up to
    /// `max_events` new events. Returns the number delivered in this
    /// call.
    pub fn run(&mut self, max_events: u64) -> u64 {
        self.flush_pending_events();
        let mut delivered = 0u64;
        while delivered < max_events {
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.deliver(event);
            delivered += 1;
        }
        delivered
    }

    fn deliver(&mut self, event: Event) {
        self.current_time = self.current_time.max(event.timestamp);
        self.events_processed += 1;

        let dst_cell = event.dst_cell;
        let resident: ArrayVec<u32, { crate::torus::CELL_PROCESS_CAPACITY }> =
            self.torus.processes_in(dst_cell).iter().copied().collect();

        for &idx in &resident {
            if let Some(process) = self.processes.get_mut(idx) {
                process.state = process.state.wrapping_add(event.payload);
            }
        }

        for &idx in &resident {
            let mut edge_idx = self
                .processes
                .get(idx)
                .map(|p| p.out_edges_head)
                .unwrap_or(INVALID_INDEX);
            while edge_idx != INVALID_INDEX {
                let edge = *self.edges.get(edge_idx).unwrap();
                let follow_up_dst = self.cell_of_pid(edge.dst_pid);
                if let Some(dst) = follow_up_dst {
                    let follow_up = Event {
                        timestamp: self.current_time + edge.delay,
                        sequence: self.sequence_counter,
                        dst_cell: dst,
                        src_cell: dst_cell,
                        payload: event.payload.wrapping_add(1),
                    };
                    self.sequence_counter += 1;
                    if !self.queue.push(follow_up) {
                        self.overflow_count += 1;
                    }
                }
                edge_idx = edge.next;
            }
        }
    }

    /// A process's id equals its pool index (see `first_process_in_cell`),
    /// so this is a direct O(1) lookup.
    fn cell_of_pid(&self, pid: u32) -> Option<Cell> {
        self.processes.get(pid).filter(|p| p.live).map(|p| p.cell)
    }

    /// Logically clear processes, edges, events, and both telemetry
    /// counters, preserving pool backing storage: the next
    /// `spawn_process` reuses the same memory (see `Pool::reset`).
    pub fn reset(&mut self) {
        self.processes.reset();
        self.edges.reset();
        self.torus.reset();
        self.queue.clear();
        self.staging.lock().clear();
        self.current_time = 0;
        self.sequence_counter = 0;
        self.events_processed = 0;
        self.next_process_id = 0;
        self.overflow_count = 0;
    }

    #[inline]
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    #[inline]
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    #[inline]
    pub fn process_count(&self) -> usize {
        self.processes.occupied()
    }

    #[inline]
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.occupied()
    }

    #[inline]
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// State of the process with the given pool index, or 0 if unknown.
    pub fn process_state(&self, pid: u32) -> i32 {
        self.processes.get(pid).filter(|p| p.live).map(|p| p.state).unwrap_or(0)
    }

    /// Overwrite a process's state word directly, bypassing event
    /// delivery. Used by the braided wrapper to replay a process census
    /// onto a freshly reset kernel.
    pub fn set_process_state(&mut self, pid: u32, state: i32) {
        if let Some(p) = self.processes.get_mut(pid) {
            if p.live {
                p.state = state;
            }
        }
    }

    /// `(pid, cell_node_id, state)` for every live process, ordered by
    /// pid. Used by the braided wrapper to populate a projection's
    /// process census.
    pub fn census(&self) -> Vec<(u32, u32, i32)> {
        let mut out: Vec<(u32, u32, i32)> = self
            .processes
            .iter_occupied()
            .filter_map(|idx| {
                self.processes
                    .get(idx)
                    .filter(|p| p.live)
                    .map(|p| (p.id, p.cell.node_id() as u32, p.state))
            })
            .collect();
        out.sort_by_key(|(pid, _, _)| *pid);
        out
    }

    /// Write activity values for the x=0 face, row-major in (y, z), into
    /// `out`. `out` must have room for at least `len` bytes (up to 1024).
    /// A cell's activity value is its resident processes' total
    /// outgoing-edge count, modulo 256 (see DESIGN.md's resolution of the
    /// boundary-sample open question).
    pub fn fill_boundary_states(&self, out: &mut [u8], len: usize) {
        let n = len.min(out.len()).min(1024);
        for i in 0..n {
            let y = (i as i32) % 32;
            let z = (i as i32) / 32;
            let cell = Cell::new(0, y, z);
            let mut edges = 0u32;
            for &idx in self.torus.processes_in(cell) {
                if let Some(p) = self.processes.get(idx) {
                    let mut e = p.out_edges_head;
                    while e != INVALID_INDEX {
                        edges += 1;
                        e = self.edges.get(e).map(|edge| edge.next).unwrap_or(INVALID_INDEX);
                    }
                }
            }
            out[i] = (edges % 256) as u8;
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            events_processed: self.events_processed,
            current_time: self.current_time,
            process_count: self.process_count(),
            memory_used: self.memory_used(),
        }
    }

    /// Total pool-backing bytes. Constant across any sequence of
    /// operations that never exceeds capacity, and unchanged by reset.
    pub fn memory_used(&self) -> usize {
        self.processes.backing_bytes() + self.edges.backing_bytes() + CELL_COUNT * 8
    }
}

impl Default for RdlKernel {
    fn default() -> Self {
        Self::new()
    }
}
