//! Single-node Recursive-Delay-Logic execution kernel.
//!
//! A kernel owns a 32x32x32 toroidal lattice of cells, a bounded pool of
//! processes and edges, and a virtual-time event queue. Processes emit
//! delayed follow-up events along their out-edges as events are
//! delivered; `RdlKernel::run` drains the queue up to a caller-supplied
//! budget. Every public operation is total: capacity exhaustion reports
//! through a `bool`/count return, never a panic, except for the
//! documented internal-invariant violations noted on `flush_pending_events`.
//!
//! `rdl-braid` builds on this crate to run three kernels side by side
//! and exchange [`projection::Projection`] snapshots between them.

pub mod event;
pub mod kernel;
pub mod pool;
pub mod process;
pub mod projection;
pub mod queue;
pub mod torus;

pub use kernel::{RdlKernel, Telemetry, MAX_EDGES, MAX_EVENTS, MAX_PROCESSES};
pub use pool::{Pool, INVALID_INDEX};
pub use projection::{HealthStatus, Projection};
pub use torus::{Cell, Torus, CELL_COUNT, CELL_PROCESS_CAPACITY, LATTICE_DIM};

/// Re-exports convenient for downstream crates that just want the kernel
/// and its wire type.
pub mod prelude {
    pub use crate::kernel::{RdlKernel, Telemetry};
    pub use crate::projection::{HealthStatus, Projection};
    pub use crate::torus::Cell;
}
