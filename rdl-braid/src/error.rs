use thiserror::Error;

/// Construction-time validation failures. Never raised by the hot paths
/// (tick, exchange, reconstruction), which stay total per the kernel's
/// own error taxonomy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BraidError {
    #[error("braid interval must be nonzero")]
    ZeroInterval,
}
