// Error taxonomy shared by the OTA and Wi-Fi state machines.
//
// Every mutating operation returns one of these synchronously; failures
// detected on background tasks surface through the registered event sink
// and the next progress/state read.

use crate::ota::verify::VerifyError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// OTA operation that requires an open session called without one.
    #[error("no upgrade in progress")]
    NotInProgress,

    #[error("upgrade already in progress")]
    AlreadyInProgress,

    /// Target partition is the running one, or not an application partition.
    #[error("partition is not a valid upgrade target")]
    InvalidTarget,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("firmware size {size} exceeds partition capacity {capacity}")]
    InsufficientSpace { size: usize, capacity: usize },

    /// Underlying flash/storage driver fault.
    #[error("I/O fault: {0}")]
    IoFault(String),

    #[error("timed out")]
    Timeout,

    #[error("firmware image rejected: {0}")]
    Verify(#[from] VerifyError),

    #[error("upgrade aborted")]
    Aborted,

    /// Persisted data present but unreadable (bad version tag or garbage).
    #[error("stored data corrupt: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
