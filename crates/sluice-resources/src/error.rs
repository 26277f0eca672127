use thiserror::Error;

use sluice_system::SystemError;

/// Errors raised by resource construction and runtime accessors.
///
/// Construction-time failures are fatal: no partial runtime may start
/// and no networked partition may run unregistered. The two accessor
/// errors are recoverable and deliberately distinct, so callers can
/// tell "wrong thread" from "placement policy forbids this query".
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error(transparent)]
    System(#[from] SystemError),

    #[error("calling thread is not a runtime thread")]
    ForeignThread,

    #[error("partition query is disabled under shared placement")]
    PartitionQueryDisabled,

    #[error("memory registration failed: {0}")]
    RegistrationFailed(String),

    #[error("allocation of {size} byte(s) failed")]
    AllocationFailed { size: usize },
}
