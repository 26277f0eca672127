//! Sluice-Resources: per-partition resource bundles and the runtime
//! orchestrator.
//!
//! Everything above this layer (pipeline construction, operator
//! scheduling, language bindings) consumes compute exclusively through
//! the objects built here: one [`PartitionResources`] per flattened
//! partition, combining a task-queue handle, host memory, optional
//! device memory and optional transport, all assembled in strict order
//! by [`SystemResources`].
//!
//! # Construction ordering
//!
//! The orchestrator is deliberately synchronous and single-threaded;
//! every assembly invariant (registration caches seeing every sibling
//! transport, device memory registering against its own transport,
//! thread-local bindings installed last) follows from the strict step
//! order in [`SystemResources::new`]. After construction the resource
//! vectors are immutable and indexed by `partition_id` only.

mod context;

pub mod error;
pub mod memory;
pub mod partition;
pub mod registration;
pub mod system;
pub mod transport;

pub use error::ResourceError;
pub use memory::{DeviceMemoryResources, HostBuffer, HostMemoryResources};
pub use partition::{PartitionResourceBase, PartitionResources};
pub use registration::{RegistrationCache, RegistrationCallbackBuilder, RegistrationHandle};
pub use system::SystemResources;
pub use transport::{TransportContext, TransportResources, TransportWorker, WorkerRole};
