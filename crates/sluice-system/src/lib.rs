//! Sluice-System: topology and threading layer of the sluice runtime.
//!
//! This crate discovers-or-accepts a description of the physical compute
//! topology, partitions it into addressable units, and owns the fiber task
//! queues that every other runtime component dispatches work onto.
//!
//! # Architecture
//!
//! The crate is built around a few key components:
//!
//! - [`CpuSet`]: an ordered, immutable set of logical CPU indices; the
//!   affinity key that binds queues, threads and partitions together
//! - [`Partitions`]: the static partition model computed once at startup
//!   from a [`TopologyDescription`]
//! - [`FiberTaskQueue`]: a task queue drained by a single dedicated OS
//!   thread pinned to the queue's CPU set
//! - [`ThreadingResources`]: one queue per host partition plus a system
//!   queue, with thread-local initializer registration so threads spawned
//!   later still self-register
//!
//! # Thread Safety
//!
//! Construction is single-threaded. After construction the partition model
//! is immutable and queue dispatch may be invoked concurrently from any
//! number of producers; per-queue delivery is serialized by the queue's
//! single consumer thread.

pub mod cpu_set;
pub mod error;
pub mod options;
pub mod task_queue;
pub mod threading;
pub mod topology;

pub use cpu_set::CpuSet;
pub use error::SystemError;
pub use options::{PlacementPolicy, SystemOptions};
pub use task_queue::{FiberTaskQueue, TaskHandle};
pub use threading::{ThreadLocalInitializer, ThreadingResources};
pub use topology::{
    DevicePartition, FlattenedPartition, HostPartition, Partitions, TopologyDescription,
};
