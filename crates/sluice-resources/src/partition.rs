//! Per-partition resource records.
//!
//! [`PartitionResourceBase`] pairs a threading handle with a
//! `partition_id`; every per-partition resource is built on top of one.
//! [`PartitionResources`] is the per-partition façade the execution
//! layer consumes: task queue, host memory, optional device memory,
//! optional transport, created exactly once per flattened partition and
//! alive for the runtime lifetime.

use std::sync::Arc;

use sluice_system::{
    FiberTaskQueue, FlattenedPartition, HostPartition, Partitions, ThreadingResources,
};

use crate::error::ResourceError;
use crate::memory::{DeviceMemoryResources, HostMemoryResources};
use crate::transport::TransportResources;

/// Back-reference pairing the threading layer with one flattened
/// partition.
#[derive(Clone)]
pub struct PartitionResourceBase {
    threading: Arc<ThreadingResources>,
    partitions: Arc<Partitions>,
    partition_id: usize,
}

impl PartitionResourceBase {
    pub(crate) fn new(
        threading: Arc<ThreadingResources>,
        partitions: Arc<Partitions>,
        partition_id: usize,
    ) -> Self {
        debug_assert!(partition_id < partitions.flattened().len());
        Self {
            threading,
            partitions,
            partition_id,
        }
    }

    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    pub fn partition(&self) -> &FlattenedPartition {
        &self.partitions.flattened()[self.partition_id]
    }

    pub fn host(&self) -> &HostPartition {
        &self.partitions.host_partitions()[self.partition().host_partition_id()]
    }

    pub fn threading(&self) -> &Arc<ThreadingResources> {
        &self.threading
    }

    /// This partition's host task queue.
    pub fn task_queue(&self) -> Result<&FiberTaskQueue, ResourceError> {
        Ok(self.threading.get_task_queue(self.host().cpu_set())?)
    }

    /// The queue bound to this host's network-dedicated CPU set.
    pub fn network_queue(&self) -> Result<&FiberTaskQueue, ResourceError> {
        Ok(self.threading.get_task_queue(&self.host().network_cpu_set())?)
    }
}

/// The per-partition resource bundle.
///
/// The optional device and network slots live inside the record itself,
/// so a partition's resources can never fall out of alignment with a
/// parallel vector.
pub struct PartitionResources {
    base: PartitionResourceBase,
    host: Arc<HostMemoryResources>,
    device: Option<DeviceMemoryResources>,
    network: Option<TransportResources>,
}

impl PartitionResources {
    pub(crate) fn new(
        base: PartitionResourceBase,
        host: Arc<HostMemoryResources>,
        device: Option<DeviceMemoryResources>,
        network: Option<TransportResources>,
    ) -> Self {
        Self {
            base,
            host,
            device,
            network,
        }
    }

    pub fn partition_id(&self) -> usize {
        self.base.partition_id()
    }

    pub fn partition(&self) -> &FlattenedPartition {
        self.base.partition()
    }

    pub fn task_queue(&self) -> Result<&FiberTaskQueue, ResourceError> {
        self.base.task_queue()
    }

    pub fn host(&self) -> &Arc<HostMemoryResources> {
        &self.host
    }

    pub fn device(&self) -> Option<&DeviceMemoryResources> {
        self.device.as_ref()
    }

    pub fn network(&self) -> Option<&TransportResources> {
        self.network.as_ref()
    }
}
