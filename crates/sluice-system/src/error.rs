use thiserror::Error;

use crate::cpu_set::CpuSet;

/// Errors raised by the topology and threading layer.
///
/// Configuration errors are fatal at startup: no partial runtime may
/// start on top of an invalid partition model. Queue errors surface
/// programming mistakes (dispatching to a CPU set no queue was built
/// for) or a queue whose consumer thread has already shut down.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("host partition {host_partition_id} has an empty cpu set")]
    EmptyCpuSet { host_partition_id: usize },

    #[error("host partitions {first} and {second} claim overlapping cpu sets")]
    OverlappingCpuSets { first: usize, second: usize },

    #[error("device '{device}' references nonexistent host partition {host_partition_id}")]
    UnknownHostPartition {
        device: String,
        host_partition_id: usize,
    },

    #[error("topology describes no host partitions")]
    NoHostPartitions,

    #[error("no task queue exists for cpu set {0}")]
    UnknownTaskQueue(CpuSet),

    #[error("task queue '{0}' disconnected before the task completed")]
    QueueDisconnected(String),

    #[error("failed to spawn thread '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
