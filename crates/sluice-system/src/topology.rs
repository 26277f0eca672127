//! Static topology partition model.
//!
//! The model is computed exactly once, at startup, from a
//! [`TopologyDescription`] produced by an external discovery collaborator
//! (or fabricated by [`TopologyDescription::detect`]). After construction
//! it is immutable for the lifetime of the process; every later layer
//! addresses resources by the dense `partition_id` assigned here.

use log::debug;

use crate::cpu_set::CpuSet;
use crate::error::SystemError;
use crate::options::PlacementPolicy;

/// Input description of the machine, as reported by topology discovery.
///
/// Discovery itself is an external collaborator; this type is only the
/// hand-off format. `hosts` lists one CPU set per NUMA-local grouping;
/// `devices` lists the attached accelerators and the host partition each
/// one is local to.
#[derive(Debug, Clone, Default)]
pub struct TopologyDescription {
    hosts: Vec<CpuSet>,
    devices: Vec<DeviceDescription>,
}

#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub name: String,
    pub host_partition_id: usize,
}

impl TopologyDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fabricates a single-host, device-less description covering every
    /// logical CPU on the machine. Used when no discovery data is
    /// available, and by tests.
    pub fn detect() -> Self {
        Self::new().add_host(CpuSet::from_indices(0..num_cpus::get()))
    }

    pub fn add_host(mut self, cpu_set: CpuSet) -> Self {
        self.hosts.push(cpu_set);
        self
    }

    pub fn add_device(mut self, name: impl Into<String>, host_partition_id: usize) -> Self {
        self.devices.push(DeviceDescription {
            name: name.into(),
            host_partition_id,
        });
        self
    }

    pub fn hosts(&self) -> &[CpuSet] {
        &self.hosts
    }

    pub fn devices(&self) -> &[DeviceDescription] {
        &self.devices
    }
}

/// A NUMA-local CPU grouping; the smallest scheduling-affinity unit.
#[derive(Debug, Clone)]
pub struct HostPartition {
    host_partition_id: usize,
    cpu_set: CpuSet,
    device_partition_ids: Vec<usize>,
}

impl HostPartition {
    pub fn host_partition_id(&self) -> usize {
        self.host_partition_id
    }

    pub fn cpu_set(&self) -> &CpuSet {
        &self.cpu_set
    }

    pub fn device_partition_ids(&self) -> &[usize] {
        &self.device_partition_ids
    }

    /// The network-dedicated CPU set of this host: the lowest CPU of the
    /// host set. Transport workers and their progress callbacks run on
    /// the task queue bound to this set.
    pub fn network_cpu_set(&self) -> CpuSet {
        // Host partitions are validated to be non-empty at construction.
        CpuSet::single(self.cpu_set.first().unwrap_or(0))
    }
}

/// One accelerator, bound to exactly one host partition.
#[derive(Debug, Clone)]
pub struct DevicePartition {
    device_partition_id: usize,
    host_partition_id: usize,
    name: String,
}

impl DevicePartition {
    pub fn device_partition_id(&self) -> usize {
        self.device_partition_id
    }

    pub fn host_partition_id(&self) -> usize {
        self.host_partition_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One addressable execution unit: a device, or a whole host when the
/// host carries no devices. The dense `partition_id` assigned here is the
/// primary addressing key for every layer above this one.
#[derive(Debug, Clone)]
pub struct FlattenedPartition {
    partition_id: usize,
    host_partition_id: usize,
    device_partition_id: Option<usize>,
}

impl FlattenedPartition {
    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    /// Always a valid index into [`Partitions::host_partitions`].
    pub fn host_partition_id(&self) -> usize {
        self.host_partition_id
    }

    pub fn device_partition_id(&self) -> Option<usize> {
        self.device_partition_id
    }

    pub fn has_device(&self) -> bool {
        self.device_partition_id.is_some()
    }
}

/// The validated, flattened partition model.
#[derive(Debug)]
pub struct Partitions {
    placement: PlacementPolicy,
    host_partitions: Vec<HostPartition>,
    device_partitions: Vec<DevicePartition>,
    flattened: Vec<FlattenedPartition>,
}

impl Partitions {
    /// Validates `description` and computes the flattened partition list.
    ///
    /// Flattened partitions are ordered host-major: all of host 0's
    /// partitions precede host 1's, and so on. Later construction steps
    /// index vectors by `partition_id` and depend on this ordering.
    ///
    /// # Errors
    ///
    /// Any inconsistency in the description (no hosts, an empty host CPU
    /// set, overlapping host CPU sets, a device naming a nonexistent
    /// host) is a fatal configuration error.
    pub fn from_description(
        description: &TopologyDescription,
        placement: PlacementPolicy,
    ) -> Result<Self, SystemError> {
        if description.hosts().is_empty() {
            return Err(SystemError::NoHostPartitions);
        }

        for (i, cpu_set) in description.hosts().iter().enumerate() {
            if cpu_set.is_empty() {
                return Err(SystemError::EmptyCpuSet {
                    host_partition_id: i,
                });
            }
            for (j, other) in description.hosts().iter().enumerate().skip(i + 1) {
                if cpu_set.intersects(other) {
                    return Err(SystemError::OverlappingCpuSets {
                        first: i,
                        second: j,
                    });
                }
            }
        }

        let mut host_partitions: Vec<HostPartition> = description
            .hosts()
            .iter()
            .enumerate()
            .map(|(i, cpu_set)| HostPartition {
                host_partition_id: i,
                cpu_set: cpu_set.clone(),
                device_partition_ids: Vec::new(),
            })
            .collect();

        let mut device_partitions = Vec::with_capacity(description.devices().len());
        for device in description.devices() {
            let host = host_partitions.get_mut(device.host_partition_id).ok_or(
                SystemError::UnknownHostPartition {
                    device: device.name.clone(),
                    host_partition_id: device.host_partition_id,
                },
            )?;
            let device_partition_id = device_partitions.len();
            host.device_partition_ids.push(device_partition_id);
            device_partitions.push(DevicePartition {
                device_partition_id,
                host_partition_id: device.host_partition_id,
                name: device.name.clone(),
            });
        }

        let mut flattened = Vec::new();
        for host in &host_partitions {
            if host.device_partition_ids.is_empty() {
                flattened.push(FlattenedPartition {
                    partition_id: flattened.len(),
                    host_partition_id: host.host_partition_id,
                    device_partition_id: None,
                });
            } else {
                for &device_partition_id in &host.device_partition_ids {
                    flattened.push(FlattenedPartition {
                        partition_id: flattened.len(),
                        host_partition_id: host.host_partition_id,
                        device_partition_id: Some(device_partition_id),
                    });
                }
            }
        }

        debug!(
            "partitioned topology: {} host partition(s), {} device(s), {} flattened partition(s)",
            host_partitions.len(),
            device_partitions.len(),
            flattened.len()
        );

        Ok(Self {
            placement,
            host_partitions,
            device_partitions,
            flattened,
        })
    }

    pub fn placement(&self) -> PlacementPolicy {
        self.placement
    }

    pub fn host_partitions(&self) -> &[HostPartition] {
        &self.host_partitions
    }

    pub fn device_partitions(&self) -> &[DevicePartition] {
        &self.device_partitions
    }

    /// Flattened partitions in host-major `partition_id` order.
    pub fn flattened(&self) -> &[FlattenedPartition] {
        &self.flattened
    }

    /// The host partition the system-wide task queue runs on.
    pub fn sys_host_partition(&self) -> &HostPartition {
        &self.host_partitions[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_is_host_major_with_valid_host_ids() {
        let description = TopologyDescription::new()
            .add_host(CpuSet::from_indices(0..4))
            .add_host(CpuSet::from_indices(4..8))
            .add_device("dev0", 0)
            .add_device("dev1", 0)
            .add_device("dev2", 1);
        let partitions =
            Partitions::from_description(&description, PlacementPolicy::Dedicated).unwrap();

        assert_eq!(partitions.flattened().len(), 3);
        let host_ids: Vec<_> = partitions
            .flattened()
            .iter()
            .map(FlattenedPartition::host_partition_id)
            .collect();
        assert_eq!(host_ids, vec![0, 0, 1]);
        for (i, partition) in partitions.flattened().iter().enumerate() {
            assert_eq!(partition.partition_id(), i);
            assert!(partition.host_partition_id() < partitions.host_partitions().len());
        }
    }

    #[test]
    fn deviceless_host_becomes_one_partition() {
        let description = TopologyDescription::new()
            .add_host(CpuSet::from_indices(0..2))
            .add_host(CpuSet::from_indices(2..4));
        let partitions =
            Partitions::from_description(&description, PlacementPolicy::Shared).unwrap();

        assert_eq!(partitions.flattened().len(), 2);
        assert!(partitions.flattened().iter().all(|p| !p.has_device()));
    }

    #[test]
    fn unknown_host_is_fatal() {
        let description = TopologyDescription::new()
            .add_host(CpuSet::from_indices(0..2))
            .add_device("dev0", 3);
        let err = Partitions::from_description(&description, PlacementPolicy::Dedicated)
            .expect_err("device on nonexistent host must fail");
        assert!(matches!(err, SystemError::UnknownHostPartition { .. }));
    }

    #[test]
    fn overlapping_hosts_are_fatal() {
        let description = TopologyDescription::new()
            .add_host(CpuSet::from_indices(0..4))
            .add_host(CpuSet::from_indices(3..6));
        let err = Partitions::from_description(&description, PlacementPolicy::Dedicated)
            .expect_err("overlapping cpu sets must fail");
        assert!(matches!(err, SystemError::OverlappingCpuSets { .. }));
    }

    #[test]
    fn network_cpu_set_is_lowest_cpu() {
        let description = TopologyDescription::new().add_host(CpuSet::from_indices([5, 6, 7]));
        let partitions =
            Partitions::from_description(&description, PlacementPolicy::Dedicated).unwrap();
        let network = partitions.host_partitions()[0].network_cpu_set();
        assert_eq!(network, CpuSet::single(5));
    }
}
