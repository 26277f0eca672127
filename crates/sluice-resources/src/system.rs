//! The runtime orchestrator.
//!
//! [`SystemResources`] builds every resource layer in strict order;
//! reordering the steps breaks assembly invariants (the registration
//! cache must see every sibling transport, device memory must register
//! against an already-built transport, thread-local bindings must only
//! see fully assembled partitions). Construction is synchronous and
//! single-threaded; final vectors are indexed by `partition_id`, never
//! by completion order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

use sluice_system::{
    Partitions, PlacementPolicy, SystemOptions, ThreadingResources,
};

use crate::context;
use crate::error::ResourceError;
use crate::memory::{DeviceMemoryResources, HostMemoryResources};
use crate::partition::{PartitionResourceBase, PartitionResources};
use crate::registration::RegistrationCallbackBuilder;
use crate::transport::{TransportContext, TransportResources};

/// One per runtime instance: owns the threading layer and every
/// per-partition resource vector, and installs the thread-local
/// bindings the execution layer's accessors rely on.
pub struct SystemResources {
    options: SystemOptions,
    partitions: Arc<Partitions>,
    // Declared before `threading` so partition resources (and their
    // transport registrations) are torn down while queues still exist.
    partition_resources: Vec<PartitionResources>,
    threading: Arc<ThreadingResources>,
    shut_down: AtomicBool,
}

impl SystemResources {
    /// Builds the full resource stack for `options`.
    ///
    /// Any topology inconsistency or transport/registration failure is
    /// fatal here: no partial runtime may start.
    pub fn new(options: SystemOptions) -> Result<Arc<Self>, ResourceError> {
        // 1. validated partition model, then the threading resources
        //    (one fiber queue per host partition).
        let partitions = Arc::new(Partitions::from_description(
            options.topology(),
            options.placement(),
        )?);
        let threading = Arc::new(ThreadingResources::new(&partitions)?);

        // 2. the system-wide task handle for cross-partition control
        //    work lives on the system queue.
        debug!(
            "system task queue '{}' ready",
            threading.system_queue().name()
        );

        // 3. one base entry per flattened partition, pairing the
        //    threading handle with the partition id.
        let bases: Vec<PartitionResourceBase> = (0..partitions.flattened().len())
            .map(|partition_id| {
                PartitionResourceBase::new(threading.clone(), partitions.clone(), partition_id)
            })
            .collect();

        // 4. transport resources per partition, on each host's
        //    network-dedicated queue. All of them are complete before
        //    the host caches consume their callbacks.
        let mut transports: Vec<Option<TransportResources>> = Vec::with_capacity(bases.len());
        if options.network_enabled() {
            let transport_context = TransportContext::new();
            for base in &bases {
                debug!(
                    "building transport resources for partition {}",
                    base.partition_id()
                );
                transports.push(Some(TransportResources::new(
                    base.clone(),
                    transport_context.clone(),
                )?));
            }
        } else {
            transports.resize_with(bases.len(), || None);
        }

        // 5. host memory per host partition, wired to a registration
        //    cache aggregating every same-host transport contribution.
        let mut hosts: Vec<Arc<HostMemoryResources>> =
            Vec::with_capacity(partitions.host_partitions().len());
        for host in partitions.host_partitions() {
            let mut builder = RegistrationCallbackBuilder::new();
            for transport in transports.iter().flatten() {
                let transport_host =
                    partitions.flattened()[transport.partition_id()].host_partition_id();
                if transport_host == host.host_partition_id() {
                    transport.add_registration_cache_to_builder(&mut builder);
                }
            }
            debug!(
                "building host memory resources for host partition {}",
                host.host_partition_id()
            );
            hosts.push(Arc::new(HostMemoryResources::new(
                host.host_partition_id(),
                builder.build(),
            )));
        }

        // 6. device memory per flattened partition with a device,
        //    registered against its transport when present.
        let mut devices: Vec<Option<DeviceMemoryResources>> = Vec::with_capacity(bases.len());
        for base in &bases {
            match base.partition().device_partition_id() {
                Some(device_partition_id) => {
                    let device = &partitions.device_partitions()[device_partition_id];
                    let transport = transports[base.partition_id()].as_ref();
                    devices.push(Some(DeviceMemoryResources::new(device, transport)?));
                }
                None => devices.push(None),
            }
        }

        // 7. assemble the per-partition façades.
        let mut partition_resources = Vec::with_capacity(bases.len());
        for ((base, transport), device) in bases.into_iter().zip(transports).zip(devices) {
            let host_partition_id = base.partition().host_partition_id();
            partition_resources.push(PartitionResources::new(
                base,
                hosts[host_partition_id].clone(),
                device,
                transport,
            ));
        }

        let runtime = Arc::new(Self {
            options,
            partitions: partitions.clone(),
            partition_resources,
            threading: threading.clone(),
            shut_down: AtomicBool::new(false),
        });

        // 8. thread-local bindings, installed last so accessors only
        //    ever observe fully assembled partitions. Current-partition
        //    is bound only under dedicated placement; shared placement
        //    forces explicit partition routing.
        let placement = runtime.options.placement();
        for partition in &runtime.partition_resources {
            let cpu_set = partitions.host_partitions()[partition.partition().host_partition_id()]
                .cpu_set()
                .clone();
            let weak = Arc::downgrade(&runtime);
            let partition_id = partition.partition_id();
            threading.register_thread_local_initializer(cpu_set, move || {
                let bound_partition =
                    matches!(placement, PlacementPolicy::Dedicated).then_some(partition_id);
                context::bind_current_thread(weak.clone(), bound_partition);
            })?;
        }

        info!(
            "system resources initialized: {} partition(s), {} device(s), network {}",
            runtime.partition_count(),
            runtime.device_count(),
            if runtime.options.network_enabled() {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(runtime)
    }

    /// The runtime the current thread belongs to.
    ///
    /// Fails on any thread the runtime never initialized: foreign-thread
    /// access is a programming error to surface, not to tolerate.
    pub fn current() -> Result<Arc<SystemResources>, ResourceError> {
        context::current_runtime().ok_or_else(|| {
            error!(
                "thread {:?} attempted to access the runtime but is not a runtime thread",
                std::thread::current().id()
            );
            ResourceError::ForeignThread
        })
    }

    /// The partition the current thread is dedicated to.
    ///
    /// Distinguishes two recoverable failures: a thread the runtime
    /// never initialized ([`ResourceError::ForeignThread`]) and a
    /// registered thread under shared placement, where the binding is
    /// intentionally unset ([`ResourceError::PartitionQueryDisabled`]).
    pub fn current_partition_id() -> Result<usize, ResourceError> {
        if let Some(partition_id) = context::current_partition_id() {
            return Ok(partition_id);
        }
        let runtime = Self::current()?;
        if runtime.options.placement() == PlacementPolicy::Shared {
            error!("partition query is disabled when shared placement is in use");
            return Err(ResourceError::PartitionQueryDisabled);
        }
        Err(ResourceError::ForeignThread)
    }

    pub fn options(&self) -> &SystemOptions {
        &self.options
    }

    pub fn partition_model(&self) -> &Partitions {
        &self.partitions
    }

    pub fn threading(&self) -> &Arc<ThreadingResources> {
        &self.threading
    }

    pub fn partition(&self, partition_id: usize) -> Option<&PartitionResources> {
        self.partition_resources.get(partition_id)
    }

    pub fn partitions(&self) -> &[PartitionResources] {
        &self.partition_resources
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.flattened().len()
    }

    pub fn device_count(&self) -> usize {
        self.partitions.device_partitions().len()
    }

    /// Drains every transport before the task queues they depend on go
    /// away. Idempotent; also invoked from drop.
    pub fn shutdown(&self) -> Result<(), ResourceError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for partition in &self.partition_resources {
            if let Some(network) = partition.network() {
                network.shutdown()?;
            }
        }
        Ok(())
    }
}

impl Drop for SystemResources {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("transport drain during runtime teardown failed: {err}");
        }
    }
}
