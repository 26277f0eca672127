//! Transport (network) resources.
//!
//! Optional per-partition component, created only when networking is
//! configured. Each partition owns a server-role and a client-role
//! worker on the process-shared [`TransportContext`]; the split keeps
//! inbound connection setup from head-of-line blocking outbound
//! issuance. Workers are constructed on their host's network-dedicated
//! task queue, after that queue exists and before the host's memory
//! resources are finalized, so the host registration cache sees every
//! sibling partition's contribution.
//!
//! The transport library proper (endpoints, wire transfer) is an
//! external collaborator; what this module owns is worker identity,
//! memory-region registration state and cooperative drain on teardown.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, trace, warn};

use crate::error::ResourceError;
use crate::partition::PartitionResourceBase;
use crate::registration::RegistrationCallbackBuilder;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Server,
    Client,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Server => write!(f, "server"),
            WorkerRole::Client => write!(f, "client"),
        }
    }
}

/// Process-shared transport context; all workers of one runtime hang
/// off the same context.
pub struct TransportContext {
    context_id: u64,
    next_worker_id: AtomicU64,
}

impl TransportContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            context_id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            next_worker_id: AtomicU64::new(0),
        })
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    pub fn create_worker(
        self: &Arc<Self>,
        role: WorkerRole,
        partition_id: usize,
    ) -> Arc<TransportWorker> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("p{partition_id}/{role}");
        let address = format!(
            "sluice://ctx{}/worker{}/{}",
            self.context_id, worker_id, role
        )
        .into_bytes();
        trace!("created transport worker '{name}'");
        Arc::new(TransportWorker {
            name,
            role,
            address,
            regions: DashMap::new(),
            next_region_id: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct MemoryRegion {
    addr: usize,
    len: usize,
}

/// One transport worker: an addressable endpoint with its own
/// memory-region registration table and in-flight operation count.
pub struct TransportWorker {
    name: String,
    role: WorkerRole,
    address: Vec<u8>,
    regions: DashMap<u64, MemoryRegion>,
    next_region_id: AtomicU64,
    in_flight: AtomicUsize,
}

impl TransportWorker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Opaque address for out-of-band exchange with remote instances.
    pub fn address(&self) -> &[u8] {
        &self.address
    }

    /// Makes `[addr, addr + len)` usable for zero-copy transfer through
    /// this worker. The returned token revokes the registration when
    /// dropped, exactly once.
    pub fn register_memory(
        self: &Arc<Self>,
        addr: usize,
        len: usize,
    ) -> Result<RegistrationToken, ResourceError> {
        if len == 0 {
            return Err(ResourceError::RegistrationFailed(format!(
                "worker '{}' rejected a zero-length region",
                self.name
            )));
        }
        let region_id = self.next_region_id.fetch_add(1, Ordering::Relaxed);
        self.regions.insert(region_id, MemoryRegion { addr, len });
        trace!(
            "worker '{}' registered region {region_id} ({len} bytes)",
            self.name
        );
        Ok(RegistrationToken {
            worker: self.clone(),
            region_id,
        })
    }

    fn deregister(&self, region_id: u64) {
        match self.regions.remove(&region_id) {
            Some((_, region)) => trace!(
                "worker '{}' deregistered region {region_id} ({:#x}, {} bytes)",
                self.name,
                region.addr,
                region.len
            ),
            None => warn!(
                "worker '{}' asked to deregister unknown region {region_id}",
                self.name
            ),
        }
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Marks the start of a send/receive; paired with
    /// [`TransportWorker::complete_operation`].
    pub fn begin_operation(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub fn complete_operation(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Cooperatively waits for every outstanding operation to complete
    /// rather than aborting mid-transfer, so no remote-side registration
    /// state is leaked.
    pub fn drain(&self) {
        while self.in_flight() > 0 {
            std::thread::yield_now();
        }
        trace!("worker '{}' drained", self.name);
    }
}

/// Owner of one registered memory region; revokes it on drop.
pub struct RegistrationToken {
    worker: Arc<TransportWorker>,
    region_id: u64,
}

impl Drop for RegistrationToken {
    fn drop(&mut self) {
        self.worker.deregister(self.region_id);
    }
}

/// Per-partition transport bundle: shared context, server and client
/// workers, and this partition's registration-cache contribution.
pub struct TransportResources {
    base: PartitionResourceBase,
    context: Arc<TransportContext>,
    worker_server: Arc<TransportWorker>,
    worker_client: Arc<TransportWorker>,
}

impl TransportResources {
    /// Builds both workers on the host's network-dedicated task queue.
    pub(crate) fn new(
        base: PartitionResourceBase,
        context: Arc<TransportContext>,
    ) -> Result<Self, ResourceError> {
        let partition_id = base.partition_id();
        let queue = base.network_queue()?;
        let worker_context = context.clone();
        let (worker_server, worker_client) = queue
            .enqueue(move || {
                let server = worker_context.create_worker(WorkerRole::Server, partition_id);
                let client = worker_context.create_worker(WorkerRole::Client, partition_id);
                (server, client)
            })
            .wait()?;
        debug!("transport resources ready for partition {partition_id}");
        Ok(Self {
            base,
            context,
            worker_server,
            worker_client,
        })
    }

    pub fn partition_id(&self) -> usize {
        self.base.partition_id()
    }

    /// The process-shared transport context.
    pub fn context(&self) -> &Arc<TransportContext> {
        &self.context
    }

    /// The server worker's address, for out-of-band exchange with the
    /// control plane.
    pub fn address(&self) -> &[u8] {
        self.worker_server.address()
    }

    /// Contributes this partition's registration callback to a host
    /// cache builder without exposing the worker itself.
    pub fn add_registration_cache_to_builder(&self, builder: &mut RegistrationCallbackBuilder) {
        let worker = self.worker_server.clone();
        builder.add_callback(Arc::new(move |addr, len| worker.register_memory(addr, len)));
    }

    /// Registers partition-local memory (the device arena) with this
    /// partition's transport.
    pub(crate) fn register_memory(
        &self,
        addr: usize,
        len: usize,
    ) -> Result<RegistrationToken, ResourceError> {
        self.worker_server.register_memory(addr, len)
    }

    /// Drains both workers on the network queue. Must complete before
    /// the task queues this transport depends on are torn down.
    pub fn shutdown(&self) -> Result<(), ResourceError> {
        let queue = self.base.network_queue()?;
        let server = self.worker_server.clone();
        let client = self.worker_client.clone();
        queue
            .enqueue(move || {
                server.drain();
                client.drain();
            })
            .wait()?;
        debug!(
            "transport resources for partition {} shut down",
            self.base.partition_id()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn token_drop_revokes_exactly_once() {
        let context = TransportContext::new();
        let worker = context.create_worker(WorkerRole::Server, 0);

        let token = worker.register_memory(0x1000, 128).unwrap();
        assert_eq!(worker.region_count(), 1);
        drop(token);
        assert_eq!(worker.region_count(), 0);
    }

    #[test]
    fn zero_length_registration_fails() {
        let context = TransportContext::new();
        let worker = context.create_worker(WorkerRole::Client, 0);
        assert!(matches!(
            worker.register_memory(0x1000, 0),
            Err(ResourceError::RegistrationFailed(_))
        ));
        assert_eq!(worker.region_count(), 0);
    }

    #[test]
    fn drain_waits_for_outstanding_operations() {
        let context = TransportContext::new();
        let worker = context.create_worker(WorkerRole::Server, 0);

        worker.begin_operation();
        let in_flight = worker.clone();
        let completer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            in_flight.complete_operation();
        });

        worker.drain();
        assert_eq!(worker.in_flight(), 0);
        completer.join().unwrap();
    }

    #[test]
    fn worker_addresses_are_distinct() {
        let context = TransportContext::new();
        let server = context.create_worker(WorkerRole::Server, 3);
        let client = context.create_worker(WorkerRole::Client, 3);
        assert_ne!(server.address(), client.address());
        assert_eq!(server.role(), WorkerRole::Server);
        assert_eq!(client.role(), WorkerRole::Client);
    }
}
