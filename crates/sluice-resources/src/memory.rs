//! Host and device memory resources.
//!
//! The allocators themselves are opaque collaborators; what this module
//! owns is the wiring: every host allocation is registered with the host
//! partition's [`RegistrationCache`] before it is handed out, and a
//! partition's device arena is registered against that partition's
//! transport when one exists. A networked partition whose registration
//! fails must not run, so those failures are fatal at construction.

use std::alloc::{alloc, dealloc, Layout};

use log::debug;

use sluice_system::DevicePartition;

use crate::error::ResourceError;
use crate::registration::{RegistrationCache, RegistrationHandle};
use crate::transport::{RegistrationToken, TransportResources};

const HOST_BUFFER_ALIGN: usize = 64;
const DEVICE_ARENA_LEN: usize = 1 << 20;

/// A host allocation carrying its registration.
///
/// Freeing and deregistration happen together on drop, on every exit
/// path, so a buffer can never outlive its worker registrations or
/// vice versa.
pub struct HostBuffer {
    ptr: *mut u8,
    layout: Layout,
    registration: Option<RegistrationHandle>,
}

// The buffer is exclusively owned; the raw pointer is never aliased
// across threads.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn registration(&self) -> Option<&RegistrationHandle> {
        self.registration.as_ref()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        // Revoke worker registrations before the memory is reused.
        self.registration.take();
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// Per-host-partition host memory resource.
pub struct HostMemoryResources {
    host_partition_id: usize,
    registration_cache: RegistrationCache,
}

impl HostMemoryResources {
    pub(crate) fn new(host_partition_id: usize, registration_cache: RegistrationCache) -> Self {
        debug!(
            "host memory resources for host partition {host_partition_id}: {} registration callback(s)",
            registration_cache.callback_count()
        );
        Self {
            host_partition_id,
            registration_cache,
        }
    }

    pub fn host_partition_id(&self) -> usize {
        self.host_partition_id
    }

    pub fn registration_cache(&self) -> &RegistrationCache {
        &self.registration_cache
    }

    /// Allocates `len` bytes and registers them with every transport
    /// worker on this host. If registration fails the memory is freed
    /// before the error propagates.
    pub fn allocate(&self, len: usize) -> Result<HostBuffer, ResourceError> {
        let layout = Layout::from_size_align(len, HOST_BUFFER_ALIGN)
            .map_err(|_| ResourceError::AllocationFailed { size: len })?;
        if len == 0 {
            return Err(ResourceError::AllocationFailed { size: len });
        }
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(ResourceError::AllocationFailed { size: len });
        }

        let registration = match self.registration_cache.register(ptr as usize, len) {
            Ok(handle) => Some(handle),
            Err(err) => {
                unsafe { dealloc(ptr, layout) };
                return Err(err);
            }
        };

        Ok(HostBuffer {
            ptr,
            layout,
            registration,
        })
    }
}

/// Per-partition device memory resource.
///
/// The accelerator allocator is opaque; the arena here is a host-backed
/// stand-in whose runtime-visible behavior is its transport
/// registration.
pub struct DeviceMemoryResources {
    device_partition_id: usize,
    device_name: String,
    arena: HostBuffer,
    // Kept alive for the partition lifetime; dropping it revokes the
    // arena's transport registration.
    transport_registration: Option<RegistrationToken>,
}

impl DeviceMemoryResources {
    pub(crate) fn new(
        device: &DevicePartition,
        transport: Option<&TransportResources>,
    ) -> Result<Self, ResourceError> {
        let layout = Layout::from_size_align(DEVICE_ARENA_LEN, HOST_BUFFER_ALIGN)
            .map_err(|_| ResourceError::AllocationFailed {
                size: DEVICE_ARENA_LEN,
            })?;
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(ResourceError::AllocationFailed {
                size: DEVICE_ARENA_LEN,
            });
        }
        let arena = HostBuffer {
            ptr,
            layout,
            registration: None,
        };

        // Fatal on failure: a networked partition may not run with an
        // unregistered arena.
        let transport_registration = transport
            .map(|transport| transport.register_memory(arena.as_ptr() as usize, arena.len()))
            .transpose()?;

        debug!(
            "device memory resources ready for device partition {} ('{}'), registered: {}",
            device.device_partition_id(),
            device.name(),
            transport_registration.is_some()
        );

        Ok(Self {
            device_partition_id: device.device_partition_id(),
            device_name: device.name().to_string(),
            arena,
            transport_registration,
        })
    }

    pub fn device_partition_id(&self) -> usize {
        self.device_partition_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_registered(&self) -> bool {
        self.transport_registration.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::RegistrationCallbackBuilder;
    use crate::transport::{TransportContext, WorkerRole};
    use std::sync::Arc;

    fn cache_over_worker() -> (RegistrationCache, Arc<crate::transport::TransportWorker>) {
        let context = TransportContext::new();
        let worker = context.create_worker(WorkerRole::Server, 0);
        let mut builder = RegistrationCallbackBuilder::new();
        let contributing = worker.clone();
        builder.add_callback(Arc::new(move |addr, len| {
            contributing.register_memory(addr, len)
        }));
        (builder.build(), worker)
    }

    #[test]
    fn allocation_registers_and_drop_deregisters() {
        let (cache, worker) = cache_over_worker();
        let host = HostMemoryResources::new(0, cache);

        let buffer = host.allocate(4096).unwrap();
        assert_eq!(buffer.len(), 4096);
        assert_eq!(buffer.registration().unwrap().token_count(), 1);
        assert_eq!(worker.region_count(), 1);

        drop(buffer);
        assert_eq!(worker.region_count(), 0);
    }

    #[test]
    fn zero_length_allocation_fails() {
        let (cache, _worker) = cache_over_worker();
        let host = HostMemoryResources::new(0, cache);
        assert!(matches!(
            host.allocate(0),
            Err(ResourceError::AllocationFailed { size: 0 })
        ));
    }

    #[test]
    fn failed_registration_frees_the_buffer() {
        let mut builder = RegistrationCallbackBuilder::new();
        builder.add_callback(Arc::new(|_, _| {
            Err(ResourceError::RegistrationFailed("injected".into()))
        }));
        let host = HostMemoryResources::new(0, builder.build());
        assert!(host.allocate(64).is_err());
    }
}
