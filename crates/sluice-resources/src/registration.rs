//! Memory-registration cache and its builder.
//!
//! Host-resident allocators must make every buffer they hand out usable
//! for zero-copy transfer by every transport worker on the same host,
//! without knowing how many workers exist. During construction the
//! orchestrator walks every partition co-located on a host and pulls one
//! registration callback out of each transport resource into a
//! [`RegistrationCallbackBuilder`]; the built [`RegistrationCache`] is
//! the invocable aggregate, shared for the host partition's lifetime.
//!
//! The cache is append-only while being built and read-only afterwards,
//! so no locking is needed post-construction.

use std::sync::Arc;

use log::debug;

use crate::error::ResourceError;
use crate::transport::RegistrationToken;

/// One transport worker's "make this memory transfer-usable" hook:
/// `(buffer_addr, len) -> token`, where dropping the token revokes the
/// registration.
pub type RegistrationCallback =
    Arc<dyn Fn(usize, usize) -> Result<RegistrationToken, ResourceError> + Send + Sync>;

/// Accumulates per-worker registration callbacks for one host partition.
#[derive(Default)]
pub struct RegistrationCallbackBuilder {
    callbacks: Vec<RegistrationCallback>,
}

impl RegistrationCallbackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: RegistrationCallback) {
        self.callbacks.push(callback);
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    pub fn build(self) -> RegistrationCache {
        debug!(
            "registration cache built with {} callback(s)",
            self.callbacks.len()
        );
        RegistrationCache {
            callbacks: self.callbacks,
        }
    }
}

/// The per-host aggregate of worker registration callbacks.
pub struct RegistrationCache {
    callbacks: Vec<RegistrationCallback>,
}

impl RegistrationCache {
    /// Registers `[addr, addr + len)` with every worker on this host.
    ///
    /// All-or-nothing: if any callback fails, the tokens already
    /// acquired for this buffer are released before the error
    /// propagates, so no worker is left holding a registration for a
    /// buffer the caller never saw.
    pub fn register(&self, addr: usize, len: usize) -> Result<RegistrationHandle, ResourceError> {
        let mut tokens = Vec::with_capacity(self.callbacks.len());
        for callback in &self.callbacks {
            // Dropping `tokens` on the error path revokes the partial set.
            tokens.push(callback(addr, len)?);
        }
        Ok(RegistrationHandle { tokens })
    }

    /// Releases `handle`, revoking the buffer's registration from every
    /// worker exactly once.
    pub fn deregister(&self, handle: RegistrationHandle) {
        drop(handle);
    }

    /// Number of workers this cache registers buffers with.
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }
}

/// Owner of one buffer's registrations across all co-resident workers.
///
/// Dropping the handle revokes every registration; a handle is dropped
/// on every exit path, including mid-registration failure, so teardown
/// never leaks worker-side registration state.
pub struct RegistrationHandle {
    tokens: Vec<RegistrationToken>,
}

impl RegistrationHandle {
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportContext, WorkerRole};

    #[test]
    fn register_hits_every_callback() {
        let context = TransportContext::new();
        let workers: Vec<_> = (0..3)
            .map(|i| context.create_worker(WorkerRole::Server, i))
            .collect();

        let mut builder = RegistrationCallbackBuilder::new();
        for worker in &workers {
            let worker = worker.clone();
            builder.add_callback(Arc::new(move |addr, len| worker.register_memory(addr, len)));
        }
        let cache = builder.build();
        assert_eq!(cache.callback_count(), 3);

        let handle = cache.register(0x1000, 4096).unwrap();
        assert_eq!(handle.token_count(), 3);
        for worker in &workers {
            assert_eq!(worker.region_count(), 1);
        }

        cache.deregister(handle);
        for worker in &workers {
            assert_eq!(worker.region_count(), 0);
        }
    }

    #[test]
    fn failed_callback_releases_acquired_tokens() {
        let context = TransportContext::new();
        let worker = context.create_worker(WorkerRole::Server, 0);

        let mut builder = RegistrationCallbackBuilder::new();
        let contributing = worker.clone();
        builder.add_callback(Arc::new(move |addr, len| {
            contributing.register_memory(addr, len)
        }));
        builder.add_callback(Arc::new(|_, _| {
            Err(ResourceError::RegistrationFailed("injected".into()))
        }));
        let cache = builder.build();

        assert!(cache.register(0x2000, 64).is_err());
        // The first worker's token was released on the error path.
        assert_eq!(worker.region_count(), 0);
    }

    #[test]
    fn empty_cache_registers_nothing() {
        let cache = RegistrationCallbackBuilder::new().build();
        let handle = cache.register(0x3000, 16).unwrap();
        assert_eq!(handle.token_count(), 0);
    }
}
