//! Threading resources: the per-host-partition queue set.
//!
//! [`ThreadingResources`] is built exactly once per runtime, single
//! threaded, from the validated partition model. It owns one
//! [`FiberTaskQueue`] per host partition plus a system queue for
//! cross-partition control work, and carries the thread-local
//! initializer registry: closures that must run once on every runtime
//! thread bound to a given CPU set, including threads created after the
//! registration.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;
use parking_lot::Mutex;

use crate::cpu_set::CpuSet;
use crate::error::SystemError;
use crate::task_queue::{pin_current_thread, FiberTaskQueue};
use crate::topology::Partitions;

/// A closure run once at startup of every runtime thread whose CPU set
/// intersects the set it was registered on.
pub type ThreadLocalInitializer = Arc<dyn Fn() + Send + Sync>;

pub struct ThreadingResources {
    /// Host partition queues, indexed by `host_partition_id`.
    queues: Vec<FiberTaskQueue>,
    system_queue: FiberTaskQueue,
    initializers: Mutex<Vec<(CpuSet, ThreadLocalInitializer)>>,
}

impl ThreadingResources {
    /// Builds one queue per host partition plus the system queue.
    ///
    /// Single-threaded by contract: no dispatch may happen while queues
    /// are still being created.
    pub fn new(partitions: &Partitions) -> Result<Self, SystemError> {
        let queues = partitions
            .host_partitions()
            .iter()
            .map(|host| {
                FiberTaskQueue::new(
                    format!("sluice/host-{}", host.host_partition_id()),
                    host.cpu_set().clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let system_queue = FiberTaskQueue::new(
            "sluice/system".to_string(),
            partitions.sys_host_partition().cpu_set().clone(),
        )?;

        debug!(
            "threading resources ready: {} host queue(s) + system queue",
            queues.len()
        );

        Ok(Self {
            queues,
            system_queue,
            initializers: Mutex::new(Vec::new()),
        })
    }

    /// Looks up the queue bound to `cpu_set`.
    ///
    /// An exact key match wins; otherwise the host queue whose CPU set
    /// contains the requested set is returned, so a network-dedicated
    /// subset resolves to its host's queue. No match is a logic error.
    pub fn get_task_queue(&self, cpu_set: &CpuSet) -> Result<&FiberTaskQueue, SystemError> {
        if let Some(queue) = self.queues.iter().find(|q| q.cpu_set() == cpu_set) {
            return Ok(queue);
        }
        if !cpu_set.is_empty() {
            if let Some(queue) = self
                .queues
                .iter()
                .find(|q| q.cpu_set().contains_set(cpu_set))
            {
                return Ok(queue);
            }
        }
        Err(SystemError::UnknownTaskQueue(cpu_set.clone()))
    }

    /// The queue of a host partition, by id.
    pub fn host_queue(&self, host_partition_id: usize) -> Option<&FiberTaskQueue> {
        self.queues.get(host_partition_id)
    }

    /// The system-wide queue for cross-partition control work.
    pub fn system_queue(&self) -> &FiberTaskQueue {
        &self.system_queue
    }

    pub fn host_queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Registers `f` to run once on every runtime thread bound to a CPU
    /// set intersecting `cpu_set`.
    ///
    /// The initializer runs synchronously on every existing queue thread
    /// before this call returns, and is recorded so threads created or
    /// assigned afterwards (via [`ThreadingResources::spawn_thread`])
    /// run it at startup. Registrations over overlapping sets compose in
    /// registration order; they never replace one another.
    pub fn register_thread_local_initializer<F>(
        &self,
        cpu_set: CpuSet,
        f: F,
    ) -> Result<(), SystemError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let initializer: ThreadLocalInitializer = Arc::new(f);
        self.initializers
            .lock()
            .push((cpu_set.clone(), initializer.clone()));

        let mut pending = Vec::new();
        for queue in self.queues.iter().chain(std::iter::once(&self.system_queue)) {
            if queue.cpu_set().intersects(&cpu_set) {
                let initializer = initializer.clone();
                pending.push(queue.enqueue(move || initializer()));
            }
        }
        for handle in pending {
            handle.wait()?;
        }
        Ok(())
    }

    /// Spawns a runtime-owned helper thread pinned to `cpu_set`.
    ///
    /// Every initializer registered for an intersecting CPU set runs on
    /// the new thread before `f`.
    pub fn spawn_thread<F>(
        &self,
        name: String,
        cpu_set: CpuSet,
        f: F,
    ) -> Result<JoinHandle<()>, SystemError>
    where
        F: FnOnce() + Send + 'static,
    {
        let initializers: Vec<ThreadLocalInitializer> = self
            .initializers
            .lock()
            .iter()
            .filter(|(set, _)| set.intersects(&cpu_set))
            .map(|(_, initializer)| initializer.clone())
            .collect();
        let pin = cpu_set.first();
        let thread_name = name.clone();

        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Some(cpu) = pin {
                    pin_current_thread(cpu, &thread_name);
                }
                for initializer in &initializers {
                    initializer();
                }
                f();
            })
            .map_err(|source| SystemError::SpawnFailed { name, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PlacementPolicy;
    use crate::topology::TopologyDescription;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn two_host_threading() -> ThreadingResources {
        let description = TopologyDescription::new()
            .add_host(CpuSet::from_indices(0..2))
            .add_host(CpuSet::from_indices(2..4));
        let partitions =
            Partitions::from_description(&description, PlacementPolicy::Dedicated).unwrap();
        ThreadingResources::new(&partitions).unwrap()
    }

    #[test]
    fn queue_lookup_exact_and_subset() {
        let threading = two_host_threading();

        let host0 = CpuSet::from_indices(0..2);
        assert_eq!(
            threading.get_task_queue(&host0).unwrap().cpu_set(),
            &host0
        );

        // Network-dedicated subset resolves to its host's queue.
        let network = CpuSet::single(2);
        let queue = threading.get_task_queue(&network).unwrap();
        assert_eq!(queue.cpu_set(), &CpuSet::from_indices(2..4));

        let foreign = CpuSet::from_indices(10..12);
        assert!(matches!(
            threading.get_task_queue(&foreign),
            Err(SystemError::UnknownTaskQueue(_))
        ));
    }

    #[test]
    fn initializer_runs_on_existing_and_future_threads() {
        let threading = two_host_threading();
        let count = Arc::new(AtomicUsize::new(0));

        let observed = count.clone();
        threading
            .register_thread_local_initializer(CpuSet::from_indices(0..2), move || {
                observed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        // Host 0 queue thread + system queue thread (same cpu set).
        assert_eq!(count.load(Ordering::SeqCst), 2);

        let (tx, rx) = mpsc::channel();
        let handle = threading
            .spawn_thread("helper".into(), CpuSet::single(1), move || {
                tx.send(()).unwrap();
            })
            .unwrap();
        rx.recv().unwrap();
        handle.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn initializers_compose_in_registration_order() {
        let threading = two_host_threading();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        threading
            .register_thread_local_initializer(CpuSet::single(2), move || {
                first.lock().push("first");
            })
            .unwrap();
        let second = order.clone();
        threading
            .register_thread_local_initializer(CpuSet::from_indices(2..4), move || {
                second.lock().push("second");
            })
            .unwrap();

        // A later thread on the overlapping set runs both, in order.
        threading
            .spawn_thread("ordered".into(), CpuSet::single(3), || {})
            .unwrap()
            .join()
            .unwrap();

        let order = order.lock();
        // Existing host-1 queue thread ran each once as it was registered,
        // the spawned thread ran both afterwards.
        assert_eq!(*order, vec!["first", "second", "first", "second"]);
    }
}
